use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// Tube 的接收缓冲：尾部追加、头部消费、头部回推。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 数据以块为单位到达，直接保存 `Bytes` 块可以避免在追加与回推时整体搬移内存；
/// - `unget` 需要把未消费的前瞻数据放回最前面，双端队列天然支持。
///
/// ## 契约（What）
/// - 字节顺序只会因显式消费而改变，不会重排或丢失；
/// - 空块不会入队，`is_empty` 与 `len() == 0` 等价。
#[derive(Debug, Default)]
pub(crate) struct ReceiveBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ReceiveBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 在尾部追加一块数据。
    pub(crate) fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// 把数据放回头部。
    pub(crate) fn unget(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_front(chunk);
    }

    /// 从头部取出至多 `max` 字节。
    pub(crate) fn take(&mut self, max: usize) -> Bytes {
        if max == 0 || self.is_empty() {
            return Bytes::new();
        }
        if max >= self.len {
            return self.take_all();
        }

        // 首块足够时直接切分，避免复制。
        if let Some(front) = self.chunks.front_mut()
            && front.len() >= max
        {
            let out = front.split_to(max);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            self.len -= max;
            return out;
        }

        let mut out = BytesMut::with_capacity(max);
        while out.len() < max {
            let Some(mut front) = self.chunks.pop_front() else {
                break;
            };
            let wanted = max - out.len();
            if front.len() > wanted {
                out.extend_from_slice(&front.split_to(wanted));
                self.chunks.push_front(front);
            } else {
                out.extend_from_slice(&front);
            }
        }
        self.len -= out.len();
        out.freeze()
    }

    /// 取出全部数据。
    pub(crate) fn take_all(&mut self) -> Bytes {
        self.len = 0;
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.pop_front().unwrap_or_default(),
            _ => {
                let mut out = BytesMut::with_capacity(self.chunks.iter().map(Bytes::len).sum());
                for chunk in self.chunks.drain(..) {
                    out.extend_from_slice(&chunk);
                }
                out.freeze()
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_spans_chunk_boundaries() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(Bytes::from_static(b"ab"));
        buffer.push(Bytes::from_static(b"cde"));
        buffer.push(Bytes::new());
        assert_eq!(buffer.len(), 5);

        assert_eq!(&buffer.take(3)[..], b"abc");
        assert_eq!(buffer.len(), 2);
        assert_eq!(&buffer.take(10)[..], b"de");
        assert!(buffer.is_empty());
        assert!(buffer.take(1).is_empty());
    }

    #[test]
    fn unget_restores_head_order() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(Bytes::from_static(b"world"));
        let head = buffer.take(2);
        buffer.unget(head);
        buffer.unget(Bytes::from_static(b"hello "));
        assert_eq!(&buffer.take_all()[..], b"hello world");
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn take_within_first_chunk_keeps_rest() {
        let mut buffer = ReceiveBuffer::new();
        buffer.push(Bytes::from_static(b"abcdef"));
        assert_eq!(&buffer.take(2)[..], b"ab");
        assert_eq!(buffer.len(), 4);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
