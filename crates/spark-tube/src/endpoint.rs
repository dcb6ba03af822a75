//! 端点：按能力组合的连接对象。
//!
//! # 设计动机（Why）
//! - 端点可能只读（日志流）、只写（命令通道）、或读写兼备（子进程），拆除能力也并非总是存在；
//! - 以三个可选能力字段表达，而不是类继承层级，Tube 只需检查字段是否存在即可判定连接状态。
//!
//! # 契约说明（What）
//! - 可读源 [`ChunkSource`]：产出数据块的流，流结束即表示对端关闭；
//! - 可写端 [`ChunkSink`]：接受写入的 `AsyncWrite`；
//! - 拆除能力 [`Destroy`]：异步执行，可能失败；
//! - [`Endpoint::destroyed`] 为三者皆无的终态哨兵，Tube 在 `close` 之后持有它。

use std::{fmt, future::Future, io, pin::Pin};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// 可读源：依次产出数据块，`None` 表示关闭。
pub type ChunkSource = BoxStream<'static, io::Result<Bytes>>;

/// 可写端。
pub type ChunkSink = Pin<Box<dyn AsyncWrite + Send>>;

/// 端点的拆除能力。
///
/// # 教案式说明
/// - **意图 (Why)**：子进程需要发送终止信号、网络连接需要关闭套接字，统一为一个异步动作；
/// - **契约 (What)**：失败以 `io::Error` 返回，Tube 会把它原样交给 `close` 的调用方；
/// - **风险 (Trade-offs)**：实现者无需保证幂等，Tube 保证每个端点最多调用一次。
#[async_trait]
pub trait Destroy: Send {
    async fn destroy(&mut self) -> io::Result<()>;
}

/// 以一次性闭包实现 [`Destroy`]。
pub struct DestroyFn<F>(Option<F>);

#[async_trait]
impl<F, Fut> Destroy for DestroyFn<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<()>> + Send + 'static,
{
    async fn destroy(&mut self) -> io::Result<()> {
        match self.0.take() {
            Some(destroy) => destroy().await,
            None => Err(io::Error::other("destroy callback already consumed")),
        }
    }
}

/// 能力可选的连接端点。
#[derive(Default)]
pub struct Endpoint {
    pub(crate) source: Option<ChunkSource>,
    pub(crate) sink: Option<ChunkSink>,
    pub(crate) destroy: Option<Box<dyn Destroy>>,
    pub(crate) destroyed: bool,
}

impl Endpoint {
    /// 创建没有任何能力的空端点，随后用 `with_*` 方法逐项装配。
    pub fn new() -> Self {
        Self::default()
    }

    /// 终态哨兵：没有任何能力，且拒绝再次拆除。
    pub fn destroyed() -> Self {
        Self {
            destroyed: true,
            ..Self::default()
        }
    }

    /// 由一对读写半部构造端点，读半部按 `chunk_size` 分块。
    pub fn from_io<R, W>(reader: R, writer: W, chunk_size: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self::new()
            .with_source(read_chunks(reader, chunk_size))
            .with_sink(writer)
    }

    pub fn with_source(mut self, source: ChunkSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_sink<W>(mut self, sink: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        self.sink = Some(Box::pin(sink));
        self
    }

    pub fn with_destroy(mut self, destroy: impl Destroy + 'static) -> Self {
        self.destroy = Some(Box::new(destroy));
        self
    }

    /// 以闭包提供拆除动作。
    pub fn destroy_with<F, Fut>(self, destroy: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        self.with_destroy(DestroyFn(Some(destroy)))
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn has_destroy(&self) -> bool {
        self.destroy.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("source", &self.has_source())
            .field("sink", &self.has_sink())
            .field("destroy", &self.has_destroy())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

/// 把任意 `AsyncRead` 转换为数据块流，读到 EOF 时结束，读错误作为最后一项产出。
pub fn read_chunks<R>(reader: R, chunk_size: usize) -> ChunkSource
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let chunk_size = chunk_size.max(1);
    futures::stream::unfold(Some(reader), move |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(chunk_size);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            Err(err) => Some((Err(err), None)),
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn read_chunks_ends_at_eof() {
        let reader: &'static [u8] = b"abcdefgh";
        let chunks: Vec<Bytes> = read_chunks(reader, 3).try_collect().await.expect("no io error");
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"abcdefgh");
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
    }

    #[tokio::test]
    async fn destroy_closure_runs_once() {
        let mut endpoint = Endpoint::new().destroy_with(|| async { Ok::<(), io::Error>(()) });
        assert!(endpoint.has_destroy());
        let destroy = endpoint.destroy.as_mut().expect("capability present");
        assert!(destroy.destroy().await.is_ok());
        assert!(destroy.destroy().await.is_err());
    }

    #[test]
    fn sentinel_has_no_capabilities() {
        let sentinel = Endpoint::destroyed();
        assert!(sentinel.is_destroyed());
        assert!(!sentinel.has_source() && !sentinel.has_sink() && !sentinel.has_destroy());
    }
}
