use std::{mem, sync::Arc};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    io::AsyncWriteExt,
    sync::watch,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, trace, warn};

use crate::{
    Direction, Incomplete, RecvOptions, Timeout, TubeConfig,
    buffer::ReceiveBuffer,
    endpoint::{ChunkSource, Endpoint},
    error::{Result, TubeError},
    wait::{Expiry, WaitLimit, wait_for},
};

/// Tube 可等待的通知。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TubeEvent {
    /// 缓冲区有新数据，或源已关闭。
    Changed,
    /// 源已关闭。
    Closed,
}

#[derive(Debug)]
struct Shared {
    buffer: ReceiveBuffer,
    source_open: bool,
}

/// 面向交互式脚本的缓冲收发通道。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 驱动子进程等外部端点时，数据以任意大小、任意时刻的块到达；调用方需要“按字节数”“按分隔符”
///   “按行”精确取数，并为每次等待设置超时，而不是忙等轮询；
/// - 所有阻塞操作共享同一套等待原语（见 [`crate::wait`]），超时与取消语义一致。
///
/// ## 逻辑 (How)
/// - 构造时把端点的可读源移交给后台泵任务：每到一块数据就追加到共享缓冲并递增 `watch` 序号，
///   源结束时标记关闭并再通知一次；
/// - 等待方在检查缓冲区之前先把当前序号标记为已读，检查与等待之间到达的数据必然触发下一次通知；
/// - 共享状态由 `parking_lot::Mutex` 保护，锁从不跨越 `.await`。
///
/// ## 契约 (What)
/// - 接收方法均以 `&mut self` 调用，同一 Tube 上无法重叠发起两次接收；
/// - 未被消费的数据不会丢失：超时、未匹配、抛错路径都会把已累积的字节回推到缓冲区头部
///   （[`Incomplete::Return`] 除外，此时数据直接交给调用方）；
/// - [`close`](Self::close) 之后所有能力检查均失败，缓冲区内容被丢弃。
///
/// ## 注意事项 (Trade-offs)
/// - 构造需要位于 Tokio 运行时之内（泵任务通过 `tokio::spawn` 启动）；
/// - 分隔符扫描只覆盖新增数据与前一段的重叠尾部，但累积缓冲本身仍会随未匹配数据增长。
pub struct Tube {
    endpoint: Endpoint,
    shared: Arc<Mutex<Shared>>,
    events: watch::Receiver<u64>,
    pump: Option<JoinHandle<()>>,
    config: TubeConfig,
}

enum Scan {
    Matched(Bytes),
    Incomplete(Bytes),
}

impl Tube {
    /// 使用默认配置绑定端点。
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_config(endpoint, TubeConfig::default())
    }

    /// 使用给定配置绑定端点。
    pub fn with_config(mut endpoint: Endpoint, config: TubeConfig) -> Self {
        let (notifier, events) = watch::channel(0u64);
        let source = endpoint.source.take();
        let shared = Arc::new(Mutex::new(Shared {
            buffer: ReceiveBuffer::new(),
            source_open: source.is_some(),
        }));
        let pump = source.map(|source| tokio::spawn(pump(source, Arc::clone(&shared), notifier)));

        Self {
            endpoint,
            shared,
            events,
            pump,
            config,
        }
    }

    /// 当前生效的配置。
    pub fn config(&self) -> &TubeConfig {
        &self.config
    }

    /// 修改配置，影响之后发起的调用。
    pub fn config_mut(&mut self) -> &mut TubeConfig {
        &mut self.config
    }

    /// 当前缓冲的字节数。
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// 查询指定方向是否仍然可用。
    ///
    /// 接收方向在源未关闭或缓冲区仍有数据时为真；发送方向取决于端点是否仍有可写端。
    pub fn connected(&self, direction: Direction) -> bool {
        let recv = self.recv_open();
        let send = self.endpoint.has_sink();
        match direction {
            Direction::Recv => recv,
            Direction::Send => send,
            Direction::Any => recv || send,
            Direction::All => recv && send,
        }
    }

    /// 等待指定事件，或在 `limit` 到达时放弃。返回事件是否发生。
    pub async fn wait(&mut self, event: TubeEvent, limit: WaitLimit) -> bool {
        self.arm();
        if event == TubeEvent::Closed && !self.shared.lock().source_open {
            return true;
        }
        self.wait_event(event, limit).await
    }

    /// 至多读取 `max` 字节。
    ///
    /// 缓冲区为空时等待新数据，直到超时；超时不是错误，返回的数据可能少于 `max` 甚至为空。
    /// 接收方向不可用时立即返回 [`TubeError::NotConnected`]。
    pub async fn recv(&mut self, max: usize, timeout: impl Into<Timeout>) -> Result<Bytes> {
        let deadline = timeout.into().deadline(self.config.long_timeout);
        self.recv_by(max, deadline).await
    }

    /// [`recv`](Self::recv) 的字符串变体。
    pub async fn recv_s(&mut self, max: usize, timeout: impl Into<Timeout>) -> Result<String> {
        let data = self.recv(max, timeout).await?;
        Ok(self.decode(&data))
    }

    /// 把数据放回缓冲区头部，后续接收会先看到它们。
    pub fn unrecv(&mut self, data: impl Into<Bytes>) {
        if self.endpoint.is_destroyed() {
            debug!("unrecv on a destroyed tube ignored");
            return;
        }
        self.shared.lock().buffer.unget(data.into());
    }

    /// 读满恰好 `n` 字节；截止前未读满时回推已读部分并返回空结果。
    pub async fn recvn(&mut self, n: usize, timeout: impl Into<Timeout>) -> Result<Bytes> {
        self.ensure_recv()?;
        let deadline = timeout.into().deadline(self.config.long_timeout);
        let mut acc = BytesMut::with_capacity(n);
        while acc.len() < n && self.recv_open() {
            let chunk = self.recv_by(n - acc.len(), deadline).await?;
            if chunk.is_empty() {
                if expired(deadline) {
                    break;
                }
                continue;
            }
            acc.extend_from_slice(&chunk);
        }
        if acc.len() == n {
            return Ok(acc.freeze());
        }
        self.shared.lock().buffer.unget(acc.freeze());
        Ok(Bytes::new())
    }

    /// [`recvn`](Self::recvn) 的字符串变体。
    pub async fn recvn_s(&mut self, n: usize, timeout: impl Into<Timeout>) -> Result<String> {
        let data = self.recvn(n, timeout).await?;
        Ok(self.decode(&data))
    }

    /// 等待源关闭并取走全部累积数据。
    ///
    /// 仅在 Tube 已被 [`close`](Self::close) 时失败；源已结束且缓冲为空时立即返回空结果。
    pub async fn recvall(&mut self) -> Result<Bytes> {
        if self.endpoint.is_destroyed() {
            return Err(TubeError::NotConnected {
                direction: Direction::Recv,
            });
        }
        loop {
            self.arm();
            if !self.shared.lock().source_open {
                break;
            }
            self.wait_event(TubeEvent::Closed, WaitLimit::Unbounded).await;
        }
        Ok(self.shared.lock().buffer.take_all())
    }

    /// [`recvall`](Self::recvall) 的字符串变体。
    pub async fn recvall_s(&mut self) -> Result<String> {
        let data = self.recvall().await?;
        Ok(self.decode(&data))
    }

    /// 读取直到任一分隔符出现，返回值包含分隔符本身。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 在调用开始时计算唯一的截止时间，后续每一步内部接收都共用它；
    /// 2. 每累积一段新数据，就对每个分隔符查找最早出现位置，取偏移最小者（偏移相同时取靠前的分隔符）；
    /// 3. 命中后在 `offset + delimiter.len()` 处精确切分，后半段回推缓冲区；
    /// 4. 截止或源关闭时按 [`Incomplete`] 策略结算。
    ///
    /// ## 契约（What）
    /// - `Return`：返回已累积的全部数据；
    /// - `Buffer`：回推全部数据，返回空结果；
    /// - `Throw`：回推全部数据，返回 [`TubeError::Timeout`]；
    /// - 分隔符集合为空或包含空分隔符时返回 [`TubeError::InvalidArgument`]。
    pub async fn recvuntil<D>(&mut self, delims: &[D], opts: RecvOptions) -> Result<Bytes>
    where
        D: AsRef<[u8]>,
    {
        let delims = delimiters(delims)?;
        self.ensure_recv()?;
        let deadline = opts.timeout.deadline(self.config.long_timeout);
        let incomplete = opts.incomplete.unwrap_or(self.config.incomplete);
        match self.scan_until(&delims, deadline).await? {
            Scan::Matched(front) => Ok(front),
            Scan::Incomplete(rest) => {
                self.settle(rest, incomplete, TubeError::timeout("recvuntil"))
            }
        }
    }

    /// [`recvuntil`](Self::recvuntil) 的字符串变体。
    pub async fn recvuntil_s<D>(&mut self, delims: &[D], opts: RecvOptions) -> Result<String>
    where
        D: AsRef<[u8]>,
    {
        let data = self.recvuntil(delims, opts).await?;
        Ok(self.decode(&data))
    }

    /// 读取一行，默认剥离行结束符。
    ///
    /// 未在截止前读到行结束符时按 [`Incomplete`] 结算，`Throw` 对应 [`TubeError::NoNewline`]。
    pub async fn recvline(&mut self, opts: RecvOptions) -> Result<Bytes> {
        self.ensure_recv()?;
        let ending = self.line_ending(&opts)?;
        let keep = opts.keep_ends.unwrap_or(self.config.keep_ends);
        let deadline = opts.timeout.deadline(self.config.long_timeout);
        let incomplete = opts.incomplete.unwrap_or(self.config.incomplete);
        match self.scan_until(&[&ending[..]], deadline).await? {
            Scan::Matched(line) => Ok(strip_ending(line, ending.len(), keep)),
            Scan::Incomplete(rest) => self.settle(rest, incomplete, TubeError::NoNewline),
        }
    }

    /// [`recvline`](Self::recvline) 的字符串变体。
    pub async fn recvline_s(&mut self, opts: RecvOptions) -> Result<String> {
        let data = self.recvline(opts).await?;
        Ok(self.decode(&data))
    }

    /// 逐行读取，直到 `pred` 接受某一行。
    ///
    /// `pred` 收到的行与最终返回值一致（按 `keep_ends` 处理行结束符），同时附带按配置编码解码的文本。
    /// 被拒绝的行连同行结束符累积为“已丢弃”数据；截止或源关闭时，这部分数据与未成行的尾部一起
    /// 按 [`Incomplete`] 结算，`Throw` 对应 [`TubeError::Timeout`]。
    pub async fn recvline_pred<P>(&mut self, mut pred: P, opts: RecvOptions) -> Result<Bytes>
    where
        P: FnMut(&[u8], &str) -> bool,
    {
        self.ensure_recv()?;
        let ending = self.line_ending(&opts)?;
        let keep = opts.keep_ends.unwrap_or(self.config.keep_ends);
        let deadline = opts.timeout.deadline(self.config.long_timeout);
        let incomplete = opts.incomplete.unwrap_or(self.config.incomplete);

        let mut scrapped = BytesMut::new();
        loop {
            match self.scan_until(&[&ending[..]], deadline).await? {
                Scan::Matched(line) => {
                    let candidate = strip_ending(line.clone(), ending.len(), keep);
                    let text = self.decode(&candidate);
                    if pred(&candidate[..], text.as_str()) {
                        return Ok(candidate);
                    }
                    scrapped.extend_from_slice(&line);
                }
                Scan::Incomplete(rest) => {
                    scrapped.extend_from_slice(&rest);
                    return self.settle(
                        scrapped.freeze(),
                        incomplete,
                        TubeError::timeout("recvline_pred"),
                    );
                }
            }
        }
    }

    /// [`recvline_pred`](Self::recvline_pred) 的字符串变体。
    pub async fn recvline_pred_s<P>(&mut self, pred: P, opts: RecvOptions) -> Result<String>
    where
        P: FnMut(&[u8], &str) -> bool,
    {
        let data = self.recvline_pred(pred, opts).await?;
        Ok(self.decode(&data))
    }

    /// 缓冲区已有数据时立即返回 `true`，否则在超时内等待数据到达。
    pub async fn can_recv(&mut self, timeout: impl Into<Timeout>) -> bool {
        self.arm();
        {
            let shared = self.shared.lock();
            if !shared.buffer.is_empty() {
                return true;
            }
            if !shared.source_open {
                return false;
            }
        }
        let deadline = timeout.into().deadline(self.config.no_timeout);
        self.wait_for_data(deadline).await;
        !self.shared.lock().buffer.is_empty()
    }

    /// 清空接收侧。
    ///
    /// 超时为零或不限时时立即取走当前缓冲；否则以该超时反复接收，直到某次接收为空或输入结束。
    pub async fn clean(&mut self, timeout: impl Into<Timeout>) -> Bytes {
        let timeout = timeout.into();
        if timeout == Timeout::Never || timeout.is_immediate(self.config.short_timeout) {
            return self.shared.lock().buffer.take_all();
        }

        let mut drained = BytesMut::new();
        while self.recv_open() {
            let deadline = timeout.deadline(self.config.short_timeout);
            match self.recv_by(self.config.chunk_size, deadline).await {
                Ok(chunk) if !chunk.is_empty() => drained.extend_from_slice(&chunk),
                _ => break,
            }
        }
        drained.freeze()
    }

    /// [`clean`](Self::clean) 的字符串变体。
    pub async fn clean_s(&mut self, timeout: impl Into<Timeout>) -> String {
        let data = self.clean(timeout).await;
        self.decode(&data)
    }

    /// 写入全部数据并刷新。
    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let sink = self.endpoint.sink.as_mut().ok_or(TubeError::NotConnected {
            direction: Direction::Send,
        })?;
        sink.write_all(data.as_ref()).await?;
        sink.flush().await?;
        Ok(())
    }

    /// 写入数据并追加行结束符。
    pub async fn sendline(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        let mut line = Vec::with_capacity(data.len() + self.config.line_ending.len());
        line.extend_from_slice(data);
        line.extend_from_slice(&self.config.line_ending);
        self.send(line).await
    }

    /// 先 `recvuntil(delim)` 再发送，返回接收到的数据。
    pub async fn sendafter(
        &mut self,
        delim: impl AsRef<[u8]>,
        data: impl AsRef<[u8]>,
        opts: RecvOptions,
    ) -> Result<Bytes> {
        let received = self.recvuntil(&[delim], opts).await?;
        self.send(data).await?;
        Ok(received)
    }

    /// 先 `recvuntil(delim)` 再发送一行，返回接收到的数据。
    pub async fn sendlineafter(
        &mut self,
        delim: impl AsRef<[u8]>,
        data: impl AsRef<[u8]>,
        opts: RecvOptions,
    ) -> Result<Bytes> {
        let received = self.recvuntil(&[delim], opts).await?;
        self.sendline(data).await?;
        Ok(received)
    }

    /// 关闭写入端（向对端传递 EOF），之后发送方向不再可用。
    pub async fn shutdown_send(&mut self) -> Result<()> {
        let Some(mut sink) = self.endpoint.sink.take() else {
            return Err(TubeError::NotConnected {
                direction: Direction::Send,
            });
        };
        sink.shutdown().await?;
        debug!("tube send side shut down");
        Ok(())
    }

    /// 拆除端点。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：拆除是尽力而为的，但状态迁移必须无条件完成，否则调用方无法判断后续操作是否安全；
    /// - **契约 (What)**：
    ///   - 先把持有的端点换成已拆除哨兵、停止泵任务并丢弃缓冲，再调用端点的拆除能力；
    ///   - 拆除能力失败时返回 [`TubeError::Destroy`]，Tube 依然处于已拆除状态；
    ///   - 对已拆除的 Tube 再次调用返回 [`TubeError::AlreadyDestroyed`]。
    pub async fn close(&mut self) -> Result<()> {
        let endpoint = mem::replace(&mut self.endpoint, Endpoint::destroyed());
        {
            let mut shared = self.shared.lock();
            shared.source_open = false;
            shared.buffer.clear();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if endpoint.is_destroyed() {
            return Err(TubeError::AlreadyDestroyed);
        }

        let Endpoint { sink, destroy, .. } = endpoint;
        drop(sink);
        match destroy {
            Some(mut destroy) => {
                debug!("destroying tube endpoint");
                destroy.destroy().await.map_err(|err| {
                    warn!(error = %err, "tube endpoint destroy failed");
                    TubeError::Destroy(err)
                })
            }
            None => Ok(()),
        }
    }

    fn decode(&self, data: &[u8]) -> String {
        self.config.encoding.decode(data)
    }

    fn recv_open(&self) -> bool {
        let shared = self.shared.lock();
        shared.source_open || !shared.buffer.is_empty()
    }

    fn ensure_recv(&self) -> Result<()> {
        if self.recv_open() {
            Ok(())
        } else {
            Err(TubeError::NotConnected {
                direction: Direction::Recv,
            })
        }
    }

    fn line_ending(&self, opts: &RecvOptions) -> Result<Bytes> {
        let ending = match &opts.line_ending {
            Some(ending) => ending.clone(),
            None => Bytes::from(self.config.line_ending.clone()),
        };
        if ending.is_empty() {
            return Err(TubeError::InvalidArgument("line ending must not be empty"));
        }
        Ok(ending)
    }

    /// 把当前通知序号标记为已读；之后到达的任何变更都会唤醒等待。
    fn arm(&mut self) {
        let _ = self.events.borrow_and_update();
    }

    async fn wait_event(&mut self, event: TubeEvent, limit: WaitLimit) -> bool {
        let listener = next_event(&mut self.events, &self.shared, event);
        let fired = matches!(
            wait_for(listener, limit, Expiry::Resolve).await,
            Ok(Some(()))
        );
        trace!(?event, fired, "tube wait settled");
        fired
    }

    async fn recv_by(&mut self, max: usize, deadline: Option<Instant>) -> Result<Bytes> {
        self.ensure_recv()?;
        self.arm();
        let idle = {
            let shared = self.shared.lock();
            shared.buffer.is_empty() && shared.source_open
        };
        if idle {
            self.wait_for_data(deadline).await;
        }
        Ok(self.shared.lock().buffer.take(max))
    }

    /// 等到缓冲区非空、源关闭或截止；已被先前调用消费掉的数据所留下的通知不算数。
    async fn wait_for_data(&mut self, deadline: Option<Instant>) {
        loop {
            if !self
                .wait_event(TubeEvent::Changed, WaitLimit::deadline(deadline))
                .await
            {
                return;
            }
            self.arm();
            let shared = self.shared.lock();
            if !shared.buffer.is_empty() || !shared.source_open {
                return;
            }
        }
    }

    async fn scan_until(&mut self, delims: &[&[u8]], deadline: Option<Instant>) -> Result<Scan> {
        let overlap = delims.iter().map(|d| d.len()).max().unwrap_or(1) - 1;
        let mut acc = BytesMut::new();
        let mut from = 0;
        loop {
            if let Some((offset, len)) = earliest_match(&acc, delims, from) {
                let front = acc.split_to(offset + len).freeze();
                self.shared.lock().buffer.unget(acc.freeze());
                return Ok(Scan::Matched(front));
            }
            from = acc.len().saturating_sub(overlap);

            if !self.recv_open() {
                break;
            }
            let chunk = self.recv_by(self.config.chunk_size, deadline).await?;
            if chunk.is_empty() {
                if expired(deadline) {
                    break;
                }
                continue;
            }
            acc.extend_from_slice(&chunk);
        }
        Ok(Scan::Incomplete(acc.freeze()))
    }

    fn settle(&mut self, rest: Bytes, incomplete: Incomplete, err: TubeError) -> Result<Bytes> {
        match incomplete {
            Incomplete::Return => Ok(rest),
            Incomplete::Buffer => {
                self.shared.lock().buffer.unget(rest);
                Ok(Bytes::new())
            }
            Incomplete::Throw => {
                self.shared.lock().buffer.unget(rest);
                Err(err)
            }
        }
    }
}

impl Drop for Tube {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for Tube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tube")
            .field("endpoint", &self.endpoint)
            .field("buffered", &self.buffered())
            .field("recv_open", &self.recv_open())
            .finish()
    }
}

/// 泵任务退出（正常结束、出错、被中止或 panic）时标记源关闭并发出最后一次通知。
struct Retire {
    shared: Arc<Mutex<Shared>>,
    notifier: watch::Sender<u64>,
}

impl Drop for Retire {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        shared.source_open = false;
        bump(&self.notifier);
    }
}

/// 递增通知序号；调用方持有共享状态锁，保证通知与其对应的状态变更对等待方同时可见。
fn bump(notifier: &watch::Sender<u64>) {
    notifier.send_modify(|seq| *seq = seq.wrapping_add(1));
}

async fn pump(mut source: ChunkSource, shared: Arc<Mutex<Shared>>, notifier: watch::Sender<u64>) {
    let retire = Retire { shared, notifier };
    debug!("tube source pump started");
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) if chunk.is_empty() => continue,
            Ok(chunk) => {
                trace!(len = chunk.len(), "tube chunk received");
                {
                    let mut shared = retire.shared.lock();
                    if !shared.source_open {
                        // close() 已经接管状态。
                        return;
                    }
                    shared.buffer.push(chunk);
                    bump(&retire.notifier);
                }
            }
            Err(err) => {
                warn!(error = %err, "tube source failed, treating as closed");
                break;
            }
        }
    }
    debug!("tube source closed");
}

async fn next_event(events: &mut watch::Receiver<u64>, shared: &Mutex<Shared>, event: TubeEvent) {
    loop {
        if events.changed().await.is_err() {
            // 泵已退出，不会再有通知。
            return;
        }
        match event {
            TubeEvent::Changed => return,
            TubeEvent::Closed => {
                if !shared.lock().source_open {
                    return;
                }
            }
        }
    }
}

fn delimiters<D: AsRef<[u8]>>(delims: &[D]) -> Result<Vec<&[u8]>> {
    if delims.is_empty() {
        return Err(TubeError::InvalidArgument("at least one delimiter is required"));
    }
    let delims: Vec<&[u8]> = delims.iter().map(AsRef::as_ref).collect();
    if delims.iter().any(|d| d.is_empty()) {
        return Err(TubeError::InvalidArgument("delimiters must not be empty"));
    }
    Ok(delims)
}

/// 在 `haystack[from..]` 中查找最早出现的分隔符，返回 `(偏移, 分隔符长度)`。
fn earliest_match(haystack: &[u8], delims: &[&[u8]], from: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for delim in delims {
        let Some(window) = haystack.get(from..) else {
            continue;
        };
        if let Some(pos) = window.windows(delim.len()).position(|w| w == *delim) {
            let offset = from + pos;
            if best.is_none_or(|(current, _)| offset < current) {
                best = Some((offset, delim.len()));
            }
        }
    }
    best
}

fn strip_ending(line: Bytes, ending_len: usize, keep: bool) -> Bytes {
    if keep {
        line
    } else {
        line.slice(..line.len().saturating_sub(ending_len))
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}
