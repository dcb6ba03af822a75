//! 等待原语：在“期望事件”“截止时间”“外部取消信号”之间竞速。
//!
//! # 教案式说明
//!
//! ## 意图 (Why)
//! - Tube 的所有阻塞操作只在这里挂起，集中处理竞速与败者清理，避免各处自行拼装 `select!`；
//! - 外部可以用任意 Future 代替时长作为限制条件，实现协作式取消。
//!
//! ## 逻辑 (How)
//! - 使用 `tokio::select!` 的 `biased` 模式，事件分支排在首位：同一次轮询中事件与截止同时就绪时
//!   以事件为准，不会静默丢弃已经到达的事件；
//! - 任一分支胜出后，另一分支的 Future 随 `select!` 结束被 drop，定时器随之注销、监听随之解除，
//!   之后才处理结果，因此不会出现二次结算。
//!
//! ## 契约 (What)
//! - [`wait_for`]：事件先到返回 `Ok(Some(output))`；限制先到时按 [`Expiry`] 返回 `Ok(None)` 或
//!   [`TubeError::Timeout`]；
//! - [`sleep_unless`]：纯时长等待，可被外部 Future 抢占，返回定时器是否真正触发。

use std::{future::Future, time::Duration};

use futures::future::BoxFuture;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::trace;

use crate::error::{Result, TubeError};

/// 等待的限制条件。
pub enum WaitLimit {
    /// 不设限制。
    Unbounded,
    /// 自调用起等待给定时长。
    After(Duration),
    /// 等到绝对时间点。
    Until(Instant),
    /// 外部取消信号，完成即视为到限。
    Signal(BoxFuture<'static, ()>),
}

impl WaitLimit {
    /// 由可选截止点构造限制，`None` 表示不限时。
    pub fn deadline(deadline: Option<Instant>) -> Self {
        match deadline {
            Some(at) => WaitLimit::Until(at),
            None => WaitLimit::Unbounded,
        }
    }
}

impl std::fmt::Debug for WaitLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitLimit::Unbounded => f.write_str("Unbounded"),
            WaitLimit::After(duration) => f.debug_tuple("After").field(duration).finish(),
            WaitLimit::Until(at) => f.debug_tuple("Until").field(at).finish(),
            WaitLimit::Signal(_) => f.write_str("Signal(..)"),
        }
    }
}

/// 限制先到时的结算方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    /// 以 `Ok(None)` 结束。
    Resolve,
    /// 以 [`TubeError::Timeout`] 结束。
    Reject,
}

/// 等待 `event` 完成，或在 `limit` 到达时按 `expiry` 结算。
pub async fn wait_for<F>(event: F, limit: WaitLimit, expiry: Expiry) -> Result<Option<F::Output>>
where
    F: Future,
{
    // `race` 返回时事件与限制两侧的 Future 都已被 drop。
    let outcome = match limit {
        WaitLimit::Unbounded => Some(event.await),
        WaitLimit::After(duration) => race(event, sleep(duration)).await,
        WaitLimit::Until(at) => race(event, sleep_until(at)).await,
        WaitLimit::Signal(signal) => race(event, signal).await,
    };

    match outcome {
        Some(output) => Ok(Some(output)),
        None => {
            trace!(?expiry, "wait limit reached before event");
            match expiry {
                Expiry::Resolve => Ok(None),
                Expiry::Reject => Err(TubeError::timeout("wait")),
            }
        }
    }
}

/// 等待 `duration`，期间若 `preempt` 先完成则提前返回。
///
/// 返回 `true` 表示定时器触发，`false` 表示被抢占。
pub async fn sleep_unless<P>(duration: Duration, preempt: Option<P>) -> bool
where
    P: Future,
{
    let timer = sleep(duration);
    match preempt {
        None => {
            timer.await;
            true
        }
        Some(preempt) => {
            tokio::pin!(timer);
            tokio::pin!(preempt);
            tokio::select! {
                biased;
                () = &mut timer => true,
                _ = &mut preempt => false,
            }
        }
    }
}

async fn race<E, L>(event: E, limit: L) -> Option<E::Output>
where
    E: Future,
    L: Future<Output = ()>,
{
    tokio::select! {
        biased;
        output = event => Some(output),
        () = limit => None,
    }
}
