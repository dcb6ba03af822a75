//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为 Tube 的接收、发送与拆除路径提供集中定义的错误域，调用方可以按“状态错误 / 超时 / 拆除失败 / IO”
//!   四类执行不同的补救策略；
//! - 每个变体都附带稳定错误码（见 [`codes`]），便于日志与告警按码值聚合，而不是解析自然语言文案。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`，与 `std::error::Error` 生态兼容；
//! - 超时在 `recv` 上不是错误，只有调用方显式选择 [`Incomplete::Throw`](crate::Incomplete::Throw)
//!   时才会升级为 [`TubeError::Timeout`]。

use std::io;

use thiserror::Error;

use crate::Direction;

/// Tube 错误码常量，命名遵循 `tube.<语义>`。
pub mod codes {
    /// 对应方向的能力已经不可用。
    pub const NOT_CONNECTED: &str = "tube.not_connected";
    /// 端点已被拆除，禁止再次拆除。
    pub const ALREADY_DESTROYED: &str = "tube.already_destroyed";
    /// 无法识别的方向标记。
    pub const INVALID_DIRECTION: &str = "tube.invalid_direction";
    /// 调用参数不满足前置条件。
    pub const INVALID_ARGUMENT: &str = "tube.invalid_argument";
    /// 在截止时间前未完成匹配。
    pub const TIMEOUT: &str = "tube.timeout";
    /// 截止时间前未读到行结束符。
    pub const NO_NEWLINE: &str = "tube.no_newline";
    /// 端点拆除动作自身失败。
    pub const DESTROY_FAILED: &str = "tube.destroy_failed";
    /// 底层读写失败。
    pub const IO: &str = "tube.io";
}

/// Tube 操作的统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：把“调用时机不对”（状态错误）与“等待没有结果”（超时）区分开，前者意味着调用方
///   逻辑有误，后者通常可以重试或降级；
/// - **契约 (What)**：
///   - 状态错误：[`NotConnected`](Self::NotConnected)、[`AlreadyDestroyed`](Self::AlreadyDestroyed)、
///     [`InvalidDirection`](Self::InvalidDirection)、[`InvalidArgument`](Self::InvalidArgument)；
///   - 超时：[`Timeout`](Self::Timeout)、[`NoNewline`](Self::NoNewline)，出现时未消费的数据已回推缓冲；
///   - 拆除失败：[`Destroy`](Self::Destroy)，Tube 状态仍然转为已拆除；
///   - IO：[`Io`](Self::Io)，来自写入端；
/// - **设计权衡 (Trade-offs)**：`Timeout` 仅携带静态操作名，不复制已读数据，数据统一留在缓冲区里。
#[derive(Debug, Error)]
pub enum TubeError {
    /// 指定方向的能力不可用（输入已耗尽或端点已拆除、没有写入端等）。
    #[error("tube is not connected for {direction}")]
    NotConnected { direction: Direction },

    /// 端点已处于拆除状态，不能再次拆除。
    #[error("cannot re-destroy an already destroyed endpoint")]
    AlreadyDestroyed,

    /// 方向标记无法识别。
    #[error("unrecognized direction `{0}`")]
    InvalidDirection(String),

    /// 调用参数不合法，例如空的分隔符集合。
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// 截止时间先于期望事件到达。
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// `recvline` 在截止时间或输入结束前没有读到行结束符。
    #[error("no newline found before the deadline")]
    NoNewline,

    /// 端点的拆除动作失败。
    #[error("endpoint destroy failed: {0}")]
    Destroy(#[source] io::Error),

    /// 写入端的 IO 失败。
    #[error("tube io failure: {0}")]
    Io(#[from] io::Error),
}

impl TubeError {
    pub(crate) fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } => codes::NOT_CONNECTED,
            Self::AlreadyDestroyed => codes::ALREADY_DESTROYED,
            Self::InvalidDirection(_) => codes::INVALID_DIRECTION,
            Self::InvalidArgument(_) => codes::INVALID_ARGUMENT,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::NoNewline => codes::NO_NEWLINE,
            Self::Destroy(_) => codes::DESTROY_FAILED,
            Self::Io(_) => codes::IO,
        }
    }

    /// 是否属于等待未果类错误。
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::NoNewline)
    }

    /// 是否属于调用时机或参数错误。
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. }
                | Self::AlreadyDestroyed
                | Self::InvalidDirection(_)
                | Self::InvalidArgument(_)
        )
    }
}

/// Tube 内部统一返回别名。
pub type Result<T, E = TubeError> = std::result::Result<T, E>;
