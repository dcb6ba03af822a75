use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::config::Incomplete;

/// 单次调用的超时参数。
///
/// # 教案式说明
/// - **意图 (Why)**：把“使用该操作类别的默认值”“永不超时”“给定时长”三种语义放进同一类型，
///   避免以负数或魔法值编码；
/// - **契约 (What)**：
///   - `Default`：按操作类别取 [`TubeConfig`](crate::TubeConfig) 中的长/短/无超时；
///   - `Never`：无限等待；
///   - `After(d)`：自调用开始起最多等待 `d`；
/// - **兼容 (How)**：`From<f64>` 以秒为单位，负数映射为 `Never`，非有限值同样视为 `Never`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Timeout {
    #[default]
    Default,
    Never,
    After(Duration),
}

impl Timeout {
    /// 以秒构造超时，负数表示不限时。
    pub fn secs(secs: f64) -> Self {
        Self::from(secs)
    }

    /// 结合类别默认值计算本次调用的截止时间点，`None` 表示不限时。
    pub(crate) fn deadline(self, class_default: Duration) -> Option<Instant> {
        let now = Instant::now();
        match self {
            Timeout::Default => now.checked_add(class_default),
            Timeout::Never => None,
            Timeout::After(duration) => now.checked_add(duration),
        }
    }

    /// 是否为立即返回（零时长）的超时。
    pub(crate) fn is_immediate(self, class_default: Duration) -> bool {
        match self {
            Timeout::Default => class_default.is_zero(),
            Timeout::Never => false,
            Timeout::After(duration) => duration.is_zero(),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Timeout::After(value)
    }
}

impl From<f64> for Timeout {
    fn from(secs: f64) -> Self {
        if secs.is_sign_negative() || !secs.is_finite() {
            return Timeout::Never;
        }
        Duration::try_from_secs_f64(secs).map_or(Timeout::Never, Timeout::After)
    }
}

/// `recvuntil`/`recvline` 家族的单次调用参数，未设置的字段沿用 Tube 配置。
///
/// ```
/// use spark_tube::{Incomplete, RecvOptions};
/// use std::time::Duration;
///
/// let opts = RecvOptions::new()
///     .timeout(Duration::from_millis(200))
///     .incomplete(Incomplete::Throw)
///     .keep_ends(true);
/// assert_eq!(opts.incomplete, Some(Incomplete::Throw));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecvOptions {
    pub timeout: Timeout,
    pub incomplete: Option<Incomplete>,
    pub keep_ends: Option<bool>,
    pub line_ending: Option<Bytes>,
}

impl RecvOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn incomplete(mut self, incomplete: Incomplete) -> Self {
        self.incomplete = Some(incomplete);
        self
    }

    pub fn keep_ends(mut self, keep: bool) -> Self {
        self.keep_ends = Some(keep);
        self
    }

    pub fn line_ending(mut self, ending: impl Into<Bytes>) -> Self {
        self.line_ending = Some(ending.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_seconds_mean_never() {
        assert_eq!(Timeout::from(-1.0), Timeout::Never);
        assert_eq!(Timeout::from(f64::NAN), Timeout::Never);
        assert_eq!(
            Timeout::secs(0.25),
            Timeout::After(Duration::from_millis(250))
        );
    }

    #[test]
    fn immediate_detection_uses_class_default() {
        assert!(Timeout::Default.is_immediate(Duration::ZERO));
        assert!(!Timeout::Default.is_immediate(Duration::from_secs(1)));
        assert!(Timeout::After(Duration::ZERO).is_immediate(Duration::from_secs(1)));
        assert!(!Timeout::Never.is_immediate(Duration::ZERO));
    }
}
