//! Tube 默认参数的显式配置载体。
//!
//! # 设计动机（Why）
//! - 进程级共享的可变默认值会让测试之间互相污染，这里改为每个 Tube 持有一份 [`TubeConfig`]；
//! - 调用方可以在构造时整体替换，也可以通过 [`crate::RecvOptions`] 在单次调用上覆盖。
//!
//! # 契约说明（What）
//! - 缺省值：块大小 4096 字节、长超时 15 秒、短超时 50 毫秒、无超时 0、UTF-8 解码、
//!   `Incomplete::Return`、行结束符 `"\n"`、默认剥离行结束符；
//! - [`TubeConfig::from_toml_str`] 只覆盖文档中出现的键，超时以秒（允许小数）书写。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 未找到分隔符时的处置策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Incomplete {
    /// 返回已累积的全部数据（不含分隔符），缓冲区保持为空。
    #[default]
    Return,
    /// 把已累积数据回推缓冲区，返回空结果。
    Buffer,
    /// 把已累积数据回推缓冲区，并返回超时错误。
    Throw,
}

/// 字符串变体使用的文本解码方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8，非法序列替换为 U+FFFD。
    #[default]
    #[serde(alias = "utf-8")]
    Utf8,
    /// 每个字节映射为同码位字符。
    #[serde(alias = "binary")]
    Latin1,
    /// 小写十六进制文本。
    Hex,
}

impl TextEncoding {
    /// 按当前编码把字节解码为字符串，过程不会失败。
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&byte| char::from(byte)).collect(),
            TextEncoding::Hex => hex::encode(bytes),
        }
    }
}

/// Tube 的默认参数集合。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TubeConfig {
    /// 单次内部读取的最大字节数。
    pub chunk_size: usize,
    /// `recv`/`recvuntil`/`recvline` 家族的默认超时。
    #[serde(with = "secs")]
    pub long_timeout: Duration,
    /// `clean` 的默认超时。
    #[serde(with = "secs")]
    pub short_timeout: Duration,
    /// `can_recv` 的默认超时。
    #[serde(with = "secs")]
    pub no_timeout: Duration,
    /// 字符串变体的解码方式。
    pub encoding: TextEncoding,
    /// 未找到分隔符时的默认处置。
    pub incomplete: Incomplete,
    /// 行结束符。
    #[serde(with = "line_ending")]
    pub line_ending: Vec<u8>,
    /// `recvline` 是否默认保留行结束符。
    pub keep_ends: bool,
}

impl Default for TubeConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            long_timeout: Duration::from_secs(15),
            short_timeout: Duration::from_millis(50),
            no_timeout: Duration::ZERO,
            encoding: TextEncoding::Utf8,
            incomplete: Incomplete::Return,
            line_ending: b"\n".to_vec(),
            keep_ends: false,
        }
    }
}

impl TubeConfig {
    /// 解析 TOML 文档并在默认值之上覆盖。
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let config: TubeConfig = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive"));
        }
        if self.line_ending.is_empty() {
            return Err(ConfigError::Invalid("line_ending must not be empty"));
        }
        Ok(())
    }
}

/// 配置解析错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse tube configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid tube configuration: {0}")]
    Invalid(&'static str),
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod line_ending {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TubeConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.long_timeout, Duration::from_secs(15));
        assert_eq!(config.short_timeout, Duration::from_millis(50));
        assert_eq!(config.no_timeout, Duration::ZERO);
        assert_eq!(config.incomplete, Incomplete::Return);
        assert_eq!(config.line_ending, b"\n");
        assert!(!config.keep_ends);
    }

    #[test]
    fn toml_overrides_only_present_keys() {
        let config = TubeConfig::from_toml_str(
            r#"
            long_timeout = 2.5
            incomplete = "throw"
            encoding = "latin1"
            line_ending = "\r\n"
            "#,
        )
        .expect("valid document");
        assert_eq!(config.long_timeout, Duration::from_millis(2500));
        assert_eq!(config.incomplete, Incomplete::Throw);
        assert_eq!(config.encoding, TextEncoding::Latin1);
        assert_eq!(config.line_ending, b"\r\n");
        assert_eq!(config.chunk_size, 4096);
    }

    #[test]
    fn toml_rejects_invalid_values() {
        assert!(matches!(
            TubeConfig::from_toml_str("chunk_size = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TubeConfig::from_toml_str("short_timeout = -1.0"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            TubeConfig::from_toml_str("bogus = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn encodings_decode_without_failing() {
        let raw = [0x68, 0x69, 0xff];
        assert_eq!(TextEncoding::Utf8.decode(&raw), "hi\u{fffd}");
        assert_eq!(TextEncoding::Latin1.decode(&raw), "hi\u{ff}");
        assert_eq!(TextEncoding::Hex.decode(&raw), "6869ff");
    }
}
