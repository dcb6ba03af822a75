use std::{fmt, str::FromStr};

use crate::error::TubeError;

/// `Tube::connected` 查询的方向。
///
/// - `Recv`：仍可接收（源未结束或缓冲区非空）；
/// - `Send`：仍可发送；
/// - `Any`：两者之一；
/// - `All`：两者同时满足。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Recv,
    Send,
    Any,
    All,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Recv => "recv",
            Direction::Send => "send",
            Direction::Any => "any",
            Direction::All => "all",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = TubeError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "recv" | "in" | "input" | "read" => Ok(Direction::Recv),
            "send" | "out" | "output" | "write" => Ok(Direction::Send),
            "any" | "either" => Ok(Direction::Any),
            "all" | "both" => Ok(Direction::All),
            other => Err(TubeError::InvalidDirection(other.to_owned())),
        }
    }
}
