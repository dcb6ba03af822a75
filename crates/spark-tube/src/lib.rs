#![doc = r#"
# spark-tube

## 设计动机（Why）
- **定位**：为脚本化驱动外部程序（子进程、套接字、任意字节流）提供带缓冲的交互式收发通道：
  按字节数、按分隔符、按行取数，并为每次等待设置截止时间；
- **架构角色**：本 crate 只关心“端点能力 + 缓冲 + 等待”三件事，具体端点由适配器提供，
  子进程适配见 `spark-tube-process`；
- **设计理念**：所有阻塞都经过统一的等待原语，超时默认不是错误，未消费的数据永不丢失。

## 核心契约（What）
- **输入条件**：[`Tube`] 必须在 Tokio 运行时中构造，端点以 [`Endpoint`] 的可选能力描述；
- **输出保障**：
  - 接收类操作返回 `bytes::Bytes`，`_s` 后缀变体按 [`TextEncoding`] 解码为字符串；
  - 超时、未匹配或抛错时，已累积的数据按 [`Incomplete`] 策略交还调用方或回推缓冲；
  - 错误统一为 [`TubeError`]，附带 [`codes`] 中的稳定错误码；
- **前置约束**：同一 Tube 的操作以 `&mut self` 串行执行。

## 实现策略（How）
- **数据泵**：后台任务把端点的数据块追加到共享缓冲，并通过 `tokio::sync::watch` 递增序号广播变更；
- **等待原语**：[`wait_for`] 基于 `tokio::select!` 的 `biased` 竞速，事件优先于截止时间；
- **截止时间**：每次调用只计算一次截止点，内部多步接收共享它，总等待时长有界。

## 风险与考量（Trade-offs）
- **内存**：`recvall` 与未匹配的 `recvuntil` 会把数据全部留在内存中；
- **编码**：`Utf8` 解码是有损的，需要精确字节时请使用二进制接口。
"#]
#![deny(unsafe_code)]

mod buffer;
pub mod config;
mod direction;
pub mod endpoint;
pub mod error;
mod options;
mod tube;
pub mod wait;

pub use config::{ConfigError, Incomplete, TextEncoding, TubeConfig};
pub use direction::Direction;
pub use endpoint::{ChunkSink, ChunkSource, Destroy, DestroyFn, Endpoint, read_chunks};
pub use error::{Result, TubeError, codes};
pub use options::{RecvOptions, Timeout};
pub use tube::{Tube, TubeEvent};
pub use wait::{Expiry, WaitLimit, sleep_unless, wait_for};
