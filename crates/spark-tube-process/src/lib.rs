#![doc = r#"
# spark-tube-process

## 设计动机（Why）
- **定位**：把 Tokio 子进程包装为 [`spark_tube::Endpoint`]，使脚本可以像操作套接字一样与命令行程序交互；
- **架构角色**：位于 `spark-tube` 之上的适配层，只负责“管道 → 能力”的映射，不参与缓冲与等待。

## 核心契约（What）
- 可读源：标准输出与标准错误合并为一个数据块流，两者都结束后源才关闭；
- 可写端：标准输入；
- 拆除能力：向子进程发送终止信号并回收退出状态；
- [`spawn`] 以管道方式接管全部标准流，并开启 `kill_on_drop`，Tube 丢弃时子进程不会遗留。

## 风险与考量（Trade-offs）
- 标准输出与标准错误的交错顺序取决于调度，无法还原子进程内部的写入顺序；
- 子进程若忽略关闭的标准输入持续运行，只能依赖 `close` 的终止信号回收。
"#]
#![deny(unsafe_code)]

use std::{io, process::Stdio};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use spark_tube::{Destroy, Endpoint, Tube, TubeConfig, read_chunks};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::debug;

/// 子进程适配的错误。
#[derive(Debug, Error)]
pub enum ProcessError {
    /// 启动子进程失败。
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// 子进程没有以管道方式提供标准输出，无法构成可读源。
    #[error("child process stdout is not piped")]
    MissingStdout,
}

impl ProcessError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "tube.process.spawn",
            Self::MissingStdout => "tube.process.missing_stdout",
        }
    }
}

/// 以终止子进程实现的拆除能力。
#[derive(Debug)]
pub struct ChildKiller {
    child: Child,
    pid: Option<u32>,
}

#[async_trait]
impl Destroy for ChildKiller {
    async fn destroy(&mut self) -> io::Result<()> {
        debug!(pid = ?self.pid, "killing tube child process");
        // 已退出的子进程同样返回成功。
        self.child.kill().await
    }
}

/// 由已启动的子进程构造端点，接管其标准流。
///
/// 标准输出必须是管道；标准错误与标准输入缺失时对应能力留空。
pub fn endpoint_from_child(mut child: Child, chunk_size: usize) -> Result<Endpoint, ProcessError> {
    let stdout = child.stdout.take().ok_or(ProcessError::MissingStdout)?;
    let source = match child.stderr.take() {
        Some(stderr) => {
            stream::select(read_chunks(stdout, chunk_size), read_chunks(stderr, chunk_size))
                .boxed()
        }
        None => read_chunks(stdout, chunk_size),
    };

    let mut endpoint = Endpoint::new().with_source(source);
    if let Some(stdin) = child.stdin.take() {
        endpoint = endpoint.with_sink(stdin);
    }
    let pid = child.id();
    Ok(endpoint.with_destroy(ChildKiller { child, pid }))
}

/// 以管道方式启动命令并返回端点。
pub fn spawn(command: &mut Command, chunk_size: usize) -> Result<Endpoint, ProcessError> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: command.as_std().get_program().to_string_lossy().into_owned(),
        source,
    })?;
    debug!(pid = ?child.id(), "spawned tube child process");
    endpoint_from_child(child, chunk_size)
}

/// 启动命令并直接包装为 [`Tube`]，分块大小取自配置。
pub fn spawn_tube(command: &mut Command, config: TubeConfig) -> Result<Tube, ProcessError> {
    let endpoint = spawn(command, config.chunk_size)?;
    Ok(Tube::with_config(endpoint, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_without_piped_stdout_is_rejected() {
        let child = Command::new("true").stdout(Stdio::null()).spawn();
        let Ok(child) = child else {
            // 环境中没有 `true` 时跳过。
            return;
        };
        let err = endpoint_from_child(child, 64).expect_err("stdout not piped");
        assert_eq!(err.code(), "tube.process.missing_stdout");
    }

    #[test]
    fn spawn_failure_names_the_program() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let _guard = runtime.enter();
        let err = spawn(&mut Command::new("spark-tube-no-such-program"), 64)
            .expect_err("missing program");
        assert!(matches!(
            &err,
            ProcessError::Spawn { program, .. } if program == "spark-tube-no-such-program"
        ));
        assert_eq!(err.code(), "tube.process.spawn");
    }
}
