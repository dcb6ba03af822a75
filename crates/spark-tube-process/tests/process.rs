//! 子进程端点的端到端测试，依赖 POSIX `sh` 与 `cat`。
#![cfg(unix)]

use std::time::Duration;

use spark_tube::{Direction, RecvOptions, TubeConfig};
use spark_tube_process::spawn_tube;
use tokio::process::Command;

fn shell(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

/// 标准输出与标准错误合并为同一个可读源，两者都结束后 `recvall` 返回。
#[tokio::test]
async fn stdout_and_stderr_are_merged() {
    let mut tube = spawn_tube(&mut shell("printf out; printf err >&2"), TubeConfig::default())
        .expect("spawn sh");

    let all = tube.recvall_s().await.expect("recvall");
    assert_eq!(all.len(), 6);
    assert!(all.contains("out") && all.contains("err"));
    assert!(!tube.connected(Direction::Recv));
}

#[tokio::test]
async fn cat_echoes_lines_back() {
    let mut tube = spawn_tube(&mut Command::new("cat"), TubeConfig::default()).expect("spawn cat");

    tube.sendline("ping").await.expect("send");
    let line = tube
        .recvline_s(RecvOptions::new().timeout(Duration::from_secs(5)))
        .await
        .expect("echo");
    assert_eq!(line, "ping");

    tube.shutdown_send().await.expect("close stdin");
    assert!(tube.recvall().await.expect("eof").is_empty());
    tube.close().await.expect("kill after exit still succeeds");
}

/// `close` 终止仍在运行的子进程并使所有方向失效。
#[tokio::test]
async fn close_kills_running_child() {
    let mut tube = spawn_tube(&mut shell("echo ready; exec sleep 30"), TubeConfig::default())
        .expect("spawn sh");
    let ready = tube
        .recvline_s(RecvOptions::new().timeout(Duration::from_secs(5)))
        .await
        .expect("ready line");
    assert_eq!(ready, "ready");
    assert!(tube.connected(Direction::All));

    tokio::time::timeout(Duration::from_secs(5), tube.close())
        .await
        .expect("kill completes promptly")
        .expect("kill succeeds");
    assert!(!tube.connected(Direction::Any));
}
