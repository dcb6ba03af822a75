//! 性质测试：无论接收操作如何组合、以何种未完成策略结算，
//! 返回给调用方的数据加上最终 `recvall` 的结果必须恰好等于源产出的全部字节。

use std::{io, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, channel::mpsc::unbounded};
use proptest::prelude::*;
use spark_tube::{Endpoint, Incomplete, RecvOptions, Timeout, Tube, TubeError};

#[derive(Clone, Debug)]
enum Op {
    Recv(usize),
    RecvN(usize),
    Until(Vec<u8>, Incomplete),
    Line(Incomplete),
    Unrecv(Vec<u8>),
    Clean,
}

fn incomplete() -> impl Strategy<Value = Incomplete> {
    prop_oneof![
        Just(Incomplete::Return),
        Just(Incomplete::Buffer),
        Just(Incomplete::Throw),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..16).prop_map(Op::Recv),
        (1usize..16).prop_map(Op::RecvN),
        (prop::collection::vec(b'a'..=b'c', 1..3), incomplete())
            .prop_map(|(delim, policy)| Op::Until(delim, policy)),
        incomplete().prop_map(Op::Line),
        prop::collection::vec(b'a'..=b'c', 1..4).prop_map(Op::Unrecv),
        Just(Op::Clean),
    ]
}

fn chunks() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(
        prop::collection::vec(prop_oneof![Just(b'\n'), b'a'..=b'd'], 0..12),
        0..8,
    )
}

async fn drive(chunks: Vec<Vec<u8>>, ops: Vec<Op>) -> (Vec<u8>, Vec<u8>) {
    let (tx, rx) = unbounded::<io::Result<Bytes>>();
    let mut tube = Tube::new(Endpoint::new().with_source(rx.boxed()));

    let mut expected = Vec::new();
    for chunk in chunks {
        expected.extend_from_slice(&chunk);
        tx.unbounded_send(Ok(Bytes::from(chunk)))
            .expect("pump alive");
    }
    drop(tx);

    let timeout = Timeout::After(Duration::from_millis(1));
    let mut observed = BytesMut::new();
    for op in ops {
        let got = match op {
            Op::Recv(max) => tube.recv(max, timeout).await,
            Op::RecvN(n) => tube.recvn(n, timeout).await,
            Op::Until(delim, policy) => {
                let opts = RecvOptions::new().timeout(timeout).incomplete(policy);
                tube.recvuntil(&[delim], opts).await
            }
            Op::Line(policy) => {
                let opts = RecvOptions::new()
                    .timeout(timeout)
                    .incomplete(policy)
                    .keep_ends(true);
                tube.recvline(opts).await
            }
            Op::Unrecv(data) => {
                // 回推的数据紧接在已读部分之后。
                let at = observed.len();
                expected.splice(at..at, data.iter().copied());
                tube.unrecv(data);
                continue;
            }
            Op::Clean => Ok(tube.clean(timeout).await),
        };
        match got {
            Ok(data) => observed.extend_from_slice(&data),
            Err(TubeError::NotConnected { .. }) => {}
            Err(err) => assert!(err.is_timeout(), "unexpected error: {err}"),
        }
    }
    observed.extend_from_slice(&tube.recvall().await.expect("tube never closed"));
    (expected, observed.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn received_bytes_equal_produced_bytes(
        chunks in chunks(),
        ops in prop::collection::vec(op(), 0..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("runtime");
        let (expected, observed) = runtime.block_on(drive(chunks, ops));
        prop_assert_eq!(observed, expected);
    }
}
