//! RPC round trips against a scripted broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arrow_array::{Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use common::{ack_all, anonymous, response, FakeBroker};
use rembus::{Arg, Frame, RembusError, Status, Table, Value};

fn sample_table() -> Table {
    let schema = Arc::new(Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("price", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["apple", "pear"])),
            Arc::new(Float64Array::from(vec![1.5, 2.25])),
        ],
    )
    .unwrap();
    Table::new(batch)
}

/// Replies to `add` with the sum of its two integer arguments.
fn adder(frame: &Frame) -> Vec<Frame> {
    match frame {
        Frame::Rpc { id, method, args, .. } if method == "add" => {
            let sum: i128 = args
                .iter()
                .filter_map(|v| v.as_integer())
                .map(i128::from)
                .sum();
            vec![response(*id, Status::Success, Value::from(sum as i64))]
        }
        other => ack_all(other),
    }
}

#[tokio::test]
async fn test_rpc_auto_connects_and_returns_result() {
    let (component, peers) = anonymous();
    let broker = FakeBroker::spawn(peers, adder);

    assert!(!component.is_open());
    let result = component
        .rpc("add", vec![Arg::from(2), Arg::from(3)])
        .await
        .unwrap();

    assert_eq!(result, Arg::from(5));
    assert!(component.is_open());
    assert_eq!(broker.connections(), 1);

    match &broker.received()[0] {
        Frame::Rpc { method, target, args, .. } => {
            assert_eq!(method, "add");
            assert_eq!(target, &None);
            assert_eq!(args, &vec![Value::from(2), Value::from(3)]);
        }
        other => panic!("expected RPC frame, got {:?}", other),
    }

    assert!(component.close().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_rpcs_resolve_to_their_own_replies() {
    let (component, mut peers) = anonymous();
    component.connect().await.unwrap();
    let mut peer = peers.recv().await.unwrap();

    let first = tokio::spawn({
        let c = component.clone();
        async move { c.rpc("echo", vec![Arg::from("first")]).await }
    });
    let second = tokio::spawn({
        let c = component.clone();
        async move { c.rpc("echo", vec![Arg::from("second")]).await }
    });

    let mut requests = Vec::new();
    for _ in 0..2 {
        match peer.recv_frame().await.unwrap() {
            Frame::Rpc { id, args, .. } => requests.push((id, args[0].clone())),
            other => panic!("expected RPC frame, got {:?}", other),
        }
    }
    assert_ne!(requests[0].0, requests[1].0);

    // Answer in reverse arrival order
    for (id, arg) in requests.into_iter().rev() {
        peer.send_frame(response(id, Status::Success, arg))
            .await
            .unwrap();
    }

    assert_eq!(first.await.unwrap().unwrap(), Arg::from("first"));
    assert_eq!(second.await.unwrap().unwrap(), Arg::from("second"));
}

#[tokio::test]
async fn test_timeout_then_late_reply_is_dropped() {
    let (component, mut peers) = anonymous();
    component.connect().await.unwrap();
    let mut peer = peers.recv().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = component.rpc("slow", Vec::new()).await.unwrap_err();
    assert!(matches!(err, RembusError::Timeout(_)), "{:?}", err);
    assert_eq!(err.status(), Status::Timeout);
    assert!(started.elapsed() >= Duration::from_millis(300));

    let late_id = match peer.recv_frame().await.unwrap() {
        Frame::Rpc { id, .. } => id,
        other => panic!("expected RPC frame, got {:?}", other),
    };
    peer.send_frame(response(late_id, Status::Success, Value::from(1)))
        .await
        .unwrap();

    // The component keeps working after the stale reply
    let next = tokio::spawn({
        let c = component.clone();
        async move { c.rpc("fast", Vec::new()).await }
    });
    let id = match peer.recv_frame().await.unwrap() {
        Frame::Rpc { id, .. } => id,
        other => panic!("expected RPC frame, got {:?}", other),
    };
    assert_ne!(id, late_id);
    peer.send_frame(response(id, Status::Success, Value::from(2)))
        .await
        .unwrap();
    assert_eq!(next.await.unwrap().unwrap(), Arg::from(2));
}

#[tokio::test]
async fn test_error_status_rejects_with_protocol_error() {
    let (component, peers) = anonymous();
    let _broker = FakeBroker::spawn(peers, |frame| match frame {
        Frame::Rpc { id, .. } => vec![response(
            *id,
            Status::MethodNotFound,
            Value::from("method unknown not found"),
        )],
        other => ack_all(other),
    });

    match component.rpc("unknown", Vec::new()).await {
        Err(RembusError::Protocol { status, reason }) => {
            assert_eq!(status, Status::MethodNotFound);
            assert_eq!(reason, "method unknown not found");
        }
        other => panic!("expected protocol error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_table_arguments_roundtrip() {
    let (component, peers) = anonymous();
    let broker = FakeBroker::spawn(peers, |frame| match frame {
        // Echo the first argument untouched
        Frame::Rpc { id, args, .. } => vec![response(*id, Status::Success, args[0].clone())],
        other => ack_all(other),
    });

    let table = sample_table();
    let result = component
        .rpc("echo_table", vec![Arg::from(table.clone()), Arg::from(7)])
        .await
        .unwrap();
    assert_eq!(result, Arg::from(table));

    match &broker.received()[0] {
        Frame::Rpc { args, .. } => {
            assert!(matches!(&args[0], Value::Tag(80, _)));
            assert_eq!(args[1], Value::from(7));
        }
        other => panic!("expected RPC frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_direct_sets_target() {
    let (component, peers) = anonymous();
    let broker = FakeBroker::spawn(peers, |frame| match frame {
        Frame::Rpc { id, target, .. } => match target {
            Some(t) if t == "server1" => vec![response(*id, Status::Success, Value::from("ok"))],
            _ => vec![response(*id, Status::TargetNotFound, Value::Null)],
        },
        other => ack_all(other),
    });

    let result = component
        .direct("server1", "status", Vec::new())
        .await
        .unwrap();
    assert_eq!(result, Arg::from("ok"));

    let err = component
        .direct("server2", "status", Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Status::TargetNotFound);
    assert_eq!(broker.connections(), 1);
}

#[tokio::test]
async fn test_concurrent_first_calls_open_one_connection() {
    let (component, peers) = anonymous();
    let broker = FakeBroker::spawn(peers, adder);

    let calls: Vec<_> = (0..4)
        .map(|i| {
            let c = component.clone();
            tokio::spawn(async move { c.rpc("add", vec![Arg::from(i), Arg::from(1)]).await })
        })
        .collect();
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), Arg::from(i as i64 + 1));
    }
    assert_eq!(broker.connections(), 1);
}
