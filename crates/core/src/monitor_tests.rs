// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::Frame;
use crate::request::PeerId;
use crate::transport::MemoryNetwork;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn setup(n: usize) -> Vec<Monitor<Vec<i64>>> {
    let peers: Vec<PeerId> = (0..n).map(|i| PeerId::new(format!("p{i}"))).collect();
    MemoryNetwork::connect(&peers)
        .into_iter()
        .map(|transport| {
            let messenger = Messenger::new(transport);
            let monitor = Monitor::new("counter", &messenger, Vec::new(), StateCodec::json()).unwrap();
            messenger.start();
            monitor
        })
        .collect()
}

/// Poll until `monitor`'s replica matches `expected`
async fn converged(monitor: &Monitor<Vec<i64>>, expected: &[i64]) {
    tokio::time::timeout(WAIT, async {
        while monitor.snapshot() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("replica stuck at {:?}", monitor.snapshot()));
}

fn state_frame(kind: MessageKind, state: &[u8]) -> Frame {
    Frame::new(
        MessageHeader::new("counter", PeerId::new("p1"), kind),
        StateBody {
            timestamp: 4,
            state: state.to_vec(),
        }
        .to_bytes(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn entry_replicates_state_to_peers() {
    let cluster = setup(2);

    let len = cluster[0]
        .entry(|state| async move {
            state.update(|s| s.push(7));
            Ok(state.read(|s| s.len()))
        })
        .await
        .unwrap();
    assert_eq!(len, 1);
    assert!(!cluster[0].lock().is_held());
    converged(&cluster[1], &[7]).await;

    cluster[1]
        .entry(|state| async move {
            state.update(|s| s.push(8));
            Ok(())
        })
        .await
        .unwrap();
    converged(&cluster[0], &[7, 8]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_entry_still_synchronizes_and_unlocks() {
    let cluster = setup(2);

    let err = cluster[0]
        .entry(|state| async move {
            state.update(|s| s.push(1));
            Err::<(), _>(MonitorError::Codec("rejected".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::Codec(msg) if msg == "rejected"));
    assert!(!cluster[0].lock().is_held());
    converged(&cluster[1], &[1]).await;

    tokio::time::timeout(WAIT, cluster[1].entry(|_| async { Ok(()) }))
        .await
        .unwrap()
        .unwrap();
}

#[test]
fn state_message_overwrites_local_replica() {
    let transport = MemoryNetwork::connect(&[PeerId::new("p0"), PeerId::new("p1")]).remove(0);
    let messenger = Messenger::new(transport);
    let monitor = Monitor::new("counter", &messenger, vec![1, 2, 3], StateCodec::json()).unwrap();

    messenger
        .dispatch(&state_frame(MessageKind::State, b"[9]"))
        .unwrap();
    assert_eq!(monitor.snapshot(), vec![9]);
    assert_eq!(monitor.lock().local_time(), 6);
}

#[test]
fn undecodable_state_is_rejected() {
    let transport = MemoryNetwork::connect(&[PeerId::new("p0"), PeerId::new("p1")]).remove(0);
    let messenger = Messenger::new(transport);
    let monitor = Monitor::new("counter", &messenger, vec![1], StateCodec::json()).unwrap();

    let err = messenger
        .dispatch(&state_frame(MessageKind::State, b"not json"))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::State(_)));
    assert_eq!(monitor.snapshot(), vec![1]);

    let err = messenger
        .dispatch(&state_frame(MessageKind::Request, b"[2]"))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedKind { .. }));

    let short = Frame::new(
        MessageHeader::new("counter", PeerId::new("p1"), MessageKind::State),
        vec![0, 1, 2],
    );
    let err = messenger.dispatch(&short).unwrap_err();
    assert!(matches!(err, ProtocolError::ShortBody { len: 3, .. }));
}

#[test]
fn state_body_keeps_bytes_raw() {
    let body = StateBody {
        timestamp: 9,
        state: vec![0xff; 1000],
    };
    let bytes = body.to_bytes();
    assert_eq!(bytes.len(), 1008);
    assert_eq!(StateBody::from_bytes(&bytes).unwrap(), body);
}

#[test]
fn custom_codec_hooks_are_used() {
    let transport = MemoryNetwork::connect(&[PeerId::new("p0"), PeerId::new("p1")]).remove(0);
    let messenger = Messenger::new(transport);
    let codec = StateCodec::new(
        |n: &u32| Ok(n.to_string().into_bytes()),
        |n: &mut u32, bytes: &[u8]| {
            *n = std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| MonitorError::Codec("not a number".to_string()))?;
            Ok(())
        },
    );
    let monitor = Monitor::new("counter", &messenger, 0u32, codec).unwrap();

    messenger
        .dispatch(&state_frame(MessageKind::State, b"42"))
        .unwrap();
    assert_eq!(monitor.snapshot(), 42);
}

#[test]
fn object_names_follow_the_monitor_name() {
    let transport = MemoryNetwork::connect(&[PeerId::new("p0")]).remove(0);
    let messenger = Messenger::new(transport);
    let monitor = Monitor::new("buffer", &messenger, (), StateCodec::json()).unwrap();

    assert_eq!(monitor.name(), "buffer");
    assert_eq!(monitor.lock().name(), "buffer/lock");
    assert_eq!(monitor.condition("full").unwrap().name(), "buffer/lock/full");
    assert!(matches!(
        Monitor::new("buffer", &messenger, (), StateCodec::json()),
        Err(ProtocolError::DuplicateHandler(_))
    ));
}
