// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

//! Monitor state replication over real TCP links

use dm_core::{
    Messenger, Monitor, MonitorError, PeerId, ProtocolError, StateCodec, TcpOptions, TcpTransport,
    TransportError,
};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(30);

fn free_peer() -> PeerId {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    PeerId::new(listener.local_addr().unwrap().to_string())
}

/// Opaque bytes replicated as-is
fn raw_codec() -> StateCodec<Vec<u8>> {
    StateCodec::new(
        |state: &Vec<u8>| Ok(state.clone()),
        |state: &mut Vec<u8>, bytes: &[u8]| {
            *state = bytes.to_vec();
            Ok(())
        },
    )
}

async fn pair(max_frame_len: usize) -> Vec<Monitor<Vec<u8>>> {
    let peers = [free_peer(), free_peer()];
    let options = TcpOptions {
        connect_retry: Duration::from_millis(10),
        max_frame_len,
    };
    let mut monitors = Vec::new();
    for local in &peers {
        let transport = TcpTransport::bind(local.clone(), peers.clone(), options.clone())
            .await
            .unwrap();
        let messenger = Messenger::new(transport);
        monitors.push(Monitor::new("blob", &messenger, Vec::new(), raw_codec()).unwrap());
        messenger.start();
    }
    monitors
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn megabyte_state_reaches_the_other_replica() {
    const LEN: usize = 1_000_000;
    let cluster = pair(4 * 1024 * 1024).await;

    cluster[0]
        .entry(|state| async move {
            state.update(|s| *s = vec![0xab; LEN]);
            Ok(())
        })
        .await
        .unwrap();

    let seen = tokio::time::timeout(WAIT, cluster[1].entry(|state| async move { Ok(state.read(|s| s.len())) }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, LEN);
    assert!(cluster[1].snapshot().iter().all(|b| *b == 0xab));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn state_too_large_for_a_frame_fails_the_entry() {
    let cluster = pair(4096).await;

    let err = cluster[0]
        .entry(|state| async move {
            state.update(|s| *s = vec![1; 10_000]);
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            MonitorError::Protocol(ProtocolError::Transport(TransportError::FrameTooLarge(_)))
        ),
        "unexpected error: {err}"
    );
    assert!(!cluster[0].lock().is_held());

    // The lock is still usable and small states still replicate
    cluster[0]
        .entry(|state| async move {
            state.update(|s| *s = vec![2; 16]);
            Ok(())
        })
        .await
        .unwrap();
    let seen = tokio::time::timeout(WAIT, cluster[1].entry(|state| async move { Ok(state.read(|s| s.clone())) }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, vec![2; 16]);
}
