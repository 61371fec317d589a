// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::message::{MessageHeader, MessageKind};
use crate::transport::MemoryNetwork;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// A writer that captures log output for testing
#[derive(Clone, Default)]
struct CapturedLogs {
    logs: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    fn contents(&self) -> String {
        let logs = self.logs.lock().unwrap();
        String::from_utf8_lossy(&logs).to_string()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.logs.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run a closure with captured tracing output
fn with_tracing<R>(f: impl FnOnce() -> R) -> (String, R) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(logs.clone())
        .with_ansi(false)
        .without_time()
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (logs.contents(), result)
}

fn frame() -> Frame {
    Frame::new(
        MessageHeader::new("buffer/lock", PeerId::new("a"), MessageKind::Request),
        b"{\"timestamp\":0}".to_vec(),
    )
}

#[test]
fn broadcast_logs_span_and_peer_count() {
    let (logs, result) = with_tracing(|| {
        let mut endpoints = MemoryNetwork::connect(&[PeerId::new("a"), PeerId::new("b")]);
        let traced = TracedTransport::new(endpoints.remove(0));
        traced.broadcast(frame())
    });

    assert!(result.is_ok(), "broadcast should succeed: {:?}", result);
    assert!(
        logs.contains("transport.broadcast"),
        "Should log span name. Logs:\n{}",
        logs
    );
    assert!(logs.contains("buffer/lock"), "Logs:\n{}", logs);
    assert!(logs.contains("peers=1"), "Logs:\n{}", logs);
}

#[test]
fn failed_send_is_logged_as_error() {
    let (logs, result) = with_tracing(|| {
        let mut endpoints = MemoryNetwork::connect(&[PeerId::new("a"), PeerId::new("b")]);
        let traced = TracedTransport::new(endpoints.remove(0));
        traced.send(&PeerId::new("nobody"), frame())
    });

    assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    assert!(logs.contains("ERROR"), "Logs:\n{}", logs);
    assert!(logs.contains("send failed"), "Logs:\n{}", logs);
}

#[tokio::test]
async fn traced_transport_delivers_like_inner() {
    let endpoints = MemoryNetwork::connect(&[PeerId::new("a"), PeerId::new("b")]);
    let mut endpoints = endpoints.into_iter();
    let a = TracedTransport::new(endpoints.next().unwrap());
    let b = TracedTransport::new(endpoints.next().unwrap());

    a.send(&PeerId::new("b"), frame()).unwrap();
    assert_eq!(b.recv().await.unwrap(), frame());
    assert_eq!(b.inner().local_peer().as_str(), "b");
}
