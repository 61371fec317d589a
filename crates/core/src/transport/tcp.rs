// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP transport: one listener per peer, one ordered link per remote
//!
//! A peer id is the `host:port` its listener binds to. Each remote peer gets
//! a dedicated writer task draining an unbounded outbox, which keeps delivery
//! FIFO per (sender, receiver) pair. Writers keep retrying until the remote
//! listener is reachable.
//!
//! A link survives reconnects. The connecting side opens with a hello naming
//! itself and its session; the listener answers with the last sequence it
//! delivered from that session and then acknowledges every record. Records
//! carry an 8-byte sequence number ahead of the encoded frame, the writer
//! keeps them until acknowledged and replays the rest after a reconnect, and
//! the listener drops sequences it already delivered.

use super::{Transport, TransportError};
use crate::message::{decode_frame, encode_frame, read_record, write_record, Frame, DEFAULT_MAX_FRAME_LEN};
use crate::request::PeerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace, warn};

type Inbound = Result<Frame, TransportError>;

/// Bytes of sequence number ahead of each encoded frame
const SEQUENCE_LEN: usize = 8;

/// Connection tuning for [`TcpTransport`]
#[derive(Clone, Debug)]
pub struct TcpOptions {
    /// Delay between attempts to reach a peer that is not listening yet
    pub connect_retry: Duration,
    /// Largest record accepted or sent, sequence number included
    pub max_frame_len: usize,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            connect_retry: Duration::from_millis(100),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// First record on every connection
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    peer: PeerId,
    session: u64,
}

/// What the listener has delivered from one remote session
#[derive(Clone, Copy, Debug)]
struct Incoming {
    session: u64,
    last: u64,
}

type Delivered = Arc<std::sync::Mutex<HashMap<PeerId, Incoming>>>;

pub struct TcpTransport {
    local: PeerId,
    remotes: Vec<PeerId>,
    local_addr: SocketAddr,
    max_frame_len: usize,
    outboxes: HashMap<PeerId, mpsc::UnboundedSender<Arc<Vec<u8>>>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind the local listener and start a writer for every remote peer
    pub async fn bind(
        local: PeerId,
        remotes: impl IntoIterator<Item = PeerId>,
        options: TcpOptions,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(local.as_str()).await?;
        let local_addr = listener.local_addr()?;
        let (closed, _) = watch::channel(false);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        tokio::spawn(accept_loop(
            listener,
            inbox_tx,
            Delivered::default(),
            options.max_frame_len,
            closed.subscribe(),
        ));

        let hello = serde_json::to_vec(&Hello {
            peer: local.clone(),
            session: session_id(),
        })?;
        let remotes: Vec<PeerId> = remotes.into_iter().filter(|p| *p != local).collect();
        let mut outboxes = HashMap::new();
        for peer in &remotes {
            let (tx, rx) = mpsc::unbounded_channel();
            let link = Link::new(peer.clone(), hello.clone(), options.clone());
            tokio::spawn(run_writer(link, rx, closed.subscribe()));
            outboxes.insert(peer.clone(), tx);
        }

        debug!(local = %local, %local_addr, remotes = remotes.len(), "tcp transport bound");
        Ok(Self {
            local,
            remotes,
            local_addr,
            max_frame_len: options.max_frame_len,
            outboxes,
            inbox: Mutex::new(inbox_rx),
            closed,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Encode up front so an oversized frame fails the caller, not the writer
    fn encode(&self, frame: &Frame) -> Result<Arc<Vec<u8>>, TransportError> {
        let data = encode_frame(frame)?;
        let len = SEQUENCE_LEN + data.len();
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge(len));
        }
        Ok(Arc::new(data))
    }

    fn outbox(&self, to: &PeerId) -> Result<&mpsc::UnboundedSender<Arc<Vec<u8>>>, TransportError> {
        self.outboxes
            .get(to)
            .ok_or_else(|| TransportError::UnknownPeer(to.clone()))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    fn remote_peers(&self) -> &[PeerId] {
        &self.remotes
    }

    fn send(&self, to: &PeerId, frame: Frame) -> Result<(), TransportError> {
        self.check_open()?;
        let outbox = self.outbox(to)?;
        let data = self.encode(&frame)?;
        outbox.send(data).map_err(|_| TransportError::Closed)
    }

    /// Encodes once; nothing is queued if the frame is rejected
    fn broadcast(&self, frame: Frame) -> Result<(), TransportError> {
        self.check_open()?;
        let data = self.encode(&frame)?;
        for peer in &self.remotes {
            self.outbox(peer)?
                .send(data.clone())
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            item = inbox.recv() => item.unwrap_or(Err(TransportError::Closed)),
            _ = closed.changed() => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

/// Distinguishes a restarted process from a reconnect of the same one
fn session_id() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ u64::from(std::process::id())
}

async fn accept_loop(
    listener: TcpListener,
    inbox: mpsc::UnboundedSender<Inbound>,
    delivered: Delivered,
    max_frame_len: usize,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "accepted connection");
                    tokio::spawn(run_reader(
                        stream,
                        inbox.clone(),
                        delivered.clone(),
                        max_frame_len,
                        closed.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = closed.changed() => break,
        }
    }
}

async fn run_reader(
    stream: TcpStream,
    inbox: mpsc::UnboundedSender<Inbound>,
    delivered: Delivered,
    max_frame_len: usize,
    mut closed: watch::Receiver<bool>,
) {
    tokio::select! {
        served = serve(stream, &inbox, &delivered, max_frame_len) => {
            if let Err(e) = served {
                // The stream is out of sync after a bad record
                let _ = inbox.send(Err(e));
            }
        }
        _ = closed.changed() => {}
    }
}

/// Deliver one connection's records in sequence and acknowledge them
async fn serve(
    stream: TcpStream,
    inbox: &mpsc::UnboundedSender<Inbound>,
    delivered: &Delivered,
    max_frame_len: usize,
) -> Result<(), TransportError> {
    let (mut reader, mut writer) = stream.into_split();
    let Some(hello) = read_record(&mut reader, max_frame_len).await? else {
        return Ok(());
    };
    let hello: Hello = serde_json::from_slice(&hello)?;

    let resume = {
        let mut delivered = delivered.lock().unwrap_or_else(|e| e.into_inner());
        let incoming = delivered.entry(hello.peer.clone()).or_insert(Incoming {
            session: hello.session,
            last: 0,
        });
        if incoming.session != hello.session {
            *incoming = Incoming {
                session: hello.session,
                last: 0,
            };
        }
        incoming.last
    };
    debug!(peer = %hello.peer, resume, "link opened");
    writer.write_u64(resume).await?;

    while let Some(record) = read_record(&mut reader, max_frame_len).await? {
        let Some((sequence, data)) = record.split_first_chunk::<SEQUENCE_LEN>() else {
            return Err(TransportError::Truncated);
        };
        let sequence = u64::from_be_bytes(*sequence);
        {
            let mut delivered = delivered.lock().unwrap_or_else(|e| e.into_inner());
            match delivered.get_mut(&hello.peer) {
                Some(incoming) if incoming.session == hello.session => {
                    if sequence > incoming.last {
                        let frame = decode_frame(data)?;
                        incoming.last = sequence;
                        if inbox.send(Ok(frame)).is_err() {
                            return Ok(());
                        }
                    } else {
                        trace!(peer = %hello.peer, sequence, "dropping replayed record");
                    }
                }
                // A newer session of the same peer took over
                _ => return Ok(()),
            }
        }
        writer.write_u64(sequence).await?;
    }
    Ok(())
}

/// Sending side of one (local, remote) pair
struct Link {
    peer: PeerId,
    hello: Vec<u8>,
    options: TcpOptions,
    next_sequence: u64,
    unacked: VecDeque<(u64, Arc<Vec<u8>>)>,
    acked: Arc<AtomicU64>,
    writer: Option<OwnedWriteHalf>,
}

impl Link {
    fn new(peer: PeerId, hello: Vec<u8>, options: TcpOptions) -> Self {
        Self {
            peer,
            hello,
            options,
            next_sequence: 1,
            unacked: VecDeque::new(),
            acked: Arc::new(AtomicU64::new(0)),
            writer: None,
        }
    }

    fn prune(&mut self) {
        let acked = self.acked.load(Ordering::Acquire);
        while self.unacked.front().is_some_and(|(sequence, _)| *sequence <= acked) {
            self.unacked.pop_front();
        }
    }

    fn push(&mut self, data: Arc<Vec<u8>>) {
        self.prune();
        self.unacked.push_back((self.next_sequence, data));
        self.next_sequence += 1;
    }

    async fn write_newest(&mut self) -> Result<(), TransportError> {
        let (Some(writer), Some((sequence, data))) = (self.writer.as_mut(), self.unacked.back()) else {
            return Ok(());
        };
        write_sequenced(writer, *sequence, data, self.options.max_frame_len).await
    }

    async fn replay(&mut self) -> Result<(), TransportError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for (sequence, data) in &self.unacked {
            write_sequenced(writer, *sequence, data, self.options.max_frame_len).await?;
        }
        Ok(())
    }

    /// Write the newest frame, reconnecting and replaying as needed; false once closed
    async fn deliver(&mut self, closed: &mut watch::Receiver<bool>) -> bool {
        loop {
            let written = if self.writer.is_some() {
                self.write_newest().await
            } else {
                match self.reconnect(closed).await {
                    Some(writer) => {
                        self.writer = Some(writer);
                        self.replay().await
                    }
                    None => return false,
                }
            };
            match written {
                Ok(()) => return true,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "write failed, reconnecting");
                    self.writer = None;
                }
            }
        }
    }

    async fn reconnect(&mut self, closed: &mut watch::Receiver<bool>) -> Option<OwnedWriteHalf> {
        loop {
            let stream = connect(&self.peer, &self.options, closed).await?;
            match self.handshake(stream).await {
                Ok(writer) => return Some(writer),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "handshake failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.connect_retry) => {}
                        _ = closed.changed() => return None,
                    }
                }
            }
        }
    }

    async fn handshake(&mut self, stream: TcpStream) -> Result<OwnedWriteHalf, TransportError> {
        let (mut reader, mut writer) = stream.into_split();
        write_record(&mut writer, &self.hello, self.options.max_frame_len).await?;
        let resume = reader.read_u64().await?;
        self.acked.fetch_max(resume, Ordering::AcqRel);
        self.prune();
        if !self.unacked.is_empty() {
            debug!(peer = %self.peer, resume, replay = self.unacked.len(), "resuming link");
        }
        tokio::spawn(read_acks(reader, self.acked.clone()));
        Ok(writer)
    }
}

async fn write_sequenced(
    writer: &mut OwnedWriteHalf,
    sequence: u64,
    data: &[u8],
    max_frame_len: usize,
) -> Result<(), TransportError> {
    let mut record = Vec::with_capacity(SEQUENCE_LEN + data.len());
    record.extend_from_slice(&sequence.to_be_bytes());
    record.extend_from_slice(data);
    write_record(writer, &record, max_frame_len).await
}

/// Runs until the connection drops
async fn read_acks(mut reader: OwnedReadHalf, acked: Arc<AtomicU64>) {
    while let Ok(sequence) = reader.read_u64().await {
        acked.fetch_max(sequence, Ordering::AcqRel);
    }
}

async fn run_writer(
    mut link: Link,
    mut outbox: mpsc::UnboundedReceiver<Arc<Vec<u8>>>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        let data = tokio::select! {
            data = outbox.recv() => match data {
                Some(data) => data,
                None => break,
            },
            _ = closed.changed() => break,
        };
        link.push(data);
        if !link.deliver(&mut closed).await {
            break;
        }
    }

    // Flush what is already queued so final releases reach connected peers
    if link.writer.is_some() {
        while let Ok(data) = outbox.try_recv() {
            link.push(data);
            if let Err(e) = link.write_newest().await {
                warn!(peer = %link.peer, error = %e, "flush on close failed");
                break;
            }
        }
    }
}

async fn connect(
    peer: &PeerId,
    options: &TcpOptions,
    closed: &mut watch::Receiver<bool>,
) -> Option<TcpStream> {
    loop {
        match TcpStream::connect(peer.as_str()).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    trace!(peer = %peer, error = %e, "set_nodelay failed");
                }
                debug!(peer = %peer, "connected");
                return Some(stream);
            }
            Err(e) => {
                trace!(peer = %peer, error = %e, "connect failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(options.connect_retry) => {}
                    _ = closed.changed() => return None,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
