// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire messages exchanged between peers
//!
//! Every message is a [`Frame`]: a header naming the logical object, sender
//! and kind, plus an opaque body. Lock and condition bodies are JSON; STATE
//! bodies carry the application's bytes untouched. On stream transports a
//! frame is a record (4-byte big-endian length, then payload) whose payload
//! is the 4-byte header length, the JSON header and the raw body.

use crate::error::ProtocolError;
use crate::request::PeerId;
use crate::transport::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single encoded frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    State,
    Request,
    Response,
    Release,
    AwaitOnCondition,
    SignalOnCondition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Logical object the message is addressed to (lock, condition, monitor)
    pub object: String,
    pub sender: PeerId,
    pub kind: MessageKind,
}

impl MessageHeader {
    pub fn new(object: impl Into<String>, sender: PeerId, kind: MessageKind) -> Self {
        Self {
            object: object.into(),
            sender,
            kind,
        }
    }
}

/// Unit of delivery carried by a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: MessageHeader,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(header: MessageHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }
}

/// Body of REQUEST, RESPONSE and RELEASE
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedBody {
    pub timestamp: u64,
}

/// Body of AWAIT_ON_CONDITION and SIGNAL_ON_CONDITION
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionBody {
    pub sequence: u64,
    pub timestamp: u64,
}

/// Body of STATE: 8-byte big-endian timestamp, then the serialized state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateBody {
    pub timestamp: u64,
    pub state: Vec<u8>,
}

impl StateBody {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + self.state.len());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.state);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let Some((timestamp, state)) = bytes.split_first_chunk::<8>() else {
            return Err(ProtocolError::ShortBody {
                kind: MessageKind::State,
                len: bytes.len(),
            });
        };
        Ok(Self {
            timestamp: u64::from_be_bytes(*timestamp),
            state: state.to_vec(),
        })
    }
}

/// Encode a body as JSON
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(body)?)
}

/// Decode a JSON body
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a frame as a record payload: header length, JSON header, raw body
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    let header = serde_json::to_vec(&frame.header)?;
    let header_len = u32::try_from(header.len()).map_err(|_| TransportError::FrameTooLarge(header.len()))?;
    let mut data = Vec::with_capacity(4 + header.len() + frame.body.len());
    data.extend_from_slice(&header_len.to_be_bytes());
    data.extend_from_slice(&header);
    data.extend_from_slice(&frame.body);
    Ok(data)
}

/// Inverse of [`encode_frame`]
pub fn decode_frame(data: &[u8]) -> Result<Frame, TransportError> {
    let Some((header_len, rest)) = data.split_first_chunk::<4>() else {
        return Err(TransportError::Truncated);
    };
    let header_len = u32::from_be_bytes(*header_len) as usize;
    if header_len > rest.len() {
        return Err(TransportError::Truncated);
    }
    let (header, body) = rest.split_at(header_len);
    Ok(Frame::new(serde_json::from_slice(header)?, body.to_vec()))
}

/// Write one length-prefixed record
pub async fn write_record<W>(writer: &mut W, data: &[u8], max_len: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > max_len {
        return Err(TransportError::FrameTooLarge(data.len()));
    }
    let len = u32::try_from(data.len()).map_err(|_| TransportError::FrameTooLarge(data.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed record; `None` on a clean end of stream
///
/// A stream that ends inside the length prefix or the payload is
/// [`TransportError::Truncated`].
pub async fn read_record<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            return match filled {
                0 => Ok(None),
                _ => Err(TransportError::Truncated),
            };
        }
        filled += n;
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut data = vec![0u8; len];
    match reader.read_exact(&mut data).await {
        Ok(_) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Truncated),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
