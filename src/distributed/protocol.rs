//! Dispatch protocol
//!
//! This module defines the messages exchanged between the dispatch coordinator
//! and worker services. The protocol uses MessagePack (rmp-serde) with named
//! fields, so every message is a self-describing tagged map.
//!
//! # Protocol Version
//!
//! Current version: 1
//!
//! # Message Flow
//!
//! One request and one reply per TCP connection:
//!
//! ```text
//! Coordinator                     Worker
//!     |                              |
//!     |------- DISPATCH(task) ------>|
//!     |                              |  resolve + execute
//!     |<------ OUTCOME(envelope) ----|
//!     |                              |
//!   close                          close
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: payload length][N bytes: MessagePack payload]
//! ```
//!
//! Readers loop until the declared length is satisfied; a single socket read
//! is never assumed to hold a whole message.

use crate::task::{ResultEnvelope, TaskDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Coordinator and workers must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Default ceiling for a single frame payload (64 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Task to execute (Coordinator → Worker)
    Dispatch(DispatchMessage),

    /// Execution outcome (Worker → Coordinator)
    Outcome(OutcomeMessage),
}

impl Message {
    /// Variant name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Dispatch(_) => "Dispatch",
            Message::Outcome(_) => "Outcome",
        }
    }
}

/// Dispatch message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// Protocol version (must match)
    pub protocol_version: u32,

    /// Task to run
    pub task: TaskDescriptor,
}

impl DispatchMessage {
    pub fn new(task: TaskDescriptor) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            task,
        }
    }
}

/// Outcome message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMessage {
    /// Node identifier of the replying worker
    pub node_id: String,

    /// Result of the task
    pub envelope: ResultEnvelope,
}

/// Framing and codec failures
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Serialize a message to a length-prefixed frame
///
/// # Message Format
///
/// ```text
/// [4 bytes: message length (little-endian u32)][N bytes: MessagePack message]
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, FrameError> {
    let msg_bytes = rmp_serde::to_vec_named(msg)?;

    let msg_len = u32::try_from(msg_bytes.len()).map_err(|_| FrameError::TooLarge {
        len: msg_bytes.len(),
        max: u32::MAX as usize,
    })?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_BYTES + msg_bytes.len());
    framed.extend_from_slice(&msg_len.to_le_bytes());
    framed.extend_from_slice(&msg_bytes);

    Ok(framed)
}

/// Decode a frame payload (without its length prefix)
pub fn decode_payload(payload: &[u8]) -> Result<Message, FrameError> {
    Ok(rmp_serde::from_slice(payload)?)
}

/// Read one frame payload from a stream
///
/// Reads the length prefix, rejects lengths above `max_frame_bytes` before
/// allocating, then reads exactly that many bytes.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_BYTES];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(FrameError::TooLarge {
            len,
            max: max_frame_bytes,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Read and decode one message from a stream
pub async fn read_message<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame(reader, max_frame_bytes).await?;
    decode_payload(&payload)
}

/// Write an already-encoded frame and flush it
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize and write a message
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let framed = encode_message(msg)?;
    write_frame(writer, &framed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_encode_decode_dispatch() {
        let task = TaskDescriptor::new("concat")
            .arg(json!(["a", "b"]))
            .named("sep", "+");
        let msg = Message::Dispatch(DispatchMessage::new(task.clone()));

        let bytes = encode_message(&msg).unwrap();
        let mut input: &[u8] = &bytes;
        let decoded = read_message(&mut input, DEFAULT_MAX_FRAME_BYTES).await.unwrap();

        assert!(input.is_empty());
        match decoded {
            Message::Dispatch(dispatch) => {
                assert_eq!(dispatch.protocol_version, PROTOCOL_VERSION);
                assert_eq!(dispatch.task, task);
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[test]
    fn test_encode_decode_outcomes() {
        for envelope in [
            ResultEnvelope::ok(json!({ "sum": 8, "items": [1.5, null, true] })),
            ResultEnvelope::err("division by zero"),
        ] {
            let msg = Message::Outcome(OutcomeMessage {
                node_id: "10.0.1.10".to_string(),
                envelope: envelope.clone(),
            });
            let bytes = encode_message(&msg).unwrap();
            let decoded = decode_payload(&bytes[LENGTH_PREFIX_BYTES..]).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_message_framing() {
        let msg = Message::Dispatch(DispatchMessage::new(TaskDescriptor::new("node_info")));
        let bytes = encode_message(&msg).unwrap();

        assert!(bytes.len() >= LENGTH_PREFIX_BYTES);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), LENGTH_PREFIX_BYTES + msg_len);
    }

    #[test]
    fn test_decode_garbage_payload() {
        assert!(matches!(
            decode_payload(&[0xc1, 0x00, 0xff]),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 1);
    }

    #[tokio::test]
    async fn test_read_frame_across_partial_reads() {
        let payload = "x".repeat(1024 * 1024);
        let msg = Message::Dispatch(DispatchMessage::new(TaskDescriptor::new("len").arg(payload.clone())));
        let bytes = encode_message(&msg).unwrap();

        // Small duplex buffer forces many partial reads and writes
        let (mut client, mut server) = tokio::io::duplex(4096);
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &bytes).await.unwrap();
        });

        let decoded = read_message(&mut server, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        writer.await.unwrap();

        match decoded {
            Message::Dispatch(dispatch) => {
                assert_eq!(dispatch.task.positional_args[0], json!(payload));
            }
            other => panic!("Wrong message type: {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut input: &[u8] = &(2048u32.to_le_bytes());
        match read_frame(&mut input, 1024).await {
            Err(FrameError::TooLarge { len, max }) => {
                assert_eq!(len, 2048);
                assert_eq!(max, 1024);
            }
            other => panic!("Expected oversized frame error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_frame_truncated_stream() {
        let mut input: &[u8] = &[10, 0, 0, 0, 1, 2, 3];
        assert!(matches!(
            read_frame(&mut input, 1024).await,
            Err(FrameError::Io(_))
        ));
    }
}
