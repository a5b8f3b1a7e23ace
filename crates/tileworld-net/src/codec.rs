//! Frame encoding.
//!
//! Frame layout: `[u16 kind][u32 payload length][payload]`, header big-endian,
//! payload bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{Message, MessageKind};

/// Header size in bytes.
pub const HEADER_LEN: usize = 6;

/// Largest accepted payload.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// A frame read off the wire, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Declared kind id
    pub kind: u16,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Decodes the payload according to its kind.
    pub fn decode(&self) -> ProtocolResult<Message> {
        decode(self.kind, &self.payload)
    }
}

fn to_payload<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn from_payload<T: DeserializeOwned>(kind: MessageKind, payload: &[u8]) -> ProtocolResult<T> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::Decode {
        kind: kind.id(),
        reason: e.to_string(),
    })
}

/// Encodes a message into a complete frame.
pub fn encode(message: &Message) -> ProtocolResult<Vec<u8>> {
    let payload = match message {
        Message::LoginRequest(m) => to_payload(m)?,
        Message::LoginResponse(m) => to_payload(m)?,
        Message::CreateUserRequest(m) => to_payload(m)?,
        Message::CreateUserResponse(m) => to_payload(m)?,
        Message::PlayerMoveRequest(m) => to_payload(m)?,
        Message::ChunkRequest(m) => to_payload(m)?,
        Message::ChunkData(m) => to_payload(m)?,
        Message::PlayerStatesUpdate(m) => to_payload(m)?,
        Message::WorldObjectsUpdate(m) => to_payload(m)?,
        Message::ChatMessage(m) => to_payload(m)?,
        Message::ObjectUpdateRequest(m) => to_payload(m)?,
    };

    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&message.kind().id().to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes a payload by kind id.
pub fn decode(kind: u16, payload: &[u8]) -> ProtocolResult<Message> {
    let kind = MessageKind::from_id(kind).ok_or(ProtocolError::UnknownKind(kind))?;
    Ok(match kind {
        MessageKind::LoginRequest => Message::LoginRequest(from_payload(kind, payload)?),
        MessageKind::LoginResponse => Message::LoginResponse(from_payload(kind, payload)?),
        MessageKind::CreateUserRequest => Message::CreateUserRequest(from_payload(kind, payload)?),
        MessageKind::CreateUserResponse => {
            Message::CreateUserResponse(from_payload(kind, payload)?)
        },
        MessageKind::PlayerMoveRequest => Message::PlayerMoveRequest(from_payload(kind, payload)?),
        MessageKind::ChunkRequest => Message::ChunkRequest(from_payload(kind, payload)?),
        MessageKind::ChunkData => Message::ChunkData(from_payload(kind, payload)?),
        MessageKind::PlayerStatesUpdate => {
            Message::PlayerStatesUpdate(from_payload(kind, payload)?)
        },
        MessageKind::WorldObjectsUpdate => {
            Message::WorldObjectsUpdate(from_payload(kind, payload)?)
        },
        MessageKind::ChatMessage => Message::ChatMessage(from_payload(kind, payload)?),
        MessageKind::ObjectUpdateRequest => {
            Message::ObjectUpdateRequest(from_payload(kind, payload)?)
        },
    })
}

/// Reads one frame. Returns `None` on a clean end of stream before a header.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Option<RawFrame>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let kind = u16::from_be_bytes([header[0], header[1]]);
    let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(RawFrame { kind, payload }))
}

/// Encodes and writes one message.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> ProtocolResult<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
