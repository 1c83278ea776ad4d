//! Wire format for the three membership messages.
//!
//! Messages are serialized with bincode using fixed-width little-endian
//! integers, which yields this layout:
//!
//! ```text
//! tag: u32 | sender.id: u32 | sender.port: u16 | heartbeat: u64
//! Gossip only: row_count: u64 | row_count x (id: u32 | port: u16 | heartbeat: u64)
//! ```
//!
//! The transport preserves datagram boundaries, so frames carry no length
//! prefix. Frames are checked against this layout before bincode sees them so
//! truncated or inconsistent datagrams are rejected with a precise reason.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::address::NodeAddress;

/// Largest frame accepted or produced: the maximum IPv4 UDP payload.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const TAG_LEN: usize = 4;
const ADDRESS_LEN: usize = 4 + 2;
const HEARTBEAT_LEN: usize = 8;
const ROW_COUNT_LEN: usize = 8;
pub(crate) const HEADER_LEN: usize = TAG_LEN + ADDRESS_LEN + HEARTBEAT_LEN;
pub(crate) const ROW_LEN: usize = ADDRESS_LEN + HEARTBEAT_LEN;

const TAG_JOIN_REQUEST: u32 = 0;
const TAG_JOIN_REPLY: u32 = 1;
const TAG_GOSSIP: u32 = 2;

// One (address, heartbeat) entry carried by a gossip message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipRow {
    pub address: NodeAddress,
    pub heartbeat: u64,
}

// Protocol messages. Variant order fixes the wire tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    JoinRequest {
        sender: NodeAddress,
        heartbeat: u64,
    },
    JoinReply {
        sender: NodeAddress,
        heartbeat: u64,
    },
    Gossip {
        sender: NodeAddress,
        heartbeat: u64,
        rows: Vec<GossipRow>,
    },
}

impl Message {
    pub fn sender(&self) -> NodeAddress {
        match self {
            Message::JoinRequest { sender, .. }
            | Message::JoinReply { sender, .. }
            | Message::Gossip { sender, .. } => *sender,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinRequest { .. } => "join-request",
            Message::JoinReply { .. } => "join-reply",
            Message::Gossip { .. } => "gossip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u32),
    #[error("gossip declares {declared} rows but carries {payload_len} payload bytes")]
    RowCountMismatch { declared: u64, payload_len: usize },
    #[error("{actual} trailing bytes after a {expected}-byte frame")]
    TrailingBytes { expected: usize, actual: usize },
    #[error("frame of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoded message of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
    #[error("serialization failed: {0}")]
    Serialize(#[from] bincode::Error),
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    let bytes = wire_options().serialize(message)?;
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(EncodeError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    validate_frame(bytes)?;
    wire_options()
        .deserialize(bytes)
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

// Check the frame length against the fixed layout of its declared kind
fn validate_frame(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(DecodeError::TooLarge(bytes.len()));
    }
    let tag = read_u32(bytes, 0).ok_or(DecodeError::Truncated {
        needed: TAG_LEN,
        actual: bytes.len(),
    })?;

    match tag {
        TAG_JOIN_REQUEST | TAG_JOIN_REPLY => {
            if bytes.len() < HEADER_LEN {
                return Err(DecodeError::Truncated {
                    needed: HEADER_LEN,
                    actual: bytes.len(),
                });
            }
            if bytes.len() > HEADER_LEN {
                return Err(DecodeError::TrailingBytes {
                    expected: HEADER_LEN,
                    actual: bytes.len() - HEADER_LEN,
                });
            }
            Ok(())
        }
        TAG_GOSSIP => {
            let fixed = HEADER_LEN + ROW_COUNT_LEN;
            let declared = read_u64(bytes, HEADER_LEN).ok_or(DecodeError::Truncated {
                needed: fixed,
                actual: bytes.len(),
            })?;
            let payload_len = bytes.len() - fixed;
            let expected = declared.checked_mul(ROW_LEN as u64);
            if expected != Some(payload_len as u64) {
                return Err(DecodeError::RowCountMismatch {
                    declared,
                    payload_len,
                });
            }
            Ok(())
        }
        other => Err(DecodeError::UnknownKind(other)),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    let raw = bytes.get(offset..offset + 8)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}
