//! Codec for encoding and decoding Huddle events.
//!
//! Text frames carry JSON, binary frames carry MessagePack with named
//! fields. Both encodings share the same `{event, data}` envelope.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {limit}")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Outbound encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    Msgpack,
}

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl WireFrame {
    /// Size of the frame payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(data) => data.len(),
        }
    }

    /// Whether the frame payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a value into a frame of the given encoding.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<WireFrame, ProtocolError> {
    match encoding {
        Encoding::Json => Ok(WireFrame::Text(serde_json::to_string(value)?)),
        Encoding::Msgpack => Ok(WireFrame::Binary(Bytes::from(rmp_serde::to_vec_named(
            value,
        )?))),
    }
}

/// Decode a frame, choosing the format from the frame kind.
///
/// # Errors
///
/// Returns an error if the payload is not a valid event.
pub fn decode<T: DeserializeOwned>(frame: &WireFrame) -> Result<T, ProtocolError> {
    match frame {
        WireFrame::Text(text) => Ok(serde_json::from_str(text)?),
        WireFrame::Binary(data) => Ok(rmp_serde::from_slice(data)?),
    }
}

/// Decode a frame after checking it against a size limit.
///
/// # Errors
///
/// Returns `FrameTooLarge` if the frame exceeds `limit`, or a decoding
/// error if the payload is not a valid event.
pub fn decode_limited<T: DeserializeOwned>(
    frame: &WireFrame,
    limit: usize,
) -> Result<T, ProtocolError> {
    let size = frame.len();
    if size > limit {
        return Err(ProtocolError::FrameTooLarge { size, limit });
    }
    decode(frame)
}
