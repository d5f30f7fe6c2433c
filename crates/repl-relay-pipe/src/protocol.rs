//! Line framing for pipe messages.
//!
//! Each message travels as one JSON object per line with a base64 payload.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One framed pipe message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Opaque message payload (base64 encoded).
    Message { data: String },
}

impl Frame {
    /// Create a message frame from raw bytes.
    #[must_use]
    pub fn message(data: &[u8]) -> Self {
        Self::Message {
            data: BASE64.encode(data),
        }
    }

    /// Decode the payload.
    ///
    /// # Errors
    /// Returns error if the payload is not valid base64.
    pub fn decode_message(&self) -> Result<Bytes, base64::DecodeError> {
        let Self::Message { data } = self;
        BASE64.decode(data).map(Bytes::from)
    }

    /// Encode as a single newline-terminated line.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parse one line, ignoring surrounding whitespace.
    ///
    /// # Errors
    /// Returns error if the line is not a valid frame.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}
