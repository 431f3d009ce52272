//! JSON encoding of realtime frames.
//!
//! Realtime traffic is carried in WebSocket text frames holding one JSON
//! object each.

use crate::frame::{ClientFrame, ServerFrame};

/// Error for frames that cannot be encoded or are not one of the known
/// variants.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or not a known frame kind.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
    /// The frame could not be serialized.
    #[error("frame encoding failed: {0}")]
    Encode(String),
}

/// Encodes a client frame as JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a client frame. Used by servers and test harnesses.
///
/// # Errors
///
/// Returns [`ProtocolError::Unrecognized`] for malformed or unknown frames.
pub fn decode_client(text: &str) -> Result<ClientFrame, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Unrecognized(e.to_string()))
}

/// Encodes a server frame as JSON text. Used by servers and test harnesses.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a server frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Unrecognized`] if the text is not JSON, has no
/// `type`, has an unknown `type`, or is missing required fields.
pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::Unrecognized(e.to_string()))
}
