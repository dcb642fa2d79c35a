//! JSON codec for Keylock protocol messages.
//!
//! Wire format: one JSON object per WebSocket text frame, tagged with an
//! `"event"` field (see [`crate::protocol::messages`]).
//!
//! The server only ever encodes [`ServerEvent`]s and decodes
//! [`ClientMessage`]s; the opposite pair exists for clients and tests.

use thiserror::Error;

use crate::protocol::messages::{ClientMessage, ServerEvent};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match any message shape.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Encodes a server event into the text of one WebSocket frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails.
///
/// # Examples
///
/// ```rust
/// use keylock_core::{encode_event, ServerEvent};
///
/// let text = encode_event(&ServerEvent::ControlReleased).unwrap();
/// assert_eq!(text, r#"{"event":"controlReleased"}"#);
/// ```
pub fn encode_event(event: &ServerEvent) -> Result<String, ProtocolError> {
    serde_json::to_string(event).map_err(ProtocolError::Encode)
}

/// Decodes the text of one WebSocket frame into a client message.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not a known message.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}

/// Encodes a client message (browser side).
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialisation fails.
pub fn encode_client_message(msg: &ClientMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(ProtocolError::Encode)
}

/// Decodes a server event (browser side).
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not a known event.
pub fn decode_server_event(text: &str) -> Result<ServerEvent, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}
