//! JSON message types for the browser-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Browser → Server:  JSON text frame  →  ClientMessage
//! Server  → Browser: ServerEvent      →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with an `"event"` field that names the
//! variant in camelCase.  All other fields live in the same object:
//!
//! ```json
//! {"event":"acquireControl","ack":1}
//! {"event":"updateKeys","userId":"u1","newKeys":["red","white"]}
//! {"event":"controlGranted","ownerId":"u1"}
//! ```
//!
//! Serde's `#[serde(tag = "event")]` attribute handles this automatically.
//!
//! # Why separate client→server and server→client types?
//!
//! The server never accepts an `ack` or `controlGranted` from a browser, and
//! never sends `acquireControl`.  Two enums make sending the wrong direction
//! a compile-time error.  `updateKeys` exists in both directions with
//! different payloads, which is exactly why the two enums are separate.

use serde::{Deserialize, Serialize};

use crate::domain::identity::ClientIdentity;
use crate::domain::keyboard::KeyboardState;

// ── Client → Server messages ──────────────────────────────────────────────────

/// All messages a browser can send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask for the control lock.
    ///
    /// The server always replies with an [`ServerEvent::Ack`] echoing `ack`.
    AcquireControl {
        /// Correlation id chosen by the browser, echoed in the reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
    },

    /// Submit a complete new keyboard row.  Only the lock holder may do this.
    UpdateKeys {
        /// Identity the browser believes it is submitting as.
        ///
        /// Optional.  If present it must match the connection's identity.
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,

        /// Colour names, one per key.  Validated by the server.
        #[serde(rename = "newKeys")]
        new_keys: Vec<String>,
    },
}

impl ClientMessage {
    /// Wire name of the message, safe for log lines.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::AcquireControl { .. } => "acquireControl",
            ClientMessage::UpdateKeys { .. } => "updateKeys",
        }
    }
}

// ── Server → Client messages ──────────────────────────────────────────────────

/// Machine-readable category of an [`ServerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// The submitted key row was malformed.
    InvalidKeys,
    /// The shared store could not be reached; the request had no effect.
    StoreUnavailable,
    /// The frame was not a valid client message.
    BadRequest,
}

/// All events the server pushes to browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The full keyboard row.
    ///
    /// Sent once on connect and then to everyone after every accepted
    /// submission.
    UpdateKeys {
        /// The keyboard after the update.
        keys: KeyboardState,
    },

    /// Announces who holds control.
    ///
    /// On connect this is sent with `null` when nobody holds the lock.
    ControlGranted {
        /// The new lock holder, or `null`.
        #[serde(rename = "ownerId")]
        owner_id: Option<ClientIdentity>,
    },

    /// The control lock is free again.
    ControlReleased,

    /// A submission was refused because the sender does not hold control.
    ///
    /// Sent only to the refused session.
    ControlDenied {
        /// Human-readable explanation.
        reason: String,
        /// Who holds control right now, if anybody.
        #[serde(rename = "ownerId", default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<ClientIdentity>,
    },

    /// Reply to an `acquireControl` request.
    Ack {
        /// The correlation id from the request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
        /// `true` if the lock was granted to the requester.
        success: bool,
        /// Current holder when `success` is `false`.
        #[serde(rename = "ownerId", default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<ClientIdentity>,
    },

    /// A request failed; sent only to the requesting session.
    Error {
        /// Failure category.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of the event, safe for log lines.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::UpdateKeys { .. } => "updateKeys",
            ServerEvent::ControlGranted { .. } => "controlGranted",
            ServerEvent::ControlReleased => "controlReleased",
            ServerEvent::ControlDenied { .. } => "controlDenied",
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Error { .. } => "error",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
