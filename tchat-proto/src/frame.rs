//! Realtime frames exchanged over the persistent socket.
//!
//! Both directions are closed tagged variants keyed on `type`. Anything the
//! server sends that is not listed in [`ServerFrame`] fails to decode and is
//! reported as a [`ProtocolError`](crate::codec::ProtocolError).

use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopePair, HybridEnvelope};

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Authenticates the socket. Must be the first frame after the socket
    /// opens; the server never acknowledges it.
    Auth {
        /// Bearer token from the session record.
        token: String,
    },
    /// An outgoing message carrying both sealed copies.
    Message(OutgoingMessage),
}

/// Body of [`ClientFrame::Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// User id of the recipient.
    pub receiver_id: String,
    /// Both sealed copies, flattened into `contentForSender` and
    /// `contentForReceiver`.
    #[serde(flatten)]
    pub content: EnvelopePair,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// A message addressed to this user.
    Message(DeliveredMessage),
}

/// A message as the server hands it to one participant, either live over
/// the socket or in a history listing.
///
/// `content` is the copy sealed for the participant reading it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    /// Server-assigned message id.
    pub id: String,
    /// User id of the author.
    pub sender_id: String,
    /// The envelope readable by the recipient of this listing.
    pub content: HybridEnvelope,
    /// Server timestamp (RFC 3339).
    pub timestamp: String,
}
