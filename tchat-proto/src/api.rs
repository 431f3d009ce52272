//! Request and response bodies of the REST collaborator.

use serde::{Deserialize, Serialize};

use crate::frame::DeliveredMessage;

/// A user as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Server-assigned user id.
    pub id: String,
    /// Unique login name.
    pub username: String,
    /// Contact email.
    pub email: String,
}

/// `POST /users/login` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login name.
    pub username: String,
    /// Plain password, sent over the API transport.
    pub password: String,
}

/// `POST /users/login` response: bearer token plus the user's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls and the realtime handshake.
    pub token: String,
    /// User id.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Contact email.
    pub email: String,
}

impl LoginResponse {
    /// Splits the response into the token and the profile.
    #[must_use]
    pub fn into_parts(self) -> (String, UserProfile) {
        (
            self.token,
            UserProfile {
                id: self.id,
                username: self.username,
                email: self.email,
            },
        )
    }
}

/// `POST /users/register` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Desired login name.
    pub username: String,
    /// Contact email.
    pub email: String,
    /// Plain password.
    pub password: String,
}

/// `POST /users/publicKey` body and `GET /users/{id}/publicKey` response.
///
/// The key travels in its stripped form (PEM armor and whitespace removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBody {
    /// Stripped public key text.
    pub public_key: String,
}

/// One entry of `GET /messages` or `GET /users/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    /// Contact user id.
    pub id: String,
    /// Contact login name.
    pub username: String,
    /// Unread messages from this contact, as the server counts them.
    #[serde(default)]
    pub unread_count: Option<u32>,
    /// Timestamp of the latest message in the conversation (RFC 3339).
    #[serde(default)]
    pub last_message_timestamp: Option<String>,
}

/// One entry of `GET /messages/{contactId}`.
///
/// Entries that do not have the shape of a [`DeliveredMessage`] are kept as
/// raw JSON, so a single bad entry does not fail the whole listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryItem {
    /// A well-formed message.
    Message(DeliveredMessage),
    /// Anything else the server put in the list.
    Malformed(serde_json::Value),
}

impl HistoryItem {
    fn raw_str(&self, field: &str) -> Option<&str> {
        match self {
            Self::Message(_) => None,
            Self::Malformed(value) => value.get(field).and_then(serde_json::Value::as_str),
        }
    }

    /// Message id, or empty when a malformed entry has none.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Message(message) => &message.id,
            Self::Malformed(_) => self.raw_str("id").unwrap_or_default(),
        }
    }

    /// Author's user id, or empty when a malformed entry has none.
    #[must_use]
    pub fn sender_id(&self) -> &str {
        match self {
            Self::Message(message) => &message.sender_id,
            Self::Malformed(_) => self.raw_str("senderId").unwrap_or_default(),
        }
    }

    /// Server timestamp, or empty when a malformed entry has none.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        match self {
            Self::Message(message) => &message.timestamp,
            Self::Malformed(_) => self.raw_str("timestamp").unwrap_or_default(),
        }
    }
}

impl From<DeliveredMessage> for HistoryItem {
    fn from(message: DeliveredMessage) -> Self {
        Self::Message(message)
    }
}

/// Error body returned by the REST server on failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    #[serde(default)]
    pub message: Option<String>,
}
