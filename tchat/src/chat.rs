//! Conversation controller.
//!
//! A [`Conversation`] is one open chat with one contact: the decrypted
//! history, the live subscription for that contact's messages, and the
//! dual-envelope send path.

use std::collections::HashSet;
use std::sync::Arc;

use tchat_proto::api::HistoryItem;
use tchat_proto::frame::DeliveredMessage;

use crate::api::{ApiClient, ApiError};
use crate::crypto::envelope::seal_pair;
use crate::crypto::keys::{Keypair, PeerKeyCache};
use crate::crypto::CryptoError;
use crate::session::SessionRecord;
use crate::transport::realtime::{RealtimeSession, Subscription};

/// Text shown in place of a message that cannot be decrypted.
pub const UNDECRYPTABLE: &str = "Could not decrypt message.";

/// Errors raised while opening or using a conversation.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Sealing an outgoing message failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One displayable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    /// Server message id; empty for lines composed locally.
    pub id: String,
    /// Author's user id.
    pub sender_id: String,
    /// Plaintext, or [`UNDECRYPTABLE`].
    pub text: String,
    /// Server timestamp (ISO-8601), or the local send time.
    pub timestamp: String,
    /// Whether the local user wrote it.
    pub is_mine: bool,
    /// `false` when `text` is the placeholder.
    pub decrypted: bool,
}

/// Result of [`Conversation::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// The line to echo locally.
    pub line: ChatLine,
    /// Whether the frame reached the transport. Delivery is not confirmed.
    pub handed_off: bool,
}

/// Decrypt one delivered message with the local private key.
///
/// Failure yields the placeholder line instead of an error.
#[must_use]
pub fn decrypt_line(message: &DeliveredMessage, keys: &Keypair, own_id: &str) -> ChatLine {
    let (text, decrypted) = match keys.open(&message.content) {
        Ok(text) => (text, true),
        Err(e) => {
            tracing::debug!(message = %message.id, err = %e, "message could not be decrypted");
            (UNDECRYPTABLE.to_string(), false)
        }
    };
    ChatLine {
        id: message.id.clone(),
        sender_id: message.sender_id.clone(),
        text,
        timestamp: message.timestamp.clone(),
        is_mine: message.sender_id == own_id,
        decrypted,
    }
}

/// Turn one history entry into a line. Malformed entries become the
/// placeholder, keeping whatever id, sender and timestamp they carry.
#[must_use]
pub fn history_line(item: &HistoryItem, keys: &Keypair, own_id: &str) -> ChatLine {
    match item {
        HistoryItem::Message(message) => decrypt_line(message, keys, own_id),
        HistoryItem::Malformed(_) => {
            tracing::debug!(message = %item.id(), "malformed history entry");
            ChatLine {
                id: item.id().to_string(),
                sender_id: item.sender_id().to_string(),
                text: UNDECRYPTABLE.to_string(),
                timestamp: item.timestamp().to_string(),
                is_mine: item.sender_id() == own_id,
                decrypted: false,
            }
        }
    }
}

/// Decrypt a history batch as the server returns it (newest first) into
/// display order (oldest first). Each entry is handled independently.
#[must_use]
pub fn decrypt_history(items: &[HistoryItem], keys: &Keypair, own_id: &str) -> Vec<ChatLine> {
    items
        .iter()
        .rev()
        .map(|item| history_line(item, keys, own_id))
        .collect()
}

/// An open chat with one contact.
///
/// Holds the realtime subscription for the contact; dropping the
/// conversation releases it.
pub struct Conversation {
    contact_id: String,
    own_id: String,
    recipient_key: String,
    keys: Arc<Keypair>,
    realtime: RealtimeSession,
    subscription: Subscription,
    history: Vec<ChatLine>,
    /// Ids already shown from history; live copies of them are skipped.
    seen: HashSet<String>,
}

impl Conversation {
    /// Open the conversation with `contact_id`.
    ///
    /// Fetches the contact's public key unless cached, takes over the
    /// realtime subscription, then fetches and decrypts the history. The
    /// contact's unread counter is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Api`] if the key or history cannot be fetched.
    pub async fn open(
        api: &ApiClient,
        session: &SessionRecord,
        keys: Arc<Keypair>,
        peer_keys: &PeerKeyCache,
        realtime: &RealtimeSession,
        contact_id: &str,
    ) -> Result<Self, ChatError> {
        let recipient_key = if let Some(key) = peer_keys.get(contact_id) {
            key
        } else {
            let key = api.public_key(&session.token, contact_id).await?;
            peer_keys.store(contact_id.to_string(), key.clone());
            key
        };

        // Subscribe before fetching history so nothing sent meanwhile is
        // counted as unread.
        let subscription = realtime.subscribe(contact_id);
        let messages = api.history(&session.token, contact_id).await?;
        let history = decrypt_history(&messages, &keys, &session.user.id);
        let seen = history
            .iter()
            .filter(|line| !line.id.is_empty())
            .map(|line| line.id.clone())
            .collect();
        tracing::info!(contact = %contact_id, messages = history.len(), "conversation opened");

        Ok(Self {
            contact_id: contact_id.to_string(),
            own_id: session.user.id.clone(),
            recipient_key,
            keys,
            realtime: realtime.clone(),
            subscription,
            history,
            seen,
        })
    }

    /// Contact's user id.
    #[must_use]
    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    /// History in display order, as decrypted at open time.
    #[must_use]
    pub fn history(&self) -> &[ChatLine] {
        &self.history
    }

    /// Seal `text` for both parties and hand it to the transport.
    ///
    /// Returns `Ok(None)` for blank input.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Crypto`] if the contact's key is unusable.
    pub fn send(&self, text: &str) -> Result<Option<SendOutcome>, ChatError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        let pair = seal_pair(text, &self.recipient_key, &self.keys)?;
        let handed_off = self.realtime.send_message(&self.contact_id, pair);
        if !handed_off {
            tracing::warn!(contact = %self.contact_id, "message not sent: realtime session is down");
        }
        Ok(Some(SendOutcome {
            line: ChatLine {
                id: String::new(),
                sender_id: self.own_id.clone(),
                text: text.to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                is_mine: true,
                decrypted: true,
            },
            handed_off,
        }))
    }

    /// Wait for the contact's next live message.
    ///
    /// Messages already listed in the history are skipped. Returns `None`
    /// once the subscription has been replaced by another conversation.
    pub async fn next_line(&mut self) -> Option<ChatLine> {
        loop {
            let message = self.subscription.recv().await?;
            if self.seen.contains(&message.id) {
                tracing::debug!(message = %message.id, "live message already in history");
                continue;
            }
            return Some(decrypt_line(&message, &self.keys, &self.own_id));
        }
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("contact_id", &self.contact_id)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}
