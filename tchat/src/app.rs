//! Explicit application context.
//!
//! [`App`] owns the local identity, the session store and the shared clients.
//! It wires the key lifecycle, session lifecycle, chat list and conversation
//! flows together.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tchat_proto::api::{ChatSummary, UserProfile};

use crate::api::{ApiClient, ApiError};
use crate::chat::{ChatError, Conversation};
use crate::config::{ClientConfig, ConfigError};
use crate::crypto::CryptoError;
use crate::crypto::keys::{FileKeyStore, Keypair, PeerKeyCache, initialize_keys};
use crate::session::{SessionError, SessionRecord, SessionStore};
use crate::transport::realtime::RealtimeSession;
use crate::unread::UnreadTracker;

/// Top-level error type for bootstrap and user commands.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Key bootstrap or a cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The session file could not be read or written.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Reading from the terminal failed.
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),

    /// The command needs a logged-in session.
    #[error("not logged in")]
    NotLoggedIn,
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Api(e) => Self::Api(e),
            ChatError::Crypto(e) => Self::Crypto(e),
        }
    }
}

/// Outcome of [`App::verify_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// No session was stored.
    Absent,
    /// The server accepted the token.
    Valid,
    /// The server rejected the token; the session was cleared.
    Rejected,
    /// The server could not be reached; the session was kept.
    Unreachable,
}

/// The running client.
pub struct App {
    config: ClientConfig,
    keys: Arc<Keypair>,
    sessions: SessionStore,
    session: Option<SessionRecord>,
    api: ApiClient,
    realtime: RealtimeSession,
    peer_keys: PeerKeyCache,
    publish: Option<JoinHandle<()>>,
}

impl App {
    /// Initialize the identity keys, open the session store and load any
    /// persisted session.
    ///
    /// # Errors
    ///
    /// Key bootstrap failures are fatal and returned as [`AppError::Crypto`].
    pub fn bootstrap(config: ClientConfig) -> Result<Self, AppError> {
        let data_dir = config.require_data_dir()?.to_path_buf();
        let keys = initialize_keys(&FileKeyStore::new(&data_dir))?;
        let sessions = SessionStore::new(&data_dir);
        let session = sessions.load()?;
        let api = ApiClient::new(&config.api_url, config.request_timeout)?;
        let realtime = RealtimeSession::new(
            config.ws_url.clone(),
            Arc::new(Mutex::new(UnreadTracker::new())),
        );
        tracing::info!(
            data_dir = %data_dir.display(),
            logged_in = session.is_some(),
            "client bootstrapped"
        );
        Ok(Self {
            config,
            keys: Arc::new(keys),
            sessions,
            session,
            api,
            realtime,
            peer_keys: PeerKeyCache::new(),
            publish: None,
        })
    }

    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Local identity keypair.
    #[must_use]
    pub fn keys(&self) -> &Keypair {
        &self.keys
    }

    /// Current session, if logged in.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionRecord> {
        self.session.as_ref()
    }

    /// Logged-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&UserProfile> {
        self.session.as_ref().map(|s| &s.user)
    }

    /// Shared realtime session.
    #[must_use]
    pub const fn realtime(&self) -> &RealtimeSession {
        &self.realtime
    }

    fn require_session(&self) -> Result<&SessionRecord, AppError> {
        self.session.as_ref().ok_or(AppError::NotLoggedIn)
    }

    /// Check the stored token with the server.
    ///
    /// A rejected token clears the session from memory and disk. An
    /// unreachable server leaves everything untouched. On success the
    /// realtime session is opened; failing to open it is only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the session file cannot be deleted or the server
    /// answers with something other than success or an auth failure.
    pub async fn verify_session(&mut self) -> Result<Verification, AppError> {
        let Some(token) = self.session.as_ref().map(|s| s.token.clone()) else {
            return Ok(Verification::Absent);
        };
        match self.api.me(&token).await {
            Ok(_) => {
                if let Err(e) = self.realtime.connect(Some(&token)).await {
                    tracing::warn!(err = %e, "session valid but realtime session unavailable");
                }
                Ok(Verification::Valid)
            }
            Err(ApiError::Authentication(reason)) => {
                tracing::info!(%reason, "stored session rejected, clearing it");
                self.session = None;
                self.sessions.delete()?;
                Ok(Verification::Rejected)
            }
            Err(ApiError::Network(e)) => {
                tracing::warn!(err = %e, "server unreachable, keeping stored session");
                Ok(Verification::Unreachable)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Log in, persist the session, publish the public key and open the
    /// realtime session.
    ///
    /// Publishing the key and opening the realtime session are best effort;
    /// failures are only logged.
    ///
    /// # Errors
    ///
    /// [`ApiError::Authentication`] for bad credentials, or
    /// [`AppError::Session`] if the session cannot be saved.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<&UserProfile, AppError> {
        let (token, user) = self.api.login(username, password).await?.into_parts();
        let record = SessionRecord { token, user };
        self.sessions.save(&record)?;
        tracing::info!(user = %record.user.username, "logged in");

        let api = self.api.clone();
        let publish_token = record.token.clone();
        let stripped = self.keys.stripped_public_key();
        self.publish = Some(tokio::spawn(async move {
            match api.publish_public_key(&publish_token, &stripped).await {
                Ok(()) => tracing::debug!("public key published"),
                Err(e) => tracing::warn!(err = %e, "failed to publish public key"),
            }
        }));

        self.realtime.disconnect();
        if let Err(e) = self.realtime.connect(Some(&record.token)).await {
            tracing::warn!(err = %e, "logged in without a realtime session");
        }
        Ok(&self.session.insert(record).user)
    }

    /// Wait for background work started by [`App::login`] to finish.
    pub async fn settle(&mut self) {
        if let Some(publish) = self.publish.take() {
            let _ = publish.await;
        }
    }

    /// Create an account. Does not log in.
    ///
    /// # Errors
    ///
    /// See [`ApiError`].
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<(), AppError> {
        self.api.register(username, email, password).await?;
        tracing::info!(user = %username, "registered");
        Ok(())
    }

    /// Close the realtime session and forget the stored session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] if the session file cannot be removed.
    pub fn logout(&mut self) -> Result<(), AppError> {
        self.realtime.disconnect();
        self.session = None;
        self.sessions.delete()?;
        self.realtime.unread().lock().reset_from(std::iter::empty());
        tracing::info!("logged out");
        Ok(())
    }

    /// Fetch the chat list, rebuild the unread counters from it and return
    /// it sorted by last message, newest first.
    ///
    /// # Errors
    ///
    /// [`AppError::NotLoggedIn`] without a session, otherwise see
    /// [`ApiError`].
    pub async fn refresh_chats(&self) -> Result<Vec<ChatSummary>, AppError> {
        let token = &self.require_session()?.token;
        let mut chats = self.api.chats(token).await?;
        self.realtime.unread().lock().reset_from(
            chats
                .iter()
                .map(|chat| (chat.id.clone(), chat.unread_count.unwrap_or(0))),
        );
        // ISO-8601 timestamps sort lexicographically; missing ones go last.
        chats.sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
        Ok(chats)
    }

    /// Find users by name.
    ///
    /// # Errors
    ///
    /// [`AppError::NotLoggedIn`] without a session, otherwise see
    /// [`ApiError`].
    pub async fn search(&self, username: &str) -> Result<Vec<ChatSummary>, AppError> {
        let token = &self.require_session()?.token;
        Ok(self.api.search(token, username).await?)
    }

    /// Open the conversation with `contact_id`.
    ///
    /// # Errors
    ///
    /// [`AppError::NotLoggedIn`] without a session, otherwise see
    /// [`ChatError`].
    pub async fn open_conversation(&self, contact_id: &str) -> Result<Conversation, AppError> {
        let session = self.require_session()?;
        Ok(Conversation::open(
            &self.api,
            session,
            Arc::clone(&self.keys),
            &self.peer_keys,
            &self.realtime,
            contact_id,
        )
        .await?)
    }

    /// Current unread counters.
    #[must_use]
    pub fn unread(&self) -> HashMap<String, u32> {
        self.realtime.unread().lock().snapshot()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("session", &self.session)
            .field("realtime", &self.realtime.state())
            .finish_non_exhaustive()
    }
}
