//! The realtime session: one WebSocket to the chat server per process.
//!
//! After the socket opens the client sends `{type:"auth", token}` and then
//! considers itself connected; the server never acknowledges. Inbound
//! `message` frames go to the open conversation's [`Subscription`] when the
//! sender matches it, and otherwise bump the [`UnreadTracker`].
//!
//! There is no reconnect: when the socket closes the session drops to
//! [`ConnectionState::Disconnected`] and waits for the next
//! [`RealtimeSession::connect`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tchat_proto::codec;
use tchat_proto::envelope::EnvelopePair;
use tchat_proto::frame::{ClientFrame, DeliveredMessage, OutgoingMessage, ServerFrame};

use super::{ConnectionState, TransportError, map_ws_error};
use crate::unread::UnreadTracker;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Type alias for the write half of the WebSocket connection.
type WsSender = SplitSink<WsStream, Message>;

/// Type alias for the read half of the WebSocket connection.
type WsReader = SplitStream<WsStream>;

/// Capacity of the unread-change notification channel.
const UNREAD_EVENT_CAPACITY: usize = 64;

/// Handle to the process-wide realtime session.
///
/// Cheap to clone; all clones share the same connection, subscription slot,
/// and unread counters.
#[derive(Clone)]
pub struct RealtimeSession {
    url: String,
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Link>>,
    route: Mutex<Option<Route>>,
    unread: Arc<Mutex<UnreadTracker>>,
    unread_events: broadcast::Sender<String>,
    /// Bumped by every `connect` attempt and every `disconnect`; a handshake
    /// or reader task whose epoch is stale must not touch the state.
    epoch: AtomicU64,
    next_subscription: AtomicU64,
}

/// The live connection.
struct Link {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

/// The registered conversation.
struct Route {
    id: u64,
    contact_id: String,
    tx: mpsc::UnboundedSender<DeliveredMessage>,
}

impl RealtimeSession {
    /// Create a disconnected session for the server at `url`
    /// (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>, unread: Arc<Mutex<UnreadTracker>>) -> Self {
        let (unread_events, _) = broadcast::channel(UNREAD_EVENT_CAPACITY);
        Self {
            url: url.into(),
            inner: Arc::new(Inner {
                state: Mutex::new(ConnectionState::Disconnected),
                link: Mutex::new(None),
                route: Mutex::new(None),
                unread,
                unread_events,
                epoch: AtomicU64::new(0),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }

    /// Server URL this session connects to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Open the connection and send the auth frame.
    ///
    /// Returns `Ok(false)` without doing anything when `token` is missing or
    /// empty, or when a connection is already open or opening. Returns
    /// `Ok(true)` once the socket is open and the auth frame was written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the socket cannot be opened or
    /// the auth frame cannot be written; the session is then
    /// [`ConnectionState::Disconnected`] again.
    pub async fn connect(&self, token: Option<&str>) -> Result<bool, TransportError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::debug!("realtime connect skipped: no session token");
            return Ok(false);
        };
        let epoch = {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Disconnected {
                tracing::debug!(state = %*state, "realtime connect skipped");
                return Ok(false);
            }
            *state = ConnectionState::Connecting;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1
        };

        tracing::info!(url = %self.url, "opening realtime session");
        match self.open(token).await {
            Ok((sink, reader)) => Ok(Inner::install(&self.inner, epoch, sink, reader)),
            Err(e) => {
                tracing::warn!(url = %self.url, err = %e, "realtime connect failed");
                self.inner.abandon(epoch);
                Err(e)
            }
        }
    }

    async fn open(&self, token: &str) -> Result<(WsSender, WsReader), TransportError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(map_ws_error)?;
        let (mut sink, reader) = ws_stream.split();
        let auth = codec::encode_client(&ClientFrame::Auth {
            token: token.to_string(),
        })?;
        sink.send(Message::text(auth)).await.map_err(map_ws_error)?;
        Ok((sink, reader))
    }

    /// Close the connection. Safe to call in any state; a handshake still in
    /// flight is abandoned.
    pub fn disconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let link = self.inner.link.lock().take();
        *self.inner.state.lock() = ConnectionState::Disconnected;
        if let Some(link) = link {
            let _ = link.outbound.send(Message::Close(None));
            link.reader.abort();
            tracing::info!("realtime session closed");
        }
    }

    /// Hand a frame to the connection. Fire-and-forget: returns `false` and
    /// drops the frame when not connected.
    pub fn send(&self, frame: &ClientFrame) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::debug!("realtime send dropped: not connected");
            return false;
        }
        let text = match codec::encode_client(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(err = %e, "realtime send dropped: encoding failed");
                return false;
            }
        };
        self.inner
            .link
            .lock()
            .as_ref()
            .is_some_and(|link| link.outbound.send(Message::text(text)).is_ok())
    }

    /// Send an outgoing message carrying both sealed copies.
    pub fn send_message(&self, receiver_id: &str, content: EnvelopePair) -> bool {
        self.send(&ClientFrame::Message(OutgoingMessage {
            receiver_id: receiver_id.to_string(),
            content,
        }))
    }

    /// Register the open conversation with `contact_id`.
    ///
    /// Messages from that contact are delivered to the returned
    /// [`Subscription`] instead of the unread counters. A new subscription
    /// replaces the previous one, whose stream then ends. Dropping the
    /// subscription unregisters it.
    pub fn subscribe(&self, contact_id: impl Into<String>) -> Subscription {
        let contact_id = contact_id.into();
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.inner.route.lock().replace(Route {
            id,
            contact_id: contact_id.clone(),
            tx,
        });
        if let Some(previous) = previous {
            tracing::debug!(replaced = %previous.contact_id, "conversation subscription replaced");
        }
        tracing::debug!(contact = %contact_id, "conversation subscribed");
        Subscription {
            id,
            contact_id,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Shared unread counters.
    #[must_use]
    pub fn unread(&self) -> Arc<Mutex<UnreadTracker>> {
        Arc::clone(&self.inner.unread)
    }

    /// Notifications carrying the contact id each time an unread counter is
    /// bumped by a live message.
    #[must_use]
    pub fn watch_unread(&self) -> broadcast::Receiver<String> {
        self.inner.unread_events.subscribe()
    }
}

impl Inner {
    /// Finish a handshake: start the reader and writer tasks, or close the
    /// socket if `disconnect` ran meanwhile.
    fn install(this: &Arc<Self>, epoch: u64, sink: WsSender, reader: WsReader) -> bool {
        let mut link = this.link.lock();
        if this.epoch.load(Ordering::SeqCst) != epoch {
            drop(link);
            tracing::debug!("realtime handshake abandoned");
            tokio::spawn(async move {
                let mut sink = sink;
                let _ = sink.close().await;
            });
            return false;
        }
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(sink, rx));
        let reader = tokio::spawn(reader_loop(reader, Arc::downgrade(this), epoch));
        *link = Some(Link {
            epoch,
            outbound,
            reader,
        });
        *this.state.lock() = ConnectionState::Connected;
        tracing::info!("realtime session connected");
        true
    }

    fn abandon(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            *self.state.lock() = ConnectionState::Disconnected;
        }
    }

    fn closed(&self, epoch: u64) {
        let mut link = self.link.lock();
        if link.as_ref().is_some_and(|l| l.epoch == epoch) {
            *link = None;
            *self.state.lock() = ConnectionState::Disconnected;
            tracing::info!("realtime session disconnected");
        }
    }

    fn dispatch(&self, text: &str) {
        match codec::decode_server(text) {
            Ok(ServerFrame::Message(message)) => self.route_message(message),
            Err(e) => tracing::warn!(err = %e, "ignoring unrecognized realtime frame"),
        }
    }

    fn route_message(&self, message: DeliveredMessage) {
        let target = self
            .route
            .lock()
            .as_ref()
            .filter(|route| route.contact_id == message.sender_id)
            .map(|route| route.tx.clone());
        let message = match target {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };
        self.unread.lock().increment(&message.sender_id);
        tracing::debug!(contact = %message.sender_id, "unread counter bumped");
        let _ = self.unread_events.send(message.sender_id);
    }
}

/// Background task that writes queued frames until the queue closes or a
/// close frame is written.
async fn writer_loop(mut sink: WsSender, mut outbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::warn!(err = %e, "realtime write failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Background task that reads text frames and routes them.
///
/// Unrecognized frames are logged and skipped. The task marks the session
/// disconnected when the socket closes or errors out.
async fn reader_loop(mut reader: WsReader, inner: Weak<Inner>, epoch: u64) {
    while let Some(result) = reader.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let Some(inner) = inner.upgrade() else { break };
                inner.dispatch(text.as_str());
            }
            Ok(Message::Close(_)) => {
                tracing::info!("realtime socket closed by server");
                break;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!("ignoring binary realtime frame");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "realtime socket read error");
                break;
            }
        }
    }
    if let Some(inner) = inner.upgrade() {
        inner.closed(epoch);
    }
}

/// The open conversation's claim on inbound messages from one contact.
///
/// Released when dropped.
pub struct Subscription {
    id: u64,
    contact_id: String,
    rx: mpsc::UnboundedReceiver<DeliveredMessage>,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Contact whose messages this subscription receives.
    #[must_use]
    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }

    /// Wait for the next message. Returns `None` once the subscription has
    /// been replaced or the session is gone.
    pub async fn recv(&mut self) -> Option<DeliveredMessage> {
        self.rx.recv().await
    }

    /// Take an already delivered message without waiting.
    pub fn try_recv(&mut self) -> Option<DeliveredMessage> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut route = inner.route.lock();
        if route.as_ref().is_some_and(|r| r.id == self.id) {
            *route = None;
            tracing::debug!(contact = %self.contact_id, "conversation unsubscribed");
        }
    }
}
