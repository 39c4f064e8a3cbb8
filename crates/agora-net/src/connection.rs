//! Push-channel connection with a tokio task per connection attempt.
//!
//! The socket runs in a dedicated task. Outbound envelopes reach it through
//! an mpsc sender held while the link is open; inbound frames are decoded in
//! the task and published as [`ConnectionEvent`]s. There is no automatic
//! reconnection: a closed link stays closed until `reconnect_requested()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use agora_shared::constants::SESSION_COOKIE_NAME;
use agora_shared::{ConnectionState, InboundEnvelope, OutboundEnvelope};

use crate::error::{NetError, Result};

/// Notifications sent *from* the connection task to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The link moved to a new lifecycle state.
    StateChanged(ConnectionState),
    /// A well-formed envelope of a known type arrived.
    Envelope(InboundEnvelope),
}

/// Outbound side of the push channel as seen by the session.
pub trait EnvelopeSink: Send + Sync {
    /// Send `envelope` if the link is open. Returns whether it was handed to
    /// the socket; a closed link drops it.
    fn send(&self, envelope: &OutboundEnvelope) -> bool;

    fn is_open(&self) -> bool;
}

struct Link {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    /// Bumped on every connect/close so a finished task cannot clobber a
    /// newer link.
    epoch: u64,
}

struct Inner {
    url: String,
    session_cookie: Option<String>,
    link: Mutex<Link>,
    events: mpsc::Sender<ConnectionEvent>,
}

/// Owner of the single push-channel connection of a session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    ///
    /// Returns the manager and the receiver of its notifications.
    pub fn new(
        url: impl Into<String>,
        session_cookie: Option<String>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::channel(256);
        let inner = Inner {
            url: url.into(),
            session_cookie,
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                outbound: None,
                epoch: 0,
            }),
            events,
        };
        (Self { inner: Arc::new(inner) }, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_link().state
    }

    /// Open the channel. No-op while connecting or open.
    pub fn connect(&self) {
        let epoch = {
            let mut link = self.inner.lock_link();
            if !link.state.can_connect() {
                debug!(state = ?link.state, "connect ignored: channel already active");
                return;
            }
            link.state = ConnectionState::Connecting;
            link.epoch += 1;
            link.epoch
        };
        self.inner.notify_state(ConnectionState::Connecting);

        info!(url = %self.inner.url, "connecting push channel");
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(epoch).await;
        });
    }

    /// Re-open the channel after re-authentication. Only acts when the link
    /// is closed or was never opened.
    pub fn reconnect_requested(&self) {
        if self.state().can_connect() {
            info!("reconnect requested");
            self.connect();
        }
    }

    /// Close the channel explicitly.
    pub fn close(&self) {
        let outbound = {
            let mut link = self.inner.lock_link();
            if link.state == ConnectionState::Closed {
                return;
            }
            link.state = ConnectionState::Closed;
            link.epoch += 1;
            link.outbound.take()
        };

        if let Some(tx) = outbound {
            let _ = tx.send(WsMessage::Close(None));
        }
        info!("push channel closed by client");
        self.inner.notify_state(ConnectionState::Closed);
    }
}

impl EnvelopeSink for ConnectionManager {
    fn send(&self, envelope: &OutboundEnvelope) -> bool {
        let link = self.inner.lock_link();
        let tx = match (&link.state, &link.outbound) {
            (ConnectionState::Open, Some(tx)) => tx,
            (state, _) => {
                warn!(kind = envelope.kind(), state = ?state, "dropping outbound envelope: channel not open");
                return false;
            }
        };

        match envelope.to_json() {
            Ok(json) => {
                debug!(kind = envelope.kind(), "sending envelope");
                tx.send(WsMessage::Text(json.into())).is_ok()
            }
            Err(e) => {
                warn!(kind = envelope.kind(), error = %e, "failed to encode envelope");
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_state(&self, state: ConnectionState) {
        if let Err(e) = self.events.try_send(ConnectionEvent::StateChanged(state)) {
            warn!(state = ?state, error = %e, "failed to publish connection state");
        }
    }

    /// Move to `state` only if `epoch` still owns the link.
    fn transition(&self, epoch: u64, state: ConnectionState) -> bool {
        let mut link = self.lock_link();
        if link.epoch != epoch {
            return false;
        }
        link.state = state;
        if state != ConnectionState::Open {
            link.outbound = None;
        }
        drop(link);
        self.notify_state(state);
        true
    }

    async fn run(self: Arc<Self>, epoch: u64) {
        let request = match build_request(&self.url, self.session_cookie.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid push channel request");
                self.transition(epoch, ConnectionState::Closed);
                return;
            }
        };

        let ws = match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(error = %e, "push channel connect failed");
                self.transition(epoch, ConnectionState::Closed);
                return;
            }
        };

        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        {
            let mut link = self.lock_link();
            if link.epoch != epoch {
                debug!("connection superseded before opening");
                return;
            }
            link.outbound = Some(tx);
        }
        self.transition(epoch, ConnectionState::Open);
        info!("push channel open");

        loop {
            tokio::select! {
                out = rx.recv() => {
                    let Some(msg) = out else { break };
                    let closing = matches!(msg, WsMessage::Close(_));
                    if let Err(e) = write.send(msg).await {
                        warn!(error = %e, "push channel write failed");
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => self.dispatch(text.as_str()).await,
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(frame = ?frame, "push channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "push channel error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if self.transition(epoch, ConnectionState::Closed) {
            info!("push channel ended");
        }
    }

    async fn dispatch(&self, text: &str) {
        match InboundEnvelope::parse(text) {
            Ok(envelope) => {
                debug!(kind = envelope.kind(), "envelope received");
                if self.events.send(ConnectionEvent::Envelope(envelope)).await.is_err() {
                    warn!("connection event receiver dropped");
                }
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping push frame");
            }
        }
    }
}

fn build_request(url: &str, session_cookie: Option<&str>) -> Result<Request> {
    let mut request = url.into_client_request()?;
    if let Some(cookie) = session_cookie {
        let value = HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={cookie}"))
            .map_err(|_| NetError::InvalidCookie)?;
        request.headers_mut().insert(COOKIE, value);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agora_shared::protocol::TypingSignal;
    use agora_shared::{ChatId, UserId};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn stop_typing() -> OutboundEnvelope {
        OutboundEnvelope::StopTyping(TypingSignal {
            chat_id: ChatId(1),
            receiver_id: Some(UserId::new("b")),
            sender_id: UserId::new("a"),
            sender_name: None,
        })
    }

    async fn next_event(rx: &mut mpsc::Receiver<ConnectionEvent>) -> ConnectionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    #[test]
    fn test_request_carries_session_cookie() {
        let request = build_request("ws://localhost:8080/ws", Some("abc")).unwrap();
        assert_eq!(request.headers().get(COOKIE).unwrap(), "session=abc");
    }

    #[test]
    fn test_request_rejects_bad_cookie() {
        assert!(matches!(
            build_request("ws://localhost:8080/ws", Some("a\nb")),
            Err(NetError::InvalidCookie)
        ));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (manager, _rx) = ConnectionManager::new("ws://127.0.0.1:1/ws", None);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_open());
        assert!(!manager.send(&stop_typing()));
    }

    #[tokio::test]
    async fn test_failed_connect_ends_closed_and_can_retry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (manager, mut rx) = ConnectionManager::new(format!("ws://{addr}/ws"), None);
        manager.connect();
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::StateChanged(ConnectionState::Closed)
        );

        manager.reconnect_requested();
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
    }

    #[tokio::test]
    async fn test_loopback_dispatch_and_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in [
                "not json",
                r#"{"type":"reaction","emoji":"+1"}"#,
                r#"{"type":"typing","chatId":1,"senderId":"b","senderName":"bob"}"#,
                r#"{"type":"presence_update"}"#,
            ] {
                ws.send(WsMessage::Text(frame.into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Text(text) = msg {
                    seen_tx.send(text.as_str().to_string()).unwrap();
                }
            }
        });

        let (manager, mut rx) = ConnectionManager::new(format!("ws://{addr}/ws"), None);
        manager.connect();
        // A second call while connecting is ignored.
        manager.connect();

        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        );
        assert_eq!(
            next_event(&mut rx).await,
            ConnectionEvent::StateChanged(ConnectionState::Open)
        );

        match next_event(&mut rx).await {
            ConnectionEvent::Envelope(InboundEnvelope::Typing(signal)) => {
                assert_eq!(signal.sender_id, UserId::new("b"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_event(&mut rx).await {
            ConnectionEvent::Envelope(env) => assert_eq!(env.kind(), "presence_update"),
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(manager.send(&stop_typing()));
        let seen = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(seen.contains(r#""type":"stop_typing""#));

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.send(&stop_typing()));
    }
}
