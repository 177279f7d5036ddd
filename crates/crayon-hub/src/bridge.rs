use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use crayon_core::host_ipc::{
    decode_frame, encode_frame, ErrorPayload, FrameError, GetExchangePayload, HelloPayload,
    UpdateColorPayload, WireEnvelope, WireMsg, CURRENT_PROTOCOL_VERSION, DEFAULT_MAX_FRAME_BYTES,
};
use crayon_core::{Exchange, ExchangePage, FeedQuery, ResponseSummary};
use crayon_engine::{ColorEngine, ColorWriter, ExchangeSource, SourceError, WriteError};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub sender_id: String,
    pub request_timeout: Duration,
    pub write_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            sender_id: "crayon-hub".to_string(),
            request_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no plugin host connected")]
    NoHost,
    #[error("plugin host disconnected")]
    Disconnected,
    #[error("plugin host did not answer {kind} within {after:?}")]
    Timeout { kind: &'static str, after: Duration },
    #[error("host error {code}: {message}")]
    Host { code: String, message: String },
    #[error("unexpected reply {got} to {kind}")]
    UnexpectedReply { kind: &'static str, got: &'static str },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl From<BridgeError> for SourceError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::NoHost => SourceError::Unavailable(err.to_string()),
            BridgeError::UnexpectedReply { .. } | BridgeError::Frame(_) => {
                SourceError::Protocol(err.to_string())
            }
            _ => SourceError::Transport(err.to_string()),
        }
    }
}

impl From<BridgeError> for WriteError {
    fn from(err: BridgeError) -> Self {
        WriteError::Transport(err.to_string())
    }
}

#[derive(Clone)]
struct HostConnection {
    conn_id: String,
    client_id: String,
    sender: mpsc::Sender<Message>,
}

/// What the socket loop should do with one inbound frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Inbound {
    Delivered,
    Orphaned(String),
    HostError(ErrorPayload),
    ResponseCompleted { id: String, response: ResponseSummary },
    Rejected(&'static str),
}

/// WebSocket link to the traffic tool's plugin host. Serves as the engine's
/// exchange source and color writer by turning each call into a correlated
/// request frame.
pub struct HostBridge {
    config: BridgeConfig,
    conn_counter: AtomicU64,
    request_counter: AtomicU64,
    host: RwLock<Option<HostConnection>>,
    inflight: Mutex<HashMap<String, oneshot::Sender<WireMsg>>>,
}

impl HostBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            request_counter: AtomicU64::new(0),
            host: RwLock::new(None),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn host_client_id(&self) -> Option<String> {
        self.host
            .read()
            .await
            .as_ref()
            .map(|host| host.client_id.clone())
    }

    pub async fn handle_socket(
        self: Arc<Self>,
        socket: WebSocket,
        remote: SocketAddr,
        engine: Arc<ColorEngine>,
    ) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(256);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
            }
        });

        let accepted = match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => accept_hello(&text, self.config.max_frame_bytes),
            _ => Err(HelloRejected::new("expected_hello", "first frame was not text")),
        };
        let hello = match accepted {
            Ok(value) => value,
            Err(rejected) => {
                warn!(
                    event = "hello_rejected",
                    remote = %remote,
                    code = rejected.code,
                    error = %rejected.detail
                );
                self.reject_hello(&tx, rejected).await;
                drop(tx);
                let _ = write_task.await;
                return;
            }
        };

        let conn_id = self.register_host(hello.client_id.clone(), tx.clone()).await;
        info!(
            event = "handshake_ok",
            conn_id = %conn_id,
            client_id = %hello.client_id,
            capabilities = ?hello.capabilities
        );

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %conn_id, error = %err);
                    break;
                }
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(event = "message_invalid", conn_id = %conn_id, error = "non_utf8");
                        continue;
                    }
                },
                Message::Close(_) => {
                    info!(event = "host_close", conn_id = %conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            let envelope: WireEnvelope = match decode_frame(&text, self.config.max_frame_bytes) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "message_invalid", conn_id = %conn_id, error = %err);
                    continue;
                }
            };
            if let Err(err) = validate_envelope(&envelope) {
                warn!(event = "message_invalid", conn_id = %conn_id, error = err);
                continue;
            }

            let request_id = envelope.request_id.clone();
            match self.route_inbound(envelope) {
                Inbound::Delivered => {}
                Inbound::Orphaned(request_id) => {
                    warn!(event = "reply_orphaned", conn_id = %conn_id, request_id = %request_id);
                }
                Inbound::HostError(payload) => {
                    warn!(
                        event = "host_error",
                        conn_id = %conn_id,
                        code = %payload.code,
                        message = %payload.message
                    );
                }
                Inbound::ResponseCompleted { id, response } => {
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        engine.handle_response_completed(&id, &response).await;
                    });
                }
                Inbound::Rejected(code) => {
                    warn!(event = "message_rejected", conn_id = %conn_id, code = code);
                    self.send_error(&tx, code, request_id).await;
                }
            }
        }

        self.unregister_host(&conn_id).await;
        drop(tx);
        let _ = write_task.await;
    }

    /// Installs a host connection; a newer host replaces the current one.
    pub(crate) async fn register_host(
        &self,
        client_id: String,
        sender: mpsc::Sender<Message>,
    ) -> String {
        let conn_id = format!(
            "host-{}",
            self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        let previous = self.host.write().await.replace(HostConnection {
            conn_id: conn_id.clone(),
            client_id,
            sender,
        });
        if let Some(previous) = previous {
            info!(event = "host_replaced", old_conn_id = %previous.conn_id, conn_id = %conn_id);
            let _ = previous
                .sender
                .send(Message::Close(Some(CloseFrame {
                    code: 1000,
                    reason: "replaced".into(),
                })))
                .await;
        }
        conn_id
    }

    /// Drops the host if it is still `conn_id` and fails its in-flight
    /// requests. Returns whether anything was removed.
    pub(crate) async fn unregister_host(&self, conn_id: &str) -> bool {
        let mut host = self.host.write().await;
        if host.as_ref().map(|current| current.conn_id.as_str()) != Some(conn_id) {
            return false;
        }
        *host = None;
        drop(host);

        let failed = {
            let mut inflight = self.inflight();
            let count = inflight.len();
            inflight.clear();
            count
        };
        info!(event = "host_disconnected", conn_id = conn_id, failed_requests = failed);
        true
    }

    pub(crate) fn route_inbound(&self, envelope: WireEnvelope) -> Inbound {
        match envelope.msg {
            WireMsg::ResponseCompleted(payload) => match payload.exchange.response {
                Some(response) => Inbound::ResponseCompleted {
                    id: payload.exchange.id,
                    response,
                },
                None => Inbound::Rejected("missing_response"),
            },
            WireMsg::Error(payload) if envelope.request_id.is_none() => Inbound::HostError(payload),
            msg @ (WireMsg::FeedPage(_)
            | WireMsg::ExchangeRecord(_)
            | WireMsg::ColorResult(_)
            | WireMsg::Error(_)) => {
                let Some(request_id) = envelope.request_id else {
                    return Inbound::Rejected("missing_request_id");
                };
                if self.complete(&request_id, msg) {
                    Inbound::Delivered
                } else {
                    Inbound::Orphaned(request_id)
                }
            }
            WireMsg::Hello(_) => Inbound::Rejected("unexpected_hello"),
            WireMsg::QueryFeed(_) | WireMsg::GetExchange(_) | WireMsg::UpdateColor(_) => {
                Inbound::Rejected("unsupported_message")
            }
        }
    }

    fn complete(&self, request_id: &str, reply: WireMsg) -> bool {
        let waiter = self.inflight().remove(request_id);
        match waiter {
            Some(waiter) => waiter.send(reply).is_ok(),
            None => false,
        }
    }

    async fn request(&self, msg: WireMsg) -> Result<WireMsg, BridgeError> {
        let Some(host) = self.host.read().await.clone() else {
            return Err(BridgeError::NoHost);
        };

        let kind = msg.kind();
        let request_id = format!(
            "req-{}",
            self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
        );
        let envelope = WireEnvelope::new(&self.config.sender_id, msg).with_request_id(&request_id);
        let frame = encode_frame(&envelope, self.config.max_frame_bytes)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.inflight().insert(request_id.clone(), reply_tx);
        if host.sender.send(Message::Text(frame)).await.is_err() {
            self.inflight().remove(&request_id);
            return Err(BridgeError::Disconnected);
        }
        debug!(
            event = "host_request",
            conn_id = %host.conn_id,
            request_id = %request_id,
            kind = kind
        );

        let reply = match tokio::time::timeout(self.config.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(BridgeError::Disconnected),
            Err(_) => {
                self.inflight().remove(&request_id);
                return Err(BridgeError::Timeout {
                    kind,
                    after: self.config.request_timeout,
                });
            }
        };

        match reply {
            WireMsg::Error(payload) => Err(BridgeError::Host {
                code: payload.code,
                message: payload.message,
            }),
            reply => Ok(reply),
        }
    }

    /// Answers a failed handshake with an error frame, then closes the socket.
    async fn reject_hello(&self, sender: &mpsc::Sender<Message>, rejected: HelloRejected) {
        self.send_error(sender, rejected.code, rejected.request_id).await;
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 1008,
                reason: rejected.code.into(),
            })))
            .await;
    }

    async fn send_error(
        &self,
        sender: &mpsc::Sender<Message>,
        code: &str,
        request_id: Option<String>,
    ) {
        let mut envelope = WireEnvelope::new(
            &self.config.sender_id,
            WireMsg::Error(ErrorPayload {
                code: code.to_string(),
                message: code.replace('_', " "),
            }),
        );
        envelope.request_id = request_id;
        if let Ok(frame) = encode_frame(&envelope, self.config.max_frame_bytes) {
            let _ = sender.send(Message::Text(frame)).await;
        }
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<WireMsg>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExchangeSource for HostBridge {
    async fn query(&self, query: FeedQuery) -> Result<ExchangePage, SourceError> {
        match self.request(WireMsg::QueryFeed(query)).await? {
            WireMsg::FeedPage(page) => Ok(page),
            other => Err(BridgeError::UnexpectedReply {
                kind: "query_feed",
                got: other.kind(),
            }
            .into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Exchange>, SourceError> {
        let request = WireMsg::GetExchange(GetExchangePayload { id: id.to_string() });
        match self.request(request).await? {
            WireMsg::ExchangeRecord(record) => Ok(record.exchange),
            other => Err(BridgeError::UnexpectedReply {
                kind: "get_exchange",
                got: other.kind(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl ColorWriter for HostBridge {
    async fn write_color(&self, id: &str, color: &str) -> Result<(), WriteError> {
        let request = WireMsg::UpdateColor(UpdateColorPayload {
            id: id.to_string(),
            color: color.to_string(),
        });
        match self.request(request).await? {
            WireMsg::ColorResult(result) => WriteError::check(result.errors),
            other => Err(BridgeError::UnexpectedReply {
                kind: "update_color",
                got: other.kind(),
            }
            .into()),
        }
    }
}

fn validate_envelope(envelope: &WireEnvelope) -> Result<(), &'static str> {
    if envelope.sender_id.is_empty() || envelope.timestamp.is_empty() {
        return Err("missing_required_fields");
    }
    if envelope.version.0 != CURRENT_PROTOCOL_VERSION {
        return Err("unsupported_version");
    }
    if chrono::DateTime::parse_from_rfc3339(&envelope.timestamp).is_err() {
        return Err("invalid_timestamp");
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HelloRejected {
    code: &'static str,
    detail: String,
    request_id: Option<String>,
}

impl HelloRejected {
    fn new(code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            request_id: None,
        }
    }
}

fn accept_hello(text: &str, max_frame_bytes: usize) -> Result<HelloPayload, HelloRejected> {
    let envelope: WireEnvelope = decode_frame(text, max_frame_bytes)
        .map_err(|err| HelloRejected::new("hello_parse", err.to_string()))?;
    match validate_hello(&envelope) {
        Ok(hello) => Ok(hello.clone()),
        Err(code) => Err(HelloRejected {
            code,
            detail: format!("{} from {}", envelope.msg.kind(), envelope.sender_id),
            request_id: envelope.request_id.clone(),
        }),
    }
}

fn validate_hello(envelope: &WireEnvelope) -> Result<&HelloPayload, &'static str> {
    validate_envelope(envelope)?;
    let WireMsg::Hello(hello) = &envelope.msg else {
        return Err("expected_hello");
    };
    if hello.client_id.is_empty() {
        return Err("missing_client_id");
    }
    if hello.client_id != envelope.sender_id {
        return Err("client_id_mismatch");
    }
    Ok(hello)
}
