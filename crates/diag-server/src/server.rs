//! `LiveServer`: axum WebSocket server streaming trace records to viewers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use diag_core::{Subscription, ViewerPort};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::client::{self, Viewer, ViewerRegistry};
use crate::config::ServerConfig;
use crate::wire::{self, ErrorReply};

/// Replies queued per viewer before further error replies are dropped.
const REPLY_QUEUE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server transport already built")]
    AlreadyBuilt,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub port: ViewerPort,
    pub registry: Arc<ViewerRegistry>,
    pub cancel: CancellationToken,
    pub heartbeat_interval: Duration,
    pub max_message_size: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub viewers: usize,
    pub subscribers: usize,
    /// Records the slowest viewer has not received yet.
    pub pending: usize,
    pub session_closed: bool,
}

/// Live streaming server for one session's viewer port.
///
/// The listening socket is bound once, by [`build`](Self::build) or lazily
/// by [`run`](Self::run), and released when `run` returns.
pub struct LiveServer {
    config: ServerConfig,
    port: ViewerPort,
    registry: Arc<ViewerRegistry>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
}

impl LiveServer {
    pub fn new(config: ServerConfig, port: ViewerPort) -> Self {
        let registry = Arc::new(ViewerRegistry::new(config.heartbeat_timeout()));
        Self {
            config,
            port,
            registry,
            listener: None,
            local_addr: None,
        }
    }

    /// Bind the listening socket. Fails with `AlreadyBuilt` on a second call.
    pub async fn build(&mut self) -> Result<SocketAddr, ServerError> {
        if self.local_addr.is_some() {
            return Err(ServerError::AlreadyBuilt);
        }
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ViewerRegistry> {
        &self.registry
    }

    /// Build the axum router with all routes.
    pub fn router(&self, cancel: CancellationToken) -> Router {
        let state = AppState {
            port: self.port.clone(),
            registry: Arc::clone(&self.registry),
            cancel,
            heartbeat_interval: self.config.heartbeat_interval(),
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
    }

    /// Serve viewers until `cancel` fires, then disconnect them all.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ServerError> {
        if self.listener.is_none() {
            self.build().await?;
        }
        let listener = self.listener.take().ok_or(ServerError::AlreadyBuilt)?;
        let local_addr = listener.local_addr()?;
        let router = self.router(cancel.clone());

        let cleanup = client::start_cleanup_task(
            Arc::clone(&self.registry),
            self.config.heartbeat_interval(),
            cancel.child_token(),
        );

        info!(addr = %local_addr, "live server listening");
        let shutdown = cancel.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.registry.close_all();
        cleanup.abort();
        info!(addr = %local_addr, "live server stopped");
        result.map_err(ServerError::Io)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        viewers: state.registry.count(),
        subscribers: state.port.subscriber_count(),
        pending: state.port.pending(),
        session_closed: state.port.is_closed(),
    })
}

/// Drive one viewer: a writer task streaming records, pings and replies,
/// and a reader task forwarding control messages.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let viewer = state.registry.register(&state.cancel);
    // Subscribe before anything else so no record emitted after connect is missed.
    let subscription = state.port.subscribe();
    info!(viewer_id = %viewer.id, "viewer connected");

    let (ws_tx, ws_rx) = socket.split();
    let (reply_tx, reply_rx) = mpsc::channel::<String>(REPLY_QUEUE);

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        subscription,
        reply_rx,
        Arc::clone(&viewer),
        state.heartbeat_interval,
    ));
    let mut reader = tokio::spawn(read_loop(ws_rx, reply_tx, Arc::clone(&viewer), state.port));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {
            viewer.cancel_token().cancel();
            let _ = writer.await;
        }
    }

    state.registry.unregister(&viewer.id);
    info!(
        viewer_id = %viewer.id,
        connected_secs = viewer.connected_secs(),
        "viewer disconnected"
    );
}

fn close_message(code: u16, reason: &'static str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut subscription: Subscription,
    mut replies: mpsc::Receiver<String>,
    viewer: Arc<Viewer>,
    heartbeat: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            _ = viewer.cancel_token().cancelled() => {
                let _ = ws_tx.send(close_message(close_code::AWAY, "going away")).await;
                break;
            }
            record = subscription.recv() => match record {
                Some(record) => {
                    let text = match wire::encode_record(&record) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(viewer_id = %viewer.id, seq = record.seq, error = %err, "record encode failed");
                            continue;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None if subscription.is_detached() => {
                    warn!(viewer_id = %viewer.id, "viewer fell behind the trace, disconnecting");
                    let _ = ws_tx.send(close_message(close_code::AGAIN, "fell behind")).await;
                    break;
                }
                None => {
                    debug!(viewer_id = %viewer.id, "trace stream ended");
                    let _ = ws_tx.send(close_message(close_code::NORMAL, "trace complete")).await;
                    break;
                }
            },
            reply = replies.recv() => match reply {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::<u8>::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(viewer_id = %viewer.id, "sent ping");
            }
        }
    }
}

async fn read_loop(
    mut ws_rx: futures::stream::SplitStream<WebSocket>,
    replies: mpsc::Sender<String>,
    viewer: Arc<Viewer>,
    port: ViewerPort,
) {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => {
                let reply = match wire::parse_command(text.as_str()) {
                    Ok(control) => {
                        debug!(viewer_id = %viewer.id, command = control.name(), "control message");
                        match port.push_inbound(control).await {
                            Ok(()) => None,
                            Err(err) => Some(ErrorReply::from_queue(&err)),
                        }
                    }
                    Err(err) => {
                        debug!(viewer_id = %viewer.id, code = err.code(), error = %err, "rejected viewer message");
                        Some(ErrorReply::from(&err))
                    }
                };
                if let Some(reply) = reply {
                    if replies.try_send(reply.to_text()).is_err() {
                        warn!(viewer_id = %viewer.id, "reply queue full, dropping reply");
                    }
                }
            }
            WsMessage::Pong(_) => viewer.record_pong(),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}
