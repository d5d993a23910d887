//! WebSocket connection handlers.
//!
//! Each connection runs as one owning task (the reader) plus three dependent
//! tasks: the writer draining the outbound queue, the heartbeat ticker and
//! the staleness monitor, alongside the retry sweeper. All of them stop on
//! the connection's close signal.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::Response,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use parley_shared::time::timestamp_to_rfc3339;
use tokio::sync::{Mutex, mpsc};

use crate::{
    domain::{AuthContext, ConnectionId, Counter, RateLimitAction},
    infrastructure::{
        connection::{Connection, ConnectionState, Liveness},
        dto::websocket::{Frame, FrameType, error_code},
    },
    ui::state::AppState,
};

use super::{auth::RequestContext, error::ApiError};

type SharedSink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// `GET /ws`: authenticate, apply the connection rate limit, then upgrade
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    ctx.admit(&state, RateLimitAction::Connection)?;

    let user_id = ctx.user_id().clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            tracing::warn!("WebSocket upgrade for user '{}' failed: {}", user_id, e);
        })
        .on_upgrade(move |socket| handle_socket(socket, state, ctx.auth)))
}

/// Close codes that end a connection without indicating a fault
fn is_expected_close(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL | close_code::AWAY | close_code::STATUS | close_code::ABNORMAL
    )
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, auth: AuthContext) {
    let (connection, rx) = Connection::new(
        ConnectionId::generate(),
        auth.user_id,
        state.clock.now_millis(),
        state.config.outbound_queue_capacity,
    );
    let connection = Arc::new(connection);
    connection.transition(ConnectionState::Authenticated);

    state.registry.add(connection.clone());
    connection.transition(ConnectionState::Open);
    tracing::info!(
        "Connection '{}' opened for user '{}'",
        connection.id(),
        connection.user_id()
    );

    let status = Frame::new(
        FrameType::Status,
        "",
        timestamp_to_rfc3339(state.clock.now_millis()),
    )
    .with_meta("state", "connected")
    .with_meta("connection_id", connection.id().as_str());
    state.delivery.enqueue(&connection, status);
    state.router.announce_presence(&connection, "online");

    let (sink, stream) = socket.split();
    let sink: SharedSink = Arc::new(Mutex::new(sink));

    let writer = tokio::spawn(writer_loop(state.clone(), connection.clone(), rx, sink.clone()));
    let heartbeat = tokio::spawn(heartbeat_loop(state.clone(), connection.clone(), sink.clone()));
    let monitor = tokio::spawn(monitor_loop(state.clone(), connection.clone()));
    let sweeper = tokio::spawn(state.delivery.clone().run_sweeper(connection.clone()));

    reader_loop(&state, &connection, stream).await;

    // Teardown: fire the close signal and wait for the dependent tasks
    connection.close();
    let (writer, heartbeat, monitor, sweeper) = tokio::join!(writer, heartbeat, monitor, sweeper);
    for result in [writer, heartbeat, monitor, sweeper] {
        if let Err(e) = result {
            tracing::error!("Task of connection '{}' panicked: {}", connection.id(), e);
        }
    }
    if let Err(e) = sink.lock().await.close().await {
        tracing::debug!("Closing socket of '{}' failed: {}", connection.id(), e);
    }

    state.registry.remove(connection.id());
    connection.transition(ConnectionState::Closed);
    state.router.announce_presence(&connection, "offline");
    tracing::info!(
        "Connection '{}' closed ({} unacknowledged)",
        connection.id(),
        connection.pending_count()
    );
}

async fn reader_loop(
    state: &Arc<AppState>,
    connection: &Arc<Connection>,
    mut stream: SplitStream<WebSocket>,
) {
    loop {
        let message = tokio::select! {
            _ = connection.closed() => break,
            message = stream.next() => message,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                // Mostly peers vanishing without a close handshake
                state.metrics.increment(Counter::TransportErrors);
                tracing::debug!("Read from '{}' failed: {}", connection.id(), e);
                break;
            }
            None => break,
        };

        let now = state.clock.now_millis();
        match message {
            Message::Text(text) => {
                connection.touch(now);
                state.router.route_text(connection, text.as_str()).await;
            }
            Message::Binary(_) => {
                connection.touch(now);
                state.metrics.increment(Counter::ValidationErrors);
                let frame = Frame::error(
                    "",
                    error_code::VALIDATION,
                    "binary frames are not supported",
                    timestamp_to_rfc3339(now),
                );
                state.delivery.enqueue(connection, frame);
            }
            Message::Ping(_) => connection.touch(now),
            Message::Pong(_) => connection.record_pong(now),
            Message::Close(frame) => {
                match frame {
                    Some(CloseFrame { code, reason }) if !is_expected_close(code) => {
                        tracing::warn!(
                            "Connection '{}' closed by peer with code {}: {}",
                            connection.id(),
                            code,
                            reason.as_str()
                        );
                    }
                    _ => tracing::debug!("Connection '{}' closed by peer", connection.id()),
                }
                connection.transition(ConnectionState::Closing);
                break;
            }
        }
    }
}

async fn writer_loop(
    state: Arc<AppState>,
    connection: Arc<Connection>,
    mut rx: mpsc::Receiver<Frame>,
    sink: SharedSink,
) {
    loop {
        let frame = tokio::select! {
            _ = connection.closed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode {:?} frame: {}", frame.r#type, e);
                continue;
            }
        };

        let result = sink.lock().await.send(Message::Text(text.into())).await;
        if let Err(e) = result {
            state.metrics.increment(Counter::TransportErrors);
            tracing::warn!("Write to '{}' failed: {}", connection.id(), e);
            state.delivery.park_for_final_retry(&connection, frame);
            connection.close();
            break;
        }
    }
}

async fn heartbeat_loop(state: Arc<AppState>, connection: Arc<Connection>, sink: SharedSink) {
    let mut ticker = tokio::time::interval(state.config.heartbeat_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                let result = sink.lock().await.send(Message::Ping(Default::default())).await;
                if let Err(e) = result {
                    state.metrics.increment(Counter::TransportErrors);
                    tracing::warn!("Ping to '{}' failed: {}", connection.id(), e);
                    connection.close();
                    break;
                }
            }
        }
    }
}

async fn monitor_loop(state: Arc<AppState>, connection: Arc<Connection>) {
    let mut ticker = tokio::time::interval(state.config.monitor_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                let liveness = connection.liveness(
                    state.clock.now_millis(),
                    state.config.stale_timeout,
                    state.config.heartbeat_timeout,
                );
                match liveness {
                    Liveness::Healthy => {}
                    Liveness::HeartbeatOverdue => tracing::warn!(
                        "No pong from '{}' for over {:?}",
                        connection.id(),
                        state.config.heartbeat_timeout
                    ),
                    Liveness::Stale => {
                        tracing::info!("Closing stale connection '{}'", connection.id());
                        connection.close();
                        break;
                    }
                }
            }
        }
    }
}
