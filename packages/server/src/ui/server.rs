//! Server execution logic.

use std::{future::Future, sync::Arc};

use axum::{
    Router,
    routing::{get, patch},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{
    handler::{
        create_session, debug_metrics, delete_session, get_messages, get_session, health_check,
        list_sessions, send_message, update_session_context, websocket_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// Chat transport server
///
/// # Example
///
/// ```ignore
/// let state = AppState::new(config, collaborators);
/// Server::new(state).run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/chat/messages", get(get_messages).post(send_message))
            .route("/api/chat/sessions", get(list_sessions).post(create_session))
            .route(
                "/api/chat/sessions/{session_id}",
                get(get_session).delete(delete_session),
            )
            .route(
                "/api/chat/sessions/{session_id}/context",
                patch(update_session_context),
            )
            .route("/api/health", get(health_check))
            .route("/debug/metrics", get(debug_metrics))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// Runs the session reaper for the lifetime of the server and closes every
    /// open socket once shutdown begins.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let reaper = tokio::spawn(
            self.state
                .session_lifecycle
                .clone()
                .run_reaper(self.state.config.session_reap_interval),
        );

        let registry = self.state.registry.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = registry.close_all();
                tracing::info!("Closing {} open connections", closed);
            })
            .await;

        reaper.abort();
        result
    }

    /// Run the server
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 8080)
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Chat server listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
