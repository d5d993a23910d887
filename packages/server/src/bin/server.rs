//! Parley chat transport server.
//!
//! Serves the WebSocket transport on `/ws` and the polling/session API under
//! `/api/chat`.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin parley-server -- --token dev-token=alice
//! PARLEY_TOKENS=t1=alice,t2=bob:admin cargo run --bin parley-server -- --port 3000
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use parley_server::{
    config::TransportConfig,
    infrastructure::{
        auth::StaticTokenValidator,
        rate_limit::{RateLimitPolicy, SlidingWindowRateLimiter},
    },
    ui::{AppState, Collaborators, Server},
};
use parley_shared::{
    logger::{LogFormat, setup_logger},
    time::{Clock, SystemClock},
};

#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(about = "Real-time chat transport with WebSocket and HTTP polling", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "PARLEY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "PARLEY_PORT", default_value = "8080")]
    port: u16,

    /// Accepted bearer tokens as `token=user[:role]`
    #[arg(long = "token", env = "PARLEY_TOKENS", value_delimiter = ',')]
    tokens: Vec<String>,

    /// Default log level for the server crates (overridden by RUST_LOG)
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "PARLEY_LOG_JSON")]
    log_json: bool,

    /// Chat messages allowed per user per minute
    #[arg(long, env = "PARLEY_MESSAGES_PER_MINUTE", default_value = "60")]
    messages_per_minute: u32,

    /// Socket connections allowed per user per minute
    #[arg(long, env = "PARLEY_CONNECTIONS_PER_MINUTE", default_value = "10")]
    connections_per_minute: u32,

    /// Session lifetime in seconds, fixed at creation
    #[arg(long, env = "PARLEY_SESSION_TTL_SECS", default_value = "86400")]
    session_ttl_secs: u64,

    /// Seconds before an unacknowledged frame is resent
    #[arg(long, env = "PARLEY_RETRY_INTERVAL_SECS", default_value = "30")]
    retry_interval_secs: u64,

    /// Resends before an unacknowledged frame is dropped
    #[arg(long, env = "PARLEY_MAX_RETRIES", default_value = "3")]
    max_retries: u32,
}

impl Args {
    fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::default();
        config.rate_limits.message = RateLimitPolicy::per_minute(self.messages_per_minute);
        config.rate_limits.connection = RateLimitPolicy::per_minute(self.connections_per_minute);
        config.session_ttl = Duration::from_secs(self.session_ttl_secs);
        config.delivery.retry_interval = Duration::from_secs(self.retry_interval_secs);
        config.delivery.max_retries = self.max_retries;
        config
    }
}

/// Idle rate-limit buckets are dropped on this period
const BUCKET_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let format = if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    setup_logger(
        &["parley_server", "parley_shared", "tower_http"],
        &args.log_level,
        format,
    );

    // Initialize dependencies in order:
    // 1. Configuration
    // 2. Collaborators
    // 3. AppState
    // 4. Server

    // 1. Configuration
    let config = args.transport_config();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 2. Collaborators (process-local implementations)
    let token_validator = StaticTokenValidator::from_specs(&args.tokens);
    if token_validator.is_empty() {
        tracing::warn!("No bearer tokens configured; every request will be rejected");
    } else {
        tracing::info!("{} bearer tokens configured", token_validator.len());
    }
    let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
        config.rate_limits,
        clock.clone(),
    ));
    let mut collaborators =
        Collaborators::in_memory(&config, Arc::new(token_validator), clock.clone());
    collaborators.rate_limiter = rate_limiter.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BUCKET_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let pruned = rate_limiter.prune_idle_buckets();
            if pruned > 0 {
                tracing::debug!("Pruned {} idle rate-limit buckets", pruned);
            }
        }
    });

    // 3. AppState / 4. Server
    let server = Server::new(AppState::new(config, collaborators));
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
