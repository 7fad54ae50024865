//! Relay server binary.
//!
//! Runs the WebSocket relay alongside a small HTTP surface for
//! dashboards: live stats, a counter reset switch, and a health probe.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin huddle-server
//! cargo run --bin huddle-server -- --bind 0.0.0.0:9090 --http-bind 0.0.0.0:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use huddle_relay::server::{RelayConfig, RelayServer};
use tokio::sync::broadcast::error::RecvError;

mod http;

#[derive(Parser, Debug)]
#[command(name = "huddle-server")]
#[command(about = "WebSocket signaling and whiteboard relay", long_about = None)]
struct Args {
    /// Address for the WebSocket relay
    #[arg(long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// Address for the HTTP stats API
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_bind: String,

    /// Path the WebSocket handshake must request
    #[arg(long, default_value = "/relay")]
    path: String,

    /// Origin admitted during the WebSocket handshake (repeatable).
    /// Omitting the flag admits every origin.
    #[arg(long = "allow-origin")]
    allow_origin: Vec<String>,

    /// Snapshots retained per whiteboard
    #[arg(long, default_value_t = huddle_relay::whiteboard::HISTORY_CAP)]
    history_cap: usize,

    /// Outbound frame queue length per connection
    #[arg(long, default_value_t = 256)]
    outbound_queue: usize,

    /// Event bus capacity per dashboard subscriber
    #[arg(long, default_value_t = 256)]
    event_capacity: usize,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = Args::parse();

    let config = RelayConfig {
        bind_addr: args.bind.clone(),
        endpoint_path: args.path.clone(),
        allowed_origins: args.allow_origin.clone(),
        history_cap: args.history_cap,
        outbound_queue: args.outbound_queue,
        event_capacity: args.event_capacity,
    };
    let relay = Arc::new(RelayServer::new(config));

    // Dashboard feed: one log line per relay event.
    let mut events = relay.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log::info!("{}", event.describe()),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("dashboard feed lagged, {missed} events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // WebSocket relay.
    let ws_relay = relay.clone();
    tokio::spawn(async move {
        if let Err(e) = ws_relay.run().await {
            log::error!("relay error: {e}");
            std::process::exit(1);
        }
    });

    // HTTP stats surface.
    let app = http::build_router(relay.clone(), &args.allow_origin);
    let listener = match tokio::net::TcpListener::bind(&args.http_bind).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind {}: {e}", args.http_bind);
            std::process::exit(1);
        }
    };
    log::info!("stats API listening on http://{}", args.http_bind);
    log::info!(
        "relay endpoint: ws://{}{}",
        relay.bind_addr(),
        relay.config().endpoint_path
    );

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        log::error!("HTTP server error: {e}");
        std::process::exit(1);
    }

    log::info!("shutdown complete");
}

/// Resolve on Ctrl+C or SIGTERM so both servers wind down together.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
