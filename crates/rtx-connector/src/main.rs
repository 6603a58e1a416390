//! rtx-connector: market data connection manager binary
//!
//! Holds one supervised WebSocket to the price server, logs coalesced tick
//! batches and channel messages, and serves health and metrics endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtx_connector_lib::{
    EnvResolver, Event, KeyResolver, ManagerConfig, MarketDataManager, ServerState,
    WebSocketConnector, TICKS_BATCH_CHANNEL,
};
use rtx_metadata::Feed;

#[derive(Parser, Debug)]
#[command(name = "rtx-connector")]
#[command(about = "Streaming market data connection manager")]
struct Args {
    /// Path to feed configuration file
    #[arg(short, long, env = "RTX_FEED")]
    feed: PathBuf,

    /// Health server bind address
    #[arg(long, env = "RTX_HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let health_addr: SocketAddr = args.health_addr.parse()?;

    let feed = Feed::load(&args.feed)?;
    info!(feed = %feed.name, endpoint = %feed.endpoint, "Loaded feed configuration");

    let credential = match feed.credential.as_deref() {
        Some(source) => Some(EnvResolver::new().resolve(source).map_err(|e| {
            error!(error = %e, source = %source, "Failed to resolve credential");
            e
        })?),
        None => None,
    };

    let manager = MarketDataManager::new(
        ManagerConfig::from_feed(&feed),
        Arc::new(WebSocketConnector::new()),
    );
    manager.set_priority_symbols(feed.priority_symbols.iter().cloned());

    let _batches = manager.subscribe(TICKS_BATCH_CHANNEL, |event| {
        if let Event::TicksBatch(batch) = event {
            debug!(
                size = batch.len(),
                first = batch.entries.first().map(|t| t.symbol()),
                "Tick batch"
            );
        }
        Ok(())
    });
    let _channels: Vec<_> = feed
        .channels
        .iter()
        .map(|channel| {
            manager.subscribe(channel.as_str(), |event| {
                if let Event::Message(msg) = event {
                    debug!(channel = %msg.channel, kind = %msg.kind, "Channel message");
                }
                Ok(())
            })
        })
        .collect();

    let server_state = ServerState::new(&feed.name, manager.status_watch());
    tokio::spawn(async move {
        if let Err(e) = rtx_connector_lib::run_server(health_addr, server_state).await {
            error!(error = %e, "Health server error");
        }
    });
    info!(addr = %health_addr, "Health server started");

    let mut events = manager.state_events();
    manager.connect(feed.endpoint.as_str(), credential);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            event = events.recv() => match event {
                Ok(event) if event.terminal => {
                    error!(reason = ?event.reason, "Connection rejected, shutting down");
                    manager.shutdown().await;
                    return Err("connection rejected by server".into());
                }
                Ok(event) => debug!(state = ?event.state, attempt = event.attempt, "Connection state changed"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "State observer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    info!("Connector stopped gracefully");
    Ok(())
}
