//! rtx-connector: client-side market data connection manager
//!
//! Keeps one supervised WebSocket to a price server, coalesces ticks per symbol,
//! delivers them in batches on a fixed interval and restores subscriptions
//! after every reconnect.

pub mod backoff;
pub mod command_queue;
pub mod config;
pub mod error;
pub mod flusher;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod priority;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod supervisor;
pub mod tick_buffer;
pub mod traits;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use command_queue::{CommandQueue, Enqueued};
pub use config::ManagerConfig;
pub use error::{ConnectorError, HandlerError, ResolverError};
pub use manager::MarketDataManager;
pub use message::{
    ChannelMessage, Command, Event, TickBatch, TickUpdate, TICKS_BATCH_CHANNEL, WILDCARD_CHANNEL,
};
pub use registry::{Registry, SubscriptionHandle};
pub use resolver::EnvResolver;
pub use server::{create_router, run_server, ServerState};
pub use supervisor::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use tick_buffer::FlushStats;
pub use traits::{CloseReason, Connector, KeyResolver, Link, LinkEvent};
pub use websocket::WebSocketConnector;
