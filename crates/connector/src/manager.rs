//! Public entry point tying the components together
//!
//! Construct one `MarketDataManager` at the application root and share it by
//! clone. Dropping the last clone stops the flush scheduler and the session.

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::command_queue::{CommandQueue, Enqueued};
use crate::config::ManagerConfig;
use crate::error::HandlerError;
use crate::flusher::FlushScheduler;
use crate::message::{Command, Event, TickUpdate};
use crate::metrics::ConnectorMetrics;
use crate::priority::PrioritySet;
use crate::registry::{Registry, SubscriptionHandle};
use crate::supervisor::{ConnectionEvent, ConnectionState, ConnectionStatus, Supervisor};
use crate::tick_buffer::{FlushStats, TickBuffer};
use crate::traits::Connector;

struct Inner {
    config: ManagerConfig,
    supervisor: Supervisor,
    registry: Registry,
    queue: Arc<CommandQueue>,
    buffer: Arc<TickBuffer>,
    priority: Arc<PrioritySet>,
    flush_shutdown: watch::Sender<bool>,
    flush_task: AsyncMutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct MarketDataManager {
    inner: Arc<Inner>,
}

impl MarketDataManager {
    /// Build the manager and start its flush scheduler.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let metrics = ConnectorMetrics::new(config.feed.as_str());
        let queue = Arc::new(CommandQueue::new(
            config.command_queue_capacity,
            metrics.clone(),
        ));
        let registry = Registry::new(Arc::clone(&queue), metrics.clone());
        let buffer = Arc::new(TickBuffer::new(
            config.tick_buffer_capacity,
            metrics.clone(),
        ));
        let priority = Arc::new(PrioritySet::new());

        let supervisor = Supervisor::new(
            connector,
            config.clone(),
            registry.clone(),
            Arc::clone(&queue),
            Arc::clone(&buffer),
            metrics,
        );

        let (flush_shutdown, flush_rx) = watch::channel(false);
        let flush_task = FlushScheduler::new(
            config.feed.as_str(),
            Arc::clone(&buffer),
            Arc::clone(&priority),
            registry.clone(),
            config.flush_interval,
            config.stats_interval,
        )
        .spawn(flush_rx);

        Self {
            inner: Arc::new(Inner {
                config,
                supervisor,
                registry,
                queue,
                buffer,
                priority,
                flush_shutdown,
                flush_task: AsyncMutex::new(Some(flush_task)),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Open the connection; no-op if already connecting or connected
    pub fn connect(&self, endpoint: impl Into<String>, credential: Option<String>) -> bool {
        self.inner.supervisor.connect(endpoint, credential)
    }

    /// Close the connection and stop reconnecting. Subscriptions are kept.
    pub async fn disconnect(&self) {
        self.inner.supervisor.disconnect().await;
    }

    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(channel, handler)
    }

    /// Replace the set of symbols delivered first in each batch
    pub fn set_priority_symbols<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.priority.set(symbols);
    }

    /// Feed a tick into the current flush window
    pub fn buffer_tick(&self, tick: TickUpdate) {
        self.inner.buffer.buffer_tick(tick);
    }

    /// Send a command now, or hold it until the next connect
    pub fn enqueue(&self, command: Command) -> Enqueued {
        self.inner.queue.enqueue(command)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.supervisor.status()
    }

    /// Stream of state transitions
    pub fn state_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.supervisor.events()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.supervisor.status_watch()
    }

    /// Most recent delivered tick for `symbol`
    pub fn last_tick(&self, symbol: &str) -> Option<TickUpdate> {
        self.inner.buffer.last_tick(symbol)
    }

    pub fn stats(&self) -> FlushStats {
        self.inner.buffer.stats()
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        self.inner.registry.channels()
    }

    pub fn pending_commands(&self) -> usize {
        self.inner.queue.len()
    }

    /// Disconnect and stop the flush scheduler
    pub async fn shutdown(&self) {
        self.inner.supervisor.disconnect().await;
        let _ = self.inner.flush_shutdown.send(true);
        if let Some(task) = self.inner.flush_task.lock().await.take() {
            let _ = task.await;
        }
        info!(feed = %self.inner.config.feed, "Market data manager stopped");
    }
}
