//! Connection supervisor
//!
//! Owns the connection lifecycle: `Disconnected -> Connecting -> Connected`,
//! back to `Disconnected` on close. One tokio task per `connect()` drives
//! connect attempts, the heartbeat and the reconnect backoff, so transitions
//! are serialized and `disconnect()` cancels every timer by stopping that task.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::backoff::Backoff;
use crate::command_queue::CommandQueue;
use crate::config::ManagerConfig;
use crate::error::ConnectorError;
use crate::message::{parse_frame, Command, Event, Inbound};
use crate::metrics::ConnectorMetrics;
use crate::registry::Registry;
use crate::tick_buffer::TickBuffer;
use crate::traits::{CloseReason, Connector, Link, LinkEvent};

/// How long `disconnect()` waits for the session task before aborting it
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Buffered transitions per observer before it starts lagging
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive failed attempts since the last successful connect
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_error: None,
        }
    }
}

/// A state transition as seen by observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub state: ConnectionState,
    pub attempt: u32,
    pub reason: Option<CloseReason>,
    /// No reconnect will follow
    pub terminal: bool,
}

struct Shared {
    feed: String,
    connector: Arc<dyn Connector>,
    config: ManagerConfig,
    registry: Registry,
    queue: Arc<CommandQueue>,
    buffer: Arc<TickBuffer>,
    metrics: ConnectorMetrics,
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn transition(
        &self,
        state: ConnectionState,
        attempt: u32,
        reason: Option<CloseReason>,
        terminal: bool,
    ) {
        let last_error = match (&reason, state) {
            (_, ConnectionState::Connected) => None,
            (Some(reason), _) => Some(reason.to_string()),
            (None, _) => self.status.borrow().last_error.clone(),
        };
        self.status.send_replace(ConnectionStatus {
            state,
            attempt,
            last_error,
        });
        // No observers is fine
        let _ = self.events.send(ConnectionEvent {
            state,
            attempt,
            reason,
            terminal,
        });
    }

    fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn dispatch(&self, data: &[u8], pong_deadline: &mut Option<Instant>) {
        match parse_frame(data) {
            Ok(Inbound::Tick(tick)) => {
                self.buffer.buffer_tick(tick);
            }
            Ok(Inbound::Pong) => {
                trace!("Pong received");
                *pong_deadline = None;
            }
            Ok(Inbound::Channel(msg)) => {
                self.registry.route(&Event::Message(msg));
            }
            Err(e) => {
                warn!(
                    feed = %self.feed,
                    error = %e,
                    len = data.len(),
                    "Dropping malformed frame"
                );
                self.metrics.inc_malformed();
            }
        }
    }
}

struct SessionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Supervisor {
    shared: Arc<Shared>,
    session: Mutex<Option<SessionTask>>,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: ManagerConfig,
        registry: Registry,
        queue: Arc<CommandQueue>,
        buffer: Arc<TickBuffer>,
        metrics: ConnectorMetrics,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                feed: config.feed.clone(),
                connector,
                config,
                registry,
                queue,
                buffer,
                metrics,
                status,
                events,
            }),
            session: Mutex::new(None),
        }
    }

    /// Start the connection lifecycle. No-op while a session is live, including
    /// one waiting out a reconnect delay. Returns true if a session was started.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(&self, endpoint: impl Into<String>, credential: Option<String>) -> bool {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!(feed = %self.shared.feed, state = ?self.shared.state(), "Connect ignored, session already running");
            return false;
        }

        self.shared
            .transition(ConnectionState::Connecting, 0, None, false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_session(
            Arc::clone(&self.shared),
            endpoint.into(),
            credential,
            shutdown_rx,
        ));
        *session = Some(SessionTask {
            shutdown: shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the session: cancels reconnects and the heartbeat, closes the link.
    pub async fn disconnect(&self) {
        let task = self.session.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            let mut handle = task.handle;
            if timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                warn!(feed = %self.shared.feed, "Session task did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shared.queue.detach();
        if self.shared.state() != ConnectionState::Disconnected {
            self.shared.metrics.set_disconnected();
            self.shared.transition(
                ConnectionState::Disconnected,
                0,
                Some(CloseReason::ClientRequested),
                false,
            );
            info!(feed = %self.shared.feed, "Disconnected by client");
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(task) = self.session.get_mut().take() {
            task.handle.abort();
        }
    }
}

/// Resolves once shutdown is requested or the supervisor is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn reason_label(reason: &CloseReason) -> &'static str {
    match reason {
        CloseReason::Transient(_) => "transient",
        CloseReason::AuthRejected(_) => "auth_rejected",
        CloseReason::HeartbeatTimeout => "heartbeat_timeout",
        CloseReason::ClientRequested => "client_requested",
    }
}

async fn run_session(
    shared: Arc<Shared>,
    endpoint: String,
    credential: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = &shared.config;
    let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_cap);

    loop {
        info!(feed = %shared.feed, endpoint = %endpoint, attempt = backoff.attempt(), "Connecting");
        let attempt = select! {
            res = timeout(config.connect_timeout, shared.connector.connect(&endpoint, credential.as_deref())) => res,
            _ = shutdown_requested(&mut shutdown) => break,
        };

        let reason = match attempt {
            Ok(Ok(link)) => {
                backoff.reset();
                shared.metrics.set_connected();
                shared.transition(ConnectionState::Connected, 0, None, false);
                info!(feed = %shared.feed, "Connected");
                shared.registry.on_link_open(link.outbound.clone());

                let reason = run_link(&shared, link, &mut shutdown).await;
                shared.queue.detach();
                shared.metrics.set_disconnected();
                reason
            }
            Ok(Err(e)) => CloseReason::from(e),
            Err(_) => CloseReason::from(ConnectorError::Timeout(
                config.connect_timeout.as_millis() as u64,
            )),
        };

        if reason == CloseReason::ClientRequested {
            break;
        }
        shared.metrics.inc_disconnects(reason_label(&reason));

        if !reason.is_retryable() {
            error!(feed = %shared.feed, reason = %reason, "Connection rejected, not reconnecting");
            shared.transition(
                ConnectionState::Disconnected,
                backoff.attempt(),
                Some(reason),
                true,
            );
            return;
        }

        let delay = backoff.next_delay();
        warn!(
            feed = %shared.feed,
            reason = %reason,
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Connection lost, reconnecting"
        );
        shared.transition(
            ConnectionState::Disconnected,
            backoff.attempt(),
            Some(reason),
            false,
        );

        select! {
            _ = sleep(delay) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
        shared.transition(ConnectionState::Connecting, backoff.attempt(), None, false);
    }

    debug!(feed = %shared.feed, "Session task stopped");
}

/// Pump one live link until it closes. Returns why it closed.
async fn run_link(
    shared: &Shared,
    link: Link,
    shutdown: &mut watch::Receiver<bool>,
) -> CloseReason {
    let Link {
        outbound,
        mut inbound,
    } = link;
    let config = &shared.config;

    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        let deadline = pong_deadline;
        select! {
            _ = shutdown_requested(shutdown) => return CloseReason::ClientRequested,
            _ = heartbeat.tick() => {
                if pong_deadline.is_some() {
                    continue;
                }
                if !send_ping(&outbound) {
                    return CloseReason::Transient("link closed while sending ping".to_string());
                }
                pong_deadline = Some(Instant::now() + config.pong_timeout);
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                warn!(
                    feed = %shared.feed,
                    timeout_ms = config.pong_timeout.as_millis() as u64,
                    "No pong within timeout, closing link"
                );
                return CloseReason::HeartbeatTimeout;
            }
            event = inbound.recv() => match event {
                Some(LinkEvent::Frame(data)) => shared.dispatch(&data, &mut pong_deadline),
                Some(LinkEvent::Closed(reason)) => return reason,
                None => return CloseReason::Transient("link closed".to_string()),
            },
        }
    }
}

fn send_ping(outbound: &mpsc::UnboundedSender<String>) -> bool {
    match Command::Ping.to_frame() {
        Ok(frame) => outbound.send(frame).is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to serialize ping");
            true
        }
    }
}
