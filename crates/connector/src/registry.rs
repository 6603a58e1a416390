//! Subscription registry: channel -> handler list
//!
//! The first handler on a remote channel sends `subscribe`, removing the last
//! one sends `unsubscribe`. `ticks_batch` and `*` are local channels and never
//! touch the wire.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::command_queue::CommandQueue;
use crate::error::HandlerError;
use crate::message::{Command, Event, TICKS_BATCH_CHANNEL, WILDCARD_CHANNEL};
use crate::metrics::ConnectorMetrics;
use crate::traits::Handler;

/// True for channels served locally rather than by the price server
pub fn is_local_channel(channel: &str) -> bool {
    channel == TICKS_BATCH_CHANNEL || channel == WILDCARD_CHANNEL
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    handler: Handler,
}

struct RegistryInner {
    table: Mutex<HashMap<String, Vec<Subscriber>>>,
    queue: Arc<CommandQueue>,
    next_id: AtomicU64,
    metrics: ConnectorMetrics,
}

/// Outcome of routing one event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Commands issued when a link opens
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResubscribeSummary {
    /// Queued commands replayed
    pub flushed: usize,
    /// Subscribe commands issued for registered channels
    pub resubscribed: usize,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(queue: Arc<CommandQueue>, metrics: ConnectorMetrics) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                table: Mutex::new(HashMap::new()),
                queue,
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// Register `handler` on `channel`
    pub fn subscribe<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Subscriber {
            id,
            handler: Arc::new(handler),
        };

        let mut table = self.inner.table.lock();
        let subscribers = table.entry(channel.clone()).or_default();
        subscribers.push(subscriber);
        if subscribers.len() == 1 && !is_local_channel(&channel) {
            debug!(channel = %channel, "First subscriber, subscribing channel");
            self.inner.queue.enqueue(Command::subscribe(channel.as_str()));
        }
        drop(table);

        SubscriptionHandle {
            registry: self.clone(),
            channel,
            id,
        }
    }

    fn remove(&self, channel: &str, id: u64) -> bool {
        let mut table = self.inner.table.lock();
        let Some(subscribers) = table.get_mut(channel) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() == before {
            return false;
        }
        if subscribers.is_empty() {
            table.remove(channel);
            if !is_local_channel(channel) {
                debug!(channel = %channel, "Last subscriber gone, unsubscribing channel");
                self.inner.queue.enqueue(Command::unsubscribe(channel));
            }
        }
        true
    }

    /// Deliver `event` to its channel's handlers and to wildcard handlers.
    /// A failing or panicking handler does not stop delivery to the rest.
    pub fn route(&self, event: &Event) -> Delivery {
        let channel = event.channel();
        let targets: Vec<Subscriber> = {
            let table = self.inner.table.lock();
            let direct = table.get(channel).into_iter().flatten();
            let wildcard = if channel == WILDCARD_CHANNEL {
                None
            } else {
                table.get(WILDCARD_CHANNEL)
            };
            direct.chain(wildcard.into_iter().flatten()).cloned().collect()
        };

        let mut delivery = Delivery::default();
        for subscriber in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(event))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(e)) => {
                    delivery.failed += 1;
                    self.inner.metrics.inc_handler_errors();
                    error!(channel = %channel, subscriber = subscriber.id, error = %e, "Subscriber handler failed");
                }
                Err(payload) => {
                    delivery.failed += 1;
                    self.inner.metrics.inc_handler_errors();
                    error!(
                        channel = %channel,
                        subscriber = subscriber.id,
                        panic = panic_message(payload.as_ref()),
                        "Subscriber handler panicked"
                    );
                }
            }
        }
        delivery
    }

    /// Issue one subscribe per registered remote channel, skipping `skip`
    pub fn resubscribe_all(&self, skip: &HashSet<String>) -> usize {
        let table = self.inner.table.lock();
        self.resubscribe_locked(&table, skip)
    }

    fn resubscribe_locked(
        &self,
        table: &HashMap<String, Vec<Subscriber>>,
        skip: &HashSet<String>,
    ) -> usize {
        let mut issued = 0;
        for channel in table.keys() {
            if is_local_channel(channel) || skip.contains(channel) {
                continue;
            }
            self.inner.queue.enqueue(Command::subscribe(channel.as_str()));
            issued += 1;
        }
        issued
    }

    /// Attach a new link: replay the command queue, then resubscribe every
    /// channel not already subscribed by the replay. Runs under the registry
    /// lock so a concurrent subscribe cannot be sent twice.
    pub fn on_link_open(&self, link: mpsc::UnboundedSender<String>) -> ResubscribeSummary {
        let table = self.inner.table.lock();
        let flushed = self.inner.queue.flush(link);
        let already: HashSet<String> = flushed
            .iter()
            .filter_map(|cmd| match cmd {
                Command::Subscribe { channel } => Some(channel.clone()),
                _ => None,
            })
            .collect();
        let resubscribed = self.resubscribe_locked(&table, &already);
        info!(
            flushed = flushed.len(),
            resubscribed,
            "Replayed queued commands and restored subscriptions"
        );
        ResubscribeSummary {
            flushed: flushed.len(),
            resubscribed,
        }
    }

    /// Registered channels, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.inner.table.lock().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .table
            .lock()
            .get(channel)
            .map_or(0, |subscribers| subscribers.len())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Returned by `subscribe`; `unsubscribe` removes the handler
pub struct SubscriptionHandle {
    registry: Registry,
    channel: String,
    id: u64,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        self.registry.remove(&self.channel, self.id)
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}
