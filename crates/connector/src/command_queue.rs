//! Outbound command queue
//!
//! Commands go straight to the live link while connected. While disconnected
//! they wait here, bounded at `capacity` with drop-oldest overflow, and are
//! replayed in insertion order when the next link attaches.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::message::Command;
use crate::metrics::ConnectorMetrics;

/// What `enqueue` did with a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Written to the live link
    Sent,
    /// Held until the next connect
    Queued,
    /// Identical command already pending
    Duplicate,
    /// Cancelled a pending opposite command for the same channel
    Cancelled,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Command>,
    link: Option<mpsc::UnboundedSender<String>>,
}

pub struct CommandQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    metrics: ConnectorMetrics,
}

impl CommandQueue {
    pub fn new(capacity: usize, metrics: ConnectorMetrics) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity),
                link: None,
            }),
            capacity: capacity.max(1),
            metrics,
        }
    }

    /// Send now if a link is attached, otherwise hold for the next connect.
    /// Never blocks.
    pub fn enqueue(&self, command: Command) -> Enqueued {
        let mut state = self.state.lock();

        if let Some(link) = state.link.as_ref() {
            if send(link, &command) {
                trace!(?command, "Command sent");
                return Enqueued::Sent;
            }
            debug!(?command, "Link closed while sending, queueing command");
            state.link = None;
        }

        let outcome = self.push_pending(&mut state, command);
        self.metrics.set_queue_depth(state.pending.len());
        outcome
    }

    fn push_pending(&self, state: &mut QueueState, command: Command) -> Enqueued {
        if state.pending.contains(&command) {
            return Enqueued::Duplicate;
        }

        let opposite = match &command {
            Command::Subscribe { channel } => Some(Command::unsubscribe(channel.as_str())),
            Command::Unsubscribe { channel } => Some(Command::subscribe(channel.as_str())),
            Command::Ping => None,
        };
        if let Some(opposite) = opposite {
            if let Some(pos) = state.pending.iter().position(|c| *c == opposite) {
                state.pending.remove(pos);
                // The pending subscribe never reached the server; drop both.
                if matches!(command, Command::Unsubscribe { .. }) {
                    return Enqueued::Cancelled;
                }
            }
        }

        if state.pending.len() >= self.capacity {
            if let Some(dropped) = state.pending.pop_front() {
                warn!(
                    capacity = self.capacity,
                    dropped = ?dropped,
                    "Command queue full, dropping oldest command"
                );
                self.metrics.inc_commands_dropped();
            }
        }
        state.pending.push_back(command);
        Enqueued::Queued
    }

    /// Attach a live link: replay queued commands in insertion order, then
    /// send directly. Returns the commands replayed.
    ///
    /// If the link dies mid-replay the unsent remainder stays queued and the
    /// link is not attached.
    pub fn flush(&self, link: mpsc::UnboundedSender<String>) -> Vec<Command> {
        let mut state = self.state.lock();
        let mut sent = Vec::with_capacity(state.pending.len());

        while let Some(command) = state.pending.pop_front() {
            if !send(&link, &command) {
                warn!(
                    remaining = state.pending.len() + 1,
                    "Link closed while flushing command queue"
                );
                state.pending.push_front(command);
                self.metrics.set_queue_depth(state.pending.len());
                return sent;
            }
            sent.push(command);
        }

        state.link = Some(link);
        self.metrics.set_queue_depth(0);
        sent
    }

    /// Drop the live link; later commands are queued
    pub fn detach(&self) {
        self.state.lock().link = None;
    }

    pub fn is_attached(&self) -> bool {
        self.state
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| !link.is_closed())
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Snapshot of the pending commands, oldest first
    pub fn pending(&self) -> Vec<Command> {
        self.state.lock().pending.iter().cloned().collect()
    }
}

/// Serialize and write one command. False if the link is gone.
fn send(link: &mpsc::UnboundedSender<String>, command: &Command) -> bool {
    match command.to_frame() {
        Ok(frame) => link.send(frame).is_ok(),
        Err(e) => {
            warn!(error = %e, ?command, "Failed to serialize command, dropping");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> CommandQueue {
        CommandQueue::new(capacity, ConnectorMetrics::new("command-queue-test"))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_queues_while_disconnected() {
        let queue = queue(8);
        assert_eq!(queue.enqueue(Command::subscribe("account")), Enqueued::Queued);
        assert_eq!(queue.enqueue(Command::subscribe("orders")), Enqueued::Queued);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_attached());
    }

    #[test]
    fn test_flush_sends_in_insertion_order_before_new_commands() {
        let queue = queue(8);
        queue.enqueue(Command::subscribe("a"));
        queue.enqueue(Command::subscribe("b"));
        queue.enqueue(Command::subscribe("c"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let flushed = queue.flush(tx);
        assert_eq!(flushed.len(), 3);
        assert!(queue.is_empty());

        assert_eq!(queue.enqueue(Command::subscribe("d")), Enqueued::Sent);

        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec![
                r#"{"type":"subscribe","channel":"a"}"#,
                r#"{"type":"subscribe","channel":"b"}"#,
                r#"{"type":"subscribe","channel":"c"}"#,
                r#"{"type":"subscribe","channel":"d"}"#,
            ]
        );
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = queue(3);
        for channel in ["a", "b", "c", "d"] {
            queue.enqueue(Command::subscribe(channel));
        }
        assert_eq!(
            queue.pending(),
            vec![
                Command::subscribe("b"),
                Command::subscribe("c"),
                Command::subscribe("d"),
            ]
        );
    }

    #[test]
    fn test_duplicate_pending_command_not_appended() {
        let queue = queue(8);
        queue.enqueue(Command::Ping);
        assert_eq!(queue.enqueue(Command::Ping), Enqueued::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unsubscribe_cancels_pending_subscribe() {
        let queue = queue(8);
        queue.enqueue(Command::subscribe("account"));
        assert_eq!(
            queue.enqueue(Command::unsubscribe("account")),
            Enqueued::Cancelled
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_subscribe_replaces_pending_unsubscribe() {
        let queue = queue(8);
        queue.enqueue(Command::unsubscribe("account"));
        queue.enqueue(Command::subscribe("orders"));
        assert_eq!(queue.enqueue(Command::subscribe("account")), Enqueued::Queued);
        assert_eq!(
            queue.pending(),
            vec![Command::subscribe("orders"), Command::subscribe("account")]
        );
    }

    #[test]
    fn test_closed_link_falls_back_to_queue() {
        let queue = queue(8);
        let (tx, rx) = mpsc::unbounded_channel();
        queue.flush(tx);
        drop(rx);

        assert_eq!(queue.enqueue(Command::subscribe("account")), Enqueued::Queued);
        assert!(!queue.is_attached());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_flush_on_dead_link_keeps_commands() {
        let queue = queue(8);
        queue.enqueue(Command::subscribe("a"));
        queue.enqueue(Command::subscribe("b"));

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let flushed = queue.flush(tx);

        assert!(flushed.is_empty());
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_attached());
    }

    #[test]
    fn test_detach_requeues_new_commands() {
        let queue = queue(8);
        let (tx, _rx) = mpsc::unbounded_channel();
        queue.flush(tx);
        queue.detach();
        assert_eq!(queue.enqueue(Command::Ping), Enqueued::Queued);
    }
}
