//! Server event notifications.

use crossbeam_channel::{bounded, Receiver, Sender};
use tileworld_common::ConnectionId;

/// Events published by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// An identity was bound to a connection
    PlayerJoined {
        /// Identity
        username: String,
        /// Connection it is bound to
        connection: ConnectionId,
    },
    /// An identity's connection went away
    PlayerLeft {
        /// Identity
        username: String,
        /// Connection it was bound to
        connection: ConnectionId,
    },
}

/// Receives server events. Must not block.
pub trait EventSink: Send + Sync {
    /// Publishes an event.
    fn publish(&self, event: ServerEvent);
}

/// Event bus for broadcasting events to subscribers.
#[derive(Debug)]
pub struct EventBus {
    /// Sender for broadcasting events
    sender: Sender<ServerEvent>,
    /// Receiver for collecting events
    receiver: Receiver<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<ServerEvent> {
        self.receiver.try_iter().collect()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Receiver handle for a consumer on another thread.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        self.receiver.clone()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: ServerEvent) {
        // Non-blocking send - if full, event is dropped
        let _ = self.sender.try_send(event);
    }
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ServerEvent) {}
}
