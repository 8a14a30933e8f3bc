//! Supervisor event stream.
//!
//! Events flow from the cycle driver and restart coordinator through a
//! broadcast channel to every subscriber:
//!
//! ```text
//! Supervisor → EventBus::publish(Event) → broadcast → subscribers
//! ```
//!
//! Dropping a receiver unsubscribes it. [`EventBus::reset`] detaches all
//! current subscribers at once.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::trace;

use crate::watcher::Watcher;

const DEFAULT_CAPACITY: usize = 1024;

/// Something observable that happened inside the supervisor.
#[derive(Debug, Clone)]
pub enum Event {
    /// A watcher was registered.
    Add(Arc<Watcher>),
    /// A cycle is about to evaluate the registry.
    PreCycle,
    /// Outcome of one watcher in one cycle.
    Check {
        id: String,
        healthy: bool,
        error: Option<String>,
    },
    /// A restart is being issued for a watcher.
    Restart { id: String },
    /// A restart was skipped because an app is inside its restart delay.
    RestartDelay { message: String },
    /// Restart attempts for a watcher have resolved.
    PostRestart { id: String },
    /// A non-fatal failure, such as a process manager refusing a restart.
    Error { message: String },
}

impl Event {
    /// Stable event name, matching the names used by console consumers.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Add(_) => "add",
            Event::PreCycle => "preCycle",
            Event::Check { .. } => "check",
            Event::Restart { .. } => "restart",
            Event::RestartDelay { .. } => "restartDelay",
            Event::PostRestart { .. } => "postRestart",
            Event::Error { .. } => "error",
        }
    }
}

/// Publish/subscribe channel owned by a supervisor.
pub struct EventBus {
    sender: RwLock<broadcast::Sender<Event>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose subscribers may lag at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(sender),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }

    /// Publish an event. Returns how many subscribers received it.
    pub fn publish(&self, event: Event) -> usize {
        let name = event.name();
        let delivered = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event)
            .unwrap_or(0);
        trace!(event = name, delivered, "event published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .receiver_count()
    }

    /// Detach every current subscriber.
    ///
    /// Existing receivers drain what they already hold and then observe
    /// a closed channel.
    pub fn reset(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        *self.sender.write().unwrap_or_else(PoisonError::into_inner) = sender;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
