//! Agent event system for observability.
//!
//! Emits [`AgentEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, progress displays, tests) can follow task execution
//! without coupling to the agent.

use serde::{Deserialize, Serialize};

/// Events emitted while an agent works on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentEvent {
    TaskStarted {
        role: String,
        task: String,
    },
    TaskRetrying {
        role: String,
        task: String,
        attempt: usize,
        category: String,
        error: String,
    },
    /// Posted exactly once per successful `perform_task`.
    TaskCompleted {
        role: String,
        task: String,
        attempts: usize,
        /// Tags whose handlers ran; empty for a text-only reply.
        tags: Vec<String>,
    },
    TaskExhausted {
        role: String,
        task: String,
        attempts: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<AgentEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
