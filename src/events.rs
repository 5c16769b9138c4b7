use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Phase of a restart in which the component failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPhase {
    Stop,
    Initialize,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stop => f.write_str("stop"),
            RestartPhase::Initialize => f.write_str("initialize"),
        }
    }
}

/// Lifecycle transitions observed by the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The worker started a new session
    ManagerStarted { session: Uuid },
    /// A component came up and is now run every quantum
    Initialized { tag: String },
    /// The first bring-up failed, the component stays inactive
    InitializeFailed { tag: String, error: String },
    /// `run()` reported an error, a restart follows
    RunFailed { tag: String, error: String },
    /// Stop and re-initialize succeeded
    Restarted { tag: String, restarts: u64 },
    /// The restart failed, the component is excluded for the session
    Quarantined {
        tag: String,
        phase: RestartPhase,
        error: String,
    },
    /// The component shut itself down from `run()`
    Deactivated { tag: String, status: Status },
    /// Stopped on manager shutdown
    ComponentStopped { tag: String },
    /// `stop()` failed on manager shutdown
    StopFailed { tag: String, error: String },
    /// The worker exited
    ManagerStopped { session: Uuid },
}

impl LifecycleEvent {
    /// Tag of the component concerned, if any
    pub fn tag(&self) -> Option<&str> {
        match self {
            LifecycleEvent::ManagerStarted { .. } | LifecycleEvent::ManagerStopped { .. } => None,
            LifecycleEvent::Initialized { tag }
            | LifecycleEvent::InitializeFailed { tag, .. }
            | LifecycleEvent::RunFailed { tag, .. }
            | LifecycleEvent::Restarted { tag, .. }
            | LifecycleEvent::Quarantined { tag, .. }
            | LifecycleEvent::Deactivated { tag, .. }
            | LifecycleEvent::ComponentStopped { tag }
            | LifecycleEvent::StopFailed { tag, .. } => Some(tag.as_str()),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::ManagerStarted { .. } => "manager_started",
            LifecycleEvent::Initialized { .. } => "initialized",
            LifecycleEvent::InitializeFailed { .. } => "initialize_failed",
            LifecycleEvent::RunFailed { .. } => "run_failed",
            LifecycleEvent::Restarted { .. } => "restarted",
            LifecycleEvent::Quarantined { .. } => "quarantined",
            LifecycleEvent::Deactivated { .. } => "deactivated",
            LifecycleEvent::ComponentStopped { .. } => "component_stopped",
            LifecycleEvent::StopFailed { .. } => "stop_failed",
            LifecycleEvent::ManagerStopped { .. } => "manager_stopped",
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            LifecycleEvent::ManagerStarted { session } => {
                format!("Manager session {} started", session)
            }
            LifecycleEvent::Initialized { tag } => format!("{} initialized", tag),
            LifecycleEvent::InitializeFailed { tag, error } => {
                format!("{} failed to initialize: {}", tag, error)
            }
            LifecycleEvent::RunFailed { tag, error } => {
                format!("{} reported an error: {}", tag, error)
            }
            LifecycleEvent::Restarted { tag, restarts } => {
                format!("{} restarted ({} total)", tag, restarts)
            }
            LifecycleEvent::Quarantined { tag, phase, error } => {
                format!("{} quarantined after failed {}: {}", tag, phase, error)
            }
            LifecycleEvent::Deactivated { tag, status } => {
                format!("{} deactivated itself ({})", tag, status)
            }
            LifecycleEvent::ComponentStopped { tag } => format!("{} stopped", tag),
            LifecycleEvent::StopFailed { tag, error } => {
                format!("{} failed to stop: {}", tag, error)
            }
            LifecycleEvent::ManagerStopped { session } => {
                format!("Manager session {} stopped", session)
            }
        }
    }
}

/// Event as delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

/// Broadcast bus for lifecycle events
///
/// Publishing is synchronous so the manager worker, a plain OS thread, can
/// emit without a runtime. Subscribers may consume from async or sync code.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        debug!("Publishing event: {}", event.description());

        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event,
        };

        // No subscribers is the normal case for headless deployments
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Drain whatever is buffered in a receiver without blocking
pub fn drain(receiver: &mut broadcast::Receiver<EventEnvelope>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(envelope) => events.push(envelope.event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("Event receiver lagged behind by {} events", n);
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => break,
        }
    }
    events
}
