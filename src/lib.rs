pub mod component;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod mailbox;
pub mod manager;
pub mod mock;
pub mod status;

pub use component::{Component, SharedComponent};
pub use config::{CompvisorConfig, EventConfig, HeartbeatConfig, ManagerConfig};
pub use error::{CompvisorError, MailboxError, ManagerError, Result};
pub use events::{EventBus, EventEnvelope, LifecycleEvent, RestartPhase};
pub use heartbeat::Heartbeat;
pub use mailbox::{Mailbox, MailboxSender};
pub use manager::{ComponentReport, Manager};
pub use mock::{CallLog, MockComponent, MockProbe};
pub use status::Status;
