use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status shared by every managed component
///
/// ```text
/// Uninitialized -> Initializing -> Running <-> Error
/// Running/Error -> Stopping -> Stopped
/// Running -> Deinitialized
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Initial state, eligible for `initialize()`
    #[default]
    Uninitialized,
    /// Set while `initialize()` is in progress
    Initializing,
    /// Nominal, `run()` is called every quantum
    Running,
    /// A transition reported failure
    Error,
    /// Shutting down
    Stopping,
    /// Shut down, never re-initialized automatically
    Stopped,
    /// The component shut itself down from `run()`
    Deinitialized,
}

impl Status {
    /// Statuses after which the component is done for the managed lifetime
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Stopping | Status::Stopped | Status::Deinitialized)
    }

    pub fn is_error(self) -> bool {
        self == Status::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Uninitialized => "uninitialized",
            Status::Initializing => "initializing",
            Status::Running => "running",
            Status::Error => "error",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Deinitialized => "deinitialized",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
