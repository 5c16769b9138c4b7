use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompvisorError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Manager error: {0}")]
    Manager(#[from] ManagerError),

    #[error("System error: {message}")]
    System { message: String },
}

impl CompvisorError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

/// Errors reported by the component manager's own API
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("No component registered with tag '{tag}'")]
    ComponentNotFound { tag: String },

    #[error("Failed to spawn manager worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Previous manager worker is still running")]
    WorkerStillRunning,

    #[error("Manager worker did not stop within {timeout:?}")]
    ShutdownTimeout { timeout: Duration },
}

impl ManagerError {
    pub fn not_found<S: Into<String>>(tag: S) -> Self {
        Self::ComponentNotFound { tag: tag.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Mailbox is full")]
    Full,

    #[error("Mailbox is disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, CompvisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_error_converts() {
        fn lookup() -> Result<()> {
            let found: std::result::Result<(), ManagerError> = Err(ManagerError::not_found("wifi"));
            found?;
            Ok(())
        }

        let err = lookup().unwrap_err();
        assert!(matches!(
            err,
            CompvisorError::Manager(ManagerError::ComponentNotFound { ref tag }) if tag == "wifi"
        ));
        assert_eq!(
            err.to_string(),
            "Manager error: No component registered with tag 'wifi'"
        );
    }

    #[test]
    fn test_shutdown_timeout_message() {
        let err = ManagerError::ShutdownTimeout {
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Manager worker did not stop within 250ms");
    }

    #[test]
    fn test_system_error() {
        let err = CompvisorError::system("worker lost");
        assert_eq!(err.to_string(), "System error: worker lost");
    }
}
