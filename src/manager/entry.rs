use crate::component::{Component, SharedComponent};
use crate::status::Status;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::error;

/// Health snapshot of one registered component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentReport {
    pub tag: String,
    /// Whether the manager calls `run()` on it every quantum
    pub active: bool,
    /// Last status returned by the component
    pub status: Status,
    pub error: Option<String>,
    /// Successful restarts over the manager's lifetime
    pub restarts: u64,
}

/// Result of one component callback
pub(crate) struct Outcome {
    pub status: Status,
    pub error: Option<String>,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "unspecified error".to_string())
    }
}

#[derive(Default)]
struct Observed {
    status: Status,
    error: Option<String>,
}

/// Manager record for one registered component
///
/// `active` is written by the worker only; every other field may be read
/// from any thread without touching the component itself.
pub(crate) struct Entry {
    tag: String,
    component: SharedComponent,
    active: AtomicBool,
    restarts: AtomicU64,
    observed: Mutex<Observed>,
}

impl Entry {
    pub fn new(tag: String, component: SharedComponent) -> Self {
        Self {
            tag,
            component,
            active: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            observed: Mutex::new(Observed::default()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn record_restart(&self) -> u64 {
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_status(&self, status: Status) {
        self.observed.lock().status = status;
    }

    pub fn observe(&self, outcome: &Outcome) {
        let mut observed = self.observed.lock();
        observed.status = outcome.status;
        observed.error = outcome.error.clone();
    }

    pub fn report(&self) -> ComponentReport {
        let observed = self.observed.lock();
        ComponentReport {
            tag: self.tag.clone(),
            active: self.is_active(),
            status: observed.status,
            error: observed.error.clone(),
            restarts: self.restarts(),
        }
    }

    /// Run one callback on the component, containing any panic it raises
    ///
    /// A panicking callback is reported as `Status::Error` so it flows through
    /// the same restart and quarantine handling as a returned error.
    pub fn invoke<F>(&self, operation: &'static str, f: F) -> Outcome
    where
        F: FnOnce(&mut dyn Component) -> Status,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut component = self.component.lock();
            let status = f(&mut *component);
            let error = if status.is_error() {
                component.error()
            } else {
                None
            };
            (status, error)
        }));

        match result {
            Ok((status, error)) => Outcome { status, error },
            Err(payload) => {
                let message = panic_message(&*payload);
                error!(
                    component = %self.tag,
                    operation,
                    "Component panicked: {}",
                    message
                );
                Outcome {
                    status: Status::Error,
                    error: Some(format!("{} panicked: {}", operation, message)),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
