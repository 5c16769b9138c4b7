//! Cooperative lifecycle manager
//!
//! A [`Manager`] owns an ordered, fixed-capacity list of components and drives
//! them from one worker thread. Every quantum the worker walks the list in
//! registration order: active components get `run()`, inactive components
//! reporting `Uninitialized` get `initialize()`. A `run()` error triggers one
//! stop-then-initialize restart; if either step fails the component is
//! quarantined for the rest of the session.

mod entry;
mod state;
mod worker;

#[cfg(test)]
mod tests;

pub use entry::ComponentReport;

use crate::component::SharedComponent;
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::events::EventBus;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use entry::Entry;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use worker::Worker;

/// State shared between the manager handle and its worker thread
pub(crate) struct Shared {
    config: ManagerConfig,
    entries: RwLock<Vec<Arc<Entry>>>,
    running: AtomicBool,
    worker_alive: AtomicBool,
    events: EventBus,
}

impl Shared {
    /// Copy of the entry list so callbacks run without holding the lock
    fn snapshot(&self) -> Vec<Arc<Entry>> {
        self.entries.read().clone()
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    wake: Sender<()>,
    done: Receiver<()>,
    session: Uuid,
}

impl WorkerHandle {
    fn is_current_thread(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }
}

/// Supervisor for a fixed set of long-lived components
///
/// Constructed once by the application's startup code and passed to whoever
/// needs it. All component callbacks run on a single worker thread spawned by
/// [`Manager::start`]; the query methods may be called from any thread and
/// never wait on a component.
pub struct Manager {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_event_bus(config, EventBus::default())
    }

    /// Create a manager publishing lifecycle events on an existing bus
    pub fn with_event_bus(config: ManagerConfig, events: EventBus) -> Self {
        let capacity = config.capacity;
        if config.quantum_ms == 0 {
            warn!("Manager quantum_ms is 0, sleeping {:?} per quantum", config.quantum());
        }
        Self {
            shared: Arc::new(Shared {
                config,
                entries: RwLock::new(Vec::with_capacity(capacity)),
                running: AtomicBool::new(false),
                worker_alive: AtomicBool::new(false),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Register a component
    ///
    /// Registration order is initialization order and run order. Components
    /// added while the manager runs are picked up at the next quantum.
    ///
    /// # Panics
    ///
    /// Panics when the configured capacity is already used up. The capacity
    /// is a build-time decision, so overflowing it is a programming error.
    pub fn add_component(&self, component: SharedComponent) {
        let tag = component.lock().tag().to_string();
        let mut entries = self.shared.entries.write();

        assert!(
            entries.len() < self.shared.config.capacity,
            "Cannot register component '{}': manager capacity of {} reached",
            tag,
            self.shared.config.capacity
        );

        if entries.iter().any(|entry| entry.tag() == tag) {
            warn!(component = %tag, "Registering a second component with the same tag");
        }

        debug!(component = %tag, position = entries.len(), "Registered component");
        entries.push(Arc::new(Entry::new(tag, component)));
    }

    /// Spawn the worker thread; does nothing if it is already running
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut slot = self.worker.lock();

        if self.shared.running.load(Ordering::Acquire) {
            debug!("Manager already running");
            return Ok(());
        }

        // A worker abandoned by stop_timeout may still be inside a callback
        if self.shared.worker_alive.load(Ordering::Acquire) {
            return Err(ManagerError::WorkerStillRunning);
        }

        if let Some(previous) = slot.take() {
            if previous.thread.join().is_err() {
                error!(session = %previous.session, "Previous manager worker panicked");
            }
        }

        let session = Uuid::new_v4();
        let (wake_tx, wake_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded(1);

        self.shared.running.store(true, Ordering::Release);
        self.shared.worker_alive.store(true, Ordering::Release);

        let worker = Worker::new(Arc::clone(&self.shared), wake_rx, done_tx, session);

        let mut builder = thread::Builder::new().name(self.shared.config.worker_name.clone());
        if let Some(stack_size) = self.shared.config.worker_stack_size {
            builder = builder.stack_size(stack_size);
        }

        match builder.spawn(move || worker.run()) {
            Ok(thread) => {
                info!(
                    session = %session,
                    components = self.len(),
                    "Component manager started"
                );
                *slot = Some(WorkerHandle {
                    thread,
                    wake: wake_tx,
                    done: done_rx,
                    session,
                });
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.worker_alive.store(false, Ordering::Release);
                error!("Failed to spawn manager worker: {}", e);
                Err(ManagerError::Spawn(e))
            }
        }
    }

    /// Stop the worker and wait for it to exit
    ///
    /// The worker notices between quanta, stops every active component and
    /// exits. A component stuck in a callback delays this indefinitely. Called
    /// from inside a component callback, this only requests the stop.
    pub fn stop(&self) {
        let Some(handle) = self.signal_stop() else {
            return;
        };

        if handle.is_current_thread() {
            debug!("Manager stop requested from its own worker");
            return;
        }

        if handle.thread.join().is_err() {
            error!(session = %handle.session, "Manager worker panicked");
        }
        info!(session = %handle.session, "Component manager stopped");
    }

    /// Like [`Manager::stop`] but gives up waiting after `timeout`
    ///
    /// On timeout the worker keeps the stop request and will exit once its
    /// current callback returns; a later `stop()` joins it.
    pub fn stop_timeout(&self, timeout: Duration) -> Result<(), ManagerError> {
        let Some(handle) = self.signal_stop() else {
            return Ok(());
        };

        if handle.is_current_thread() {
            debug!("Manager stop requested from its own worker");
            return Ok(());
        }

        match handle.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.thread.join().is_err() {
                    error!(session = %handle.session, "Manager worker panicked");
                }
                info!(session = %handle.session, "Component manager stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    session = %handle.session,
                    "Manager worker did not stop within {:?}", timeout
                );
                *self.worker.lock() = Some(handle);
                Err(ManagerError::ShutdownTimeout { timeout })
            }
        }
    }

    /// Clear the running flag and wake the worker, handing back its handle
    fn signal_stop(&self) -> Option<WorkerHandle> {
        let handle = self.worker.lock().take()?;
        self.shared.running.store(false, Ordering::Release);
        let _ = handle.wake.try_send(());
        debug!(session = %handle.session, "Manager stop requested");
        Some(handle)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.stop();
    }
}
