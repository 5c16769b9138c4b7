use super::entry::Entry;
use super::Shared;
use crate::events::{LifecycleEvent, RestartPhase};
use crate::status::Status;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The single thread that drives every component callback
pub(super) struct Worker {
    shared: Arc<Shared>,
    wake: Receiver<()>,
    session: Uuid,
    _exit: ExitGuard,
}

/// Marks the worker as gone once it unwinds or returns
///
/// Dropping `done` disconnects the channel `stop_timeout` waits on, so the
/// alive flag is always cleared first.
struct ExitGuard {
    shared: Arc<Shared>,
    _done: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.worker_alive.store(false, Ordering::Release);
    }
}

impl Worker {
    pub(super) fn new(
        shared: Arc<Shared>,
        wake: Receiver<()>,
        done: Sender<()>,
        session: Uuid,
    ) -> Self {
        let exit = ExitGuard {
            shared: Arc::clone(&shared),
            _done: done,
        };
        Self {
            shared,
            wake,
            session,
            _exit: exit,
        }
    }

    /// Quantum loop, runs until the manager clears its running flag
    pub(super) fn run(self) {
        info!(session = %self.session, "Starting manager worker");
        self.shared.events.publish(LifecycleEvent::ManagerStarted {
            session: self.session,
        });

        let quantum = self.shared.config.quantum();
        while self.shared.running.load(Ordering::Acquire) {
            for entry in self.shared.snapshot() {
                self.step(&entry);
            }

            // Woken early by stop()
            let _ = self.wake.recv_timeout(quantum);
        }

        self.shutdown();
    }

    fn step(&self, entry: &Entry) {
        if entry.is_active() {
            let outcome = entry.invoke("run", |component| component.run());
            entry.observe(&outcome);

            match outcome.status {
                Status::Running => {}
                Status::Error => {
                    let error = outcome.error_text();
                    warn!(
                        component = entry.tag(),
                        "Component reported an error: {}", error
                    );
                    self.publish(LifecycleEvent::RunFailed {
                        tag: entry.tag().to_string(),
                        error,
                    });
                    self.restart(entry);
                }
                status => {
                    entry.set_active(false);
                    info!(
                        component = entry.tag(),
                        %status,
                        "Component deactivated itself"
                    );
                    self.publish(LifecycleEvent::Deactivated {
                        tag: entry.tag().to_string(),
                        status,
                    });
                }
            }
        } else {
            let outcome = entry.invoke("status", |component| component.status());
            entry.observe(&outcome);

            if outcome.status == Status::Uninitialized {
                self.init_component(entry);
            }
        }
    }

    fn init_component(&self, entry: &Entry) {
        entry.record_status(Status::Initializing);
        let outcome = entry.invoke("initialize", |component| component.initialize());
        entry.observe(&outcome);

        if outcome.is_error() {
            entry.set_active(false);
            let error = outcome.error_text();
            error!(component = entry.tag(), "Component failed to start: {}", error);
            self.publish(LifecycleEvent::InitializeFailed {
                tag: entry.tag().to_string(),
                error,
            });
        } else {
            entry.set_active(true);
            debug!(
                component = entry.tag(),
                status = %outcome.status,
                "Initialized component"
            );
            self.publish(LifecycleEvent::Initialized {
                tag: entry.tag().to_string(),
            });
        }
    }

    /// One stop-then-initialize attempt; any failure quarantines the entry
    fn restart(&self, entry: &Entry) {
        let stopped = entry.invoke("stop", |component| component.stop());
        entry.observe(&stopped);
        if stopped.is_error() {
            self.quarantine(entry, RestartPhase::Stop, stopped.error_text());
            return;
        }

        entry.record_status(Status::Initializing);
        let initialized = entry.invoke("initialize", |component| component.initialize());
        entry.observe(&initialized);
        if initialized.is_error() {
            self.quarantine(entry, RestartPhase::Initialize, initialized.error_text());
            return;
        }

        entry.set_active(true);
        let restarts = entry.record_restart();
        info!(component = entry.tag(), restarts, "Component restarted");
        self.publish(LifecycleEvent::Restarted {
            tag: entry.tag().to_string(),
            restarts,
        });
    }

    fn quarantine(&self, entry: &Entry, phase: RestartPhase, error: String) {
        entry.set_active(false);
        match phase {
            RestartPhase::Stop => {
                error!(component = entry.tag(), "Failed to stop component: {}", error)
            }
            RestartPhase::Initialize => error!(
                component = entry.tag(),
                "Failed to re-initialize component: {}", error
            ),
        }
        self.publish(LifecycleEvent::Quarantined {
            tag: entry.tag().to_string(),
            phase,
            error,
        });
    }

    /// Stop every active entry; quarantined and inactive ones are already down
    fn shutdown(&self) {
        info!(session = %self.session, "Stopping active components");

        for entry in self.shared.snapshot() {
            if !entry.is_active() {
                continue;
            }

            let outcome = entry.invoke("stop", |component| component.stop());
            entry.observe(&outcome);
            entry.set_active(false);

            if outcome.is_error() {
                let error = outcome.error_text();
                error!(
                    component = entry.tag(),
                    "Failed to stop component on shutdown of manager: {}", error
                );
                self.publish(LifecycleEvent::StopFailed {
                    tag: entry.tag().to_string(),
                    error,
                });
            } else {
                debug!(component = entry.tag(), "Component stopped");
                self.publish(LifecycleEvent::ComponentStopped {
                    tag: entry.tag().to_string(),
                });
            }
        }

        self.publish(LifecycleEvent::ManagerStopped {
            session: self.session,
        });
        info!(session = %self.session, "Manager worker exited");
    }

    fn publish(&self, event: LifecycleEvent) {
        self.shared.events.publish(event);
    }
}
