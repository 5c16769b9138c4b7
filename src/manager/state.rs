use super::{ComponentReport, Manager};
use crate::error::ManagerError;
use crate::events::{EventBus, EventEnvelope};
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;

impl Manager {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True iff every registered component is currently active
    ///
    /// Vacuously true when nothing is registered.
    pub fn is_initialized(&self) -> bool {
        self.shared
            .entries
            .read()
            .iter()
            .all(|entry| entry.is_active())
    }

    /// Whether the first component registered under `tag` is active
    pub fn is_component_initialized(&self, tag: &str) -> Result<bool, ManagerError> {
        self.shared
            .entries
            .read()
            .iter()
            .find(|entry| entry.tag() == tag)
            .map(|entry| entry.is_active())
            .ok_or_else(|| ManagerError::not_found(tag))
    }

    /// Health snapshot of every component, in registration order
    pub fn report(&self) -> Vec<ComponentReport> {
        self.shared
            .entries
            .read()
            .iter()
            .map(|entry| entry.report())
            .collect()
    }

    /// [`Manager::report`] rendered as pretty-printed JSON
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report())
    }

    /// Health snapshot of the first component registered under `tag`
    pub fn component_report(&self, tag: &str) -> Result<ComponentReport, ManagerError> {
        self.shared
            .entries
            .read()
            .iter()
            .find(|entry| entry.tag() == tag)
            .map(|entry| entry.report())
            .ok_or_else(|| ManagerError::not_found(tag))
    }

    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.entries.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.shared.events.subscribe()
    }
}
