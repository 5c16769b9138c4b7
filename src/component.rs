use crate::status::Status;
use parking_lot::Mutex;
use std::sync::Arc;

/// Contract every unit managed by the [`Manager`](crate::Manager) implements
///
/// All callbacks are invoked from the manager's single worker thread, one at a
/// time, so implementations can keep plain `&mut self` state. Failure is
/// reported through the returned [`Status`] and [`Component::error`], never by
/// panicking.
pub trait Component: Send {
    /// Short human-readable name, used for logging and lookup
    fn tag(&self) -> &str;

    /// Current status as the component sees it
    fn status(&self) -> Status;

    /// Description of the last failure, present while the status is `Error`
    fn error(&self) -> Option<String> {
        None
    }

    /// Bring the component up. Must be safe to call again after an error.
    fn initialize(&mut self) -> Status;

    /// Called every quantum while active.
    ///
    /// `Running` continues, `Error` triggers a restart and anything else is
    /// taken as a self-initiated shutdown.
    fn run(&mut self) -> Status;

    /// Shut the component down. Must be safe on an already stopped component.
    fn stop(&mut self) -> Status;
}

/// Handle through which the manager and the application share a component
pub type SharedComponent = Arc<Mutex<dyn Component>>;

/// Wrap a component into a [`SharedComponent`]
pub fn shared<C: Component + 'static>(component: C) -> SharedComponent {
    Arc::new(Mutex::new(component))
}
