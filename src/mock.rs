//! Scriptable component for exercising the manager without hardware
//!
//! A [`MockComponent`] is handed to the manager while the test keeps its
//! [`MockProbe`] to script outcomes and inspect calls from another thread.

use crate::component::Component;
use crate::mailbox::{Mailbox, MailboxSender};
use crate::status::Status;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Component operations recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Run,
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Initialize => f.write_str("initialize"),
            Operation::Run => f.write_str("run"),
            Operation::Stop => f.write_str("stop"),
        }
    }
}

/// Ordered record of calls, shareable between several mocks
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(String, Operation)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, tag: &str, operation: Operation) {
        self.calls.lock().push((tag.to_string(), operation));
    }

    pub fn calls(&self) -> Vec<(String, Operation)> {
        self.calls.lock().clone()
    }

    /// Tags that received `operation`, in call order
    pub fn tags_for(&self, operation: Operation) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(_, op)| *op == operation)
            .map(|(tag, _)| tag.clone())
            .collect()
    }

    /// Operations received by `tag`, in call order
    pub fn operations_for(&self, tag: &str) -> Vec<Operation> {
        self.calls
            .lock()
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, op)| *op)
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Message type carried by the mock's mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockMessage {
    pub data: u32,
}

struct Script {
    queue: VecDeque<Status>,
    default: Status,
    calls: u64,
}

impl Script {
    fn new(default: Status) -> Self {
        Self {
            queue: VecDeque::new(),
            default,
            calls: 0,
        }
    }

    fn next_outcome(&mut self) -> Status {
        self.queue.pop_front().unwrap_or(self.default)
    }
}

struct MockState {
    status: Status,
    error: Option<String>,
    initialize: Script,
    run: Script,
    stop: Script,
    status_calls: u64,
    run_gate: Option<Receiver<()>>,
    stop_gate: Option<Receiver<()>>,
    panic_next_run: bool,
    received: Vec<u32>,
}

impl MockState {
    fn new() -> Self {
        Self {
            status: Status::Uninitialized,
            error: None,
            initialize: Script::new(Status::Running),
            run: Script::new(Status::Running),
            stop: Script::new(Status::Stopped),
            status_calls: 0,
            run_gate: None,
            stop_gate: None,
            panic_next_run: false,
            received: Vec::new(),
        }
    }

    fn script(&mut self, operation: Operation) -> &mut Script {
        match operation {
            Operation::Initialize => &mut self.initialize,
            Operation::Run => &mut self.run,
            Operation::Stop => &mut self.stop,
        }
    }

    fn apply(&mut self, operation: Operation, outcome: Status) {
        self.status = outcome;
        self.error = if outcome.is_error() {
            Some(format!("forced {} error", operation))
        } else {
            None
        };
    }
}

/// Keeps a blocked mock callback waiting until released or dropped
pub struct Gate {
    release: Sender<()>,
}

impl Gate {
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Test-side handle to a [`MockComponent`]
#[derive(Clone)]
pub struct MockProbe {
    tag: String,
    state: Arc<Mutex<MockState>>,
    blocked: Arc<AtomicBool>,
    mailbox: MailboxSender<MockMessage>,
}

impl MockProbe {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Outcomes returned by the next `initialize()` calls before the default
    pub fn script_initialize<I: IntoIterator<Item = Status>>(&self, outcomes: I) {
        self.state.lock().initialize.queue.extend(outcomes);
    }

    pub fn script_run<I: IntoIterator<Item = Status>>(&self, outcomes: I) {
        self.state.lock().run.queue.extend(outcomes);
    }

    pub fn script_stop<I: IntoIterator<Item = Status>>(&self, outcomes: I) {
        self.state.lock().stop.queue.extend(outcomes);
    }

    pub fn set_default_initialize(&self, status: Status) {
        self.state.lock().initialize.default = status;
    }

    pub fn set_default_run(&self, status: Status) {
        self.state.lock().run.default = status;
    }

    pub fn set_default_stop(&self, status: Status) {
        self.state.lock().stop.default = status;
    }

    /// Overwrite the status the component reports, as an external actor would
    pub fn set_status(&self, status: Status) {
        let mut state = self.state.lock();
        state.status = status;
        if !status.is_error() {
            state.error = None;
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn calls(&self, operation: Operation) -> u64 {
        self.state.lock().script(operation).calls
    }

    pub fn initialize_calls(&self) -> u64 {
        self.calls(Operation::Initialize)
    }

    pub fn run_calls(&self) -> u64 {
        self.calls(Operation::Run)
    }

    pub fn stop_calls(&self) -> u64 {
        self.calls(Operation::Stop)
    }

    pub fn status_calls(&self) -> u64 {
        self.state.lock().status_calls
    }

    /// Make the next `run()` block until the returned gate is released
    pub fn block_next_run(&self) -> Gate {
        let (release, gate) = channel::bounded(1);
        self.state.lock().run_gate = Some(gate);
        Gate { release }
    }

    /// Make the next `stop()` block until the returned gate is released
    pub fn block_next_stop(&self) -> Gate {
        let (release, gate) = channel::bounded(1);
        self.state.lock().stop_gate = Some(gate);
        Gate { release }
    }

    /// Whether a callback is currently parked on a gate
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    pub fn panic_next_run(&self) {
        self.state.lock().panic_next_run = true;
    }

    pub fn send(&self, data: u32) -> bool {
        self.mailbox.enqueue(MockMessage { data }).is_ok()
    }

    /// Payloads drained from the mailbox by `run()`
    pub fn received(&self) -> Vec<u32> {
        self.state.lock().received.clone()
    }

    /// Restore defaults and forget every call
    pub fn reset(&self) {
        *self.state.lock() = MockState::new();
    }
}

/// Programmable stand-in implementing [`Component`]
///
/// Defaults: `initialize()` and `run()` return `Running`, `stop()` returns
/// `Stopped`. A scripted `Error` sets the error text to `forced <op> error`.
pub struct MockComponent {
    tag: String,
    state: Arc<Mutex<MockState>>,
    blocked: Arc<AtomicBool>,
    mailbox: Mailbox<MockMessage>,
    log: CallLog,
}

impl MockComponent {
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self::with_call_log(tag, CallLog::new())
    }

    /// Create a mock recording its calls into a shared log
    pub fn with_call_log<S: Into<String>>(tag: S, log: CallLog) -> Self {
        Self {
            tag: tag.into(),
            state: Arc::new(Mutex::new(MockState::new())),
            blocked: Arc::new(AtomicBool::new(false)),
            mailbox: Mailbox::new(10),
            log,
        }
    }

    pub fn probe(&self) -> MockProbe {
        MockProbe {
            tag: self.tag.clone(),
            state: Arc::clone(&self.state),
            blocked: Arc::clone(&self.blocked),
            mailbox: self.mailbox.sender(),
        }
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }

    fn wait_on(&self, gate: Option<Receiver<()>>) {
        if let Some(gate) = gate {
            self.blocked.store(true, Ordering::Release);
            // Released by a send or by dropping the gate
            let _ = gate.recv();
            self.blocked.store(false, Ordering::Release);
        }
    }

    fn finish(&self, operation: Operation) -> Status {
        let mut state = self.state.lock();
        let outcome = state.script(operation).next_outcome();
        state.apply(operation, outcome);
        trace!(component = %self.tag, %operation, %outcome, "Mock call");
        outcome
    }
}

impl Component for MockComponent {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn status(&self) -> Status {
        let mut state = self.state.lock();
        state.status_calls += 1;
        state.status
    }

    fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn initialize(&mut self) -> Status {
        self.log.record(&self.tag, Operation::Initialize);
        {
            let mut state = self.state.lock();
            state.initialize.calls += 1;
            state.status = Status::Initializing;
        }
        self.finish(Operation::Initialize)
    }

    fn run(&mut self) -> Status {
        self.log.record(&self.tag, Operation::Run);
        let (gate, should_panic) = {
            let mut state = self.state.lock();
            state.run.calls += 1;
            let should_panic = std::mem::take(&mut state.panic_next_run);
            (state.run_gate.take(), should_panic)
        };

        self.wait_on(gate);
        if should_panic {
            panic!("forced run panic");
        }

        while let Some(message) = self.mailbox.try_dequeue() {
            self.state.lock().received.push(message.data);
        }

        self.finish(Operation::Run)
    }

    fn stop(&mut self) -> Status {
        self.log.record(&self.tag, Operation::Stop);
        let gate = {
            let mut state = self.state.lock();
            state.stop.calls += 1;
            state.status = Status::Stopping;
            state.stop_gate.take()
        };

        self.wait_on(gate);
        self.finish(Operation::Stop)
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
