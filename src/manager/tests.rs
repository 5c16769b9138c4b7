use super::*;
use crate::component::{self, Component};
use crate::events::{drain, LifecycleEvent, RestartPhase};
use crate::mock::{wait_until, CallLog, MockComponent, MockProbe, Operation};
use crate::status::Status;
use std::sync::Weak;

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(50);

fn test_config() -> ManagerConfig {
    ManagerConfig::default()
        .with_capacity(4)
        .with_quantum(Duration::from_millis(1))
}

fn register(manager: &Manager, tag: &str) -> MockProbe {
    let mock = MockComponent::new(tag);
    let probe = mock.probe();
    manager.add_component(component::shared(mock));
    probe
}

fn register_logged(manager: &Manager, tag: &str, log: &CallLog) -> MockProbe {
    let mock = MockComponent::with_call_log(tag, log.clone());
    let probe = mock.probe();
    manager.add_component(component::shared(mock));
    probe
}

fn wait_for_runs(probe: &MockProbe, runs: u64) {
    assert!(
        wait_until(WAIT, || probe.run_calls() >= runs),
        "{} never reached {} run calls",
        probe.tag(),
        runs
    );
}

/// Assert `probe` receives no further run calls over several quanta
fn assert_no_more_runs(probe: &MockProbe) {
    let runs = probe.run_calls();
    std::thread::sleep(SETTLE);
    assert_eq!(probe.run_calls(), runs, "{} was run again", probe.tag());
}

#[test]
fn test_component_initialized_and_run_after_start() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "wifi");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    assert_eq!(probe.initialize_calls(), 1);
    assert!(manager.is_running());
    assert!(manager.is_component_initialized("wifi").unwrap());

    manager.stop();
}

#[test]
fn test_components_initialized_and_run_in_registration_order() {
    let manager = Manager::new(test_config());
    let log = CallLog::new();
    let probes: Vec<_> = ["config", "wifi", "http"]
        .iter()
        .map(|tag| register_logged(&manager, tag, &log))
        .collect();

    manager.start().unwrap();
    for probe in &probes {
        wait_for_runs(probe, 1);
    }
    manager.stop();

    let calls = log.calls();
    let first_quantum: Vec<_> = calls[..3].to_vec();
    assert_eq!(
        first_quantum,
        vec![
            ("config".to_string(), Operation::Initialize),
            ("wifi".to_string(), Operation::Initialize),
            ("http".to_string(), Operation::Initialize),
        ]
    );
    assert_eq!(log.tags_for(Operation::Run)[..3], ["config", "wifi", "http"]);
}

#[test]
fn test_run_called_every_quantum_while_running() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "led");

    manager.start().unwrap();
    wait_for_runs(&probe, 10);

    assert_eq!(probe.initialize_calls(), 1);
    assert_eq!(probe.stop_calls(), 0);
    manager.stop();
}

#[test]
fn test_component_restarted_after_run_error() {
    let manager = Manager::new(test_config());
    let log = CallLog::new();
    let probe = register_logged(&manager, "wifi", &log);

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || probe.initialize_calls() == 2));
    let runs = probe.run_calls();
    wait_for_runs(&probe, runs + 2);

    assert_eq!(probe.stop_calls(), 1);
    assert_eq!(probe.initialize_calls(), 2);
    assert!(manager.is_component_initialized("wifi").unwrap());

    let report = manager.component_report("wifi").unwrap();
    assert_eq!(report.restarts, 1);
    assert!(report.active);
    manager.stop();

    let operations = log.operations_for("wifi");
    let stop_at = operations
        .iter()
        .position(|op| *op == Operation::Stop)
        .unwrap();
    assert_eq!(operations[stop_at - 1], Operation::Run);
    assert_eq!(operations[stop_at + 1], Operation::Initialize);
    assert_eq!(operations[stop_at + 2], Operation::Run);
}

#[test]
fn test_component_quarantined_after_stop_error() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "display");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_stop([Status::Error]);
    probe.script_run([Status::Error]);

    assert!(wait_until(WAIT, || probe.stop_calls() == 1));
    assert!(wait_until(WAIT, || {
        !manager.is_component_initialized("display").unwrap()
    }));
    assert_no_more_runs(&probe);

    assert_eq!(probe.initialize_calls(), 1);
    assert_eq!(probe.status(), Status::Error);

    let report = manager.component_report("display").unwrap();
    assert!(!report.active);
    assert_eq!(report.error.as_deref(), Some("forced stop error"));
    manager.stop();
}

#[test]
fn test_component_quarantined_after_reinitialize_error() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "http");
    probe.script_initialize([Status::Running, Status::Error]);

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || probe.initialize_calls() == 2));
    assert!(wait_until(WAIT, || {
        !manager.is_component_initialized("http").unwrap()
    }));
    assert_no_more_runs(&probe);

    assert_eq!(probe.stop_calls(), 1);
    assert_eq!(probe.initialize_calls(), 2);
    assert_eq!(manager.component_report("http").unwrap().restarts, 0);
    manager.stop();
}

#[test]
fn test_failed_initialization_is_not_retried() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "nvs");
    probe.set_default_initialize(Status::Error);

    manager.start().unwrap();
    assert!(wait_until(WAIT, || probe.initialize_calls() == 1));
    let polls = probe.status_calls();
    std::thread::sleep(SETTLE);

    assert_eq!(probe.initialize_calls(), 1);
    assert_eq!(probe.run_calls(), 0);
    assert!(probe.status_calls() > polls);
    assert!(!manager.is_initialized());
    manager.stop();
}

#[test]
fn test_quarantined_component_reinitialized_when_status_reverts() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "sta");
    probe.script_initialize([Status::Error]);

    manager.start().unwrap();
    assert!(wait_until(WAIT, || probe.initialize_calls() == 1));
    assert_no_more_runs(&probe);

    probe.set_status(Status::Uninitialized);
    wait_for_runs(&probe, 1);

    assert_eq!(probe.initialize_calls(), 2);
    assert!(manager.is_component_initialized("sta").unwrap());
    manager.stop();
}

#[test]
fn test_restart_allowed_once_per_failure() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "ap");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || {
        manager.component_report("ap").unwrap().restarts == 1
    }));
    let runs = probe.run_calls();
    wait_for_runs(&probe, runs + 5);

    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || {
        manager.component_report("ap").unwrap().restarts == 2
    }));

    assert_eq!(probe.stop_calls(), 2);
    assert_eq!(probe.initialize_calls(), 3);
    assert!(manager.is_component_initialized("ap").unwrap());
    manager.stop();
}

#[test]
fn test_self_deinitialized_component_not_restarted() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "oneshot");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_run([Status::Deinitialized]);
    assert!(wait_until(WAIT, || {
        !manager.is_component_initialized("oneshot").unwrap()
    }));
    assert_no_more_runs(&probe);

    assert_eq!(probe.stop_calls(), 0);
    assert_eq!(probe.initialize_calls(), 1);
    manager.stop();

    let events = drain(&mut events);
    assert!(events.contains(&LifecycleEvent::Deactivated {
        tag: "oneshot".to_string(),
        status: Status::Deinitialized,
    }));
    assert!(!events
        .iter()
        .any(|event| matches!(event, LifecycleEvent::ComponentStopped { .. })));
}

#[test]
fn test_run_returning_uninitialized_triggers_fresh_initialize() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "reconnect");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.script_run([Status::Uninitialized]);
    assert!(wait_until(WAIT, || probe.initialize_calls() == 2));
    assert!(wait_until(WAIT, || {
        manager.is_component_initialized("reconnect").unwrap()
    }));

    assert_eq!(probe.stop_calls(), 0);
    manager.stop();
}

#[test]
fn test_shutdown_stops_only_active_components() {
    let manager = Manager::new(test_config());
    let healthy = register(&manager, "healthy");
    let broken = register(&manager, "broken");
    let quarantined = register(&manager, "quarantined");
    broken.set_default_initialize(Status::Error);

    manager.start().unwrap();
    wait_for_runs(&healthy, 1);
    wait_for_runs(&quarantined, 1);

    quarantined.script_stop([Status::Error]);
    quarantined.script_run([Status::Error]);
    assert!(wait_until(WAIT, || {
        !manager.is_component_initialized("quarantined").unwrap()
    }));
    assert_eq!(quarantined.stop_calls(), 1);

    manager.stop();

    assert_eq!(healthy.stop_calls(), 1);
    assert_eq!(healthy.status(), Status::Stopped);
    assert_eq!(broken.stop_calls(), 0);
    assert_eq!(quarantined.stop_calls(), 1);
    assert!(!manager.is_component_initialized("healthy").unwrap());
}

#[test]
fn test_is_initialized_tracks_every_entry() {
    let manager = Manager::new(test_config());
    assert!(manager.is_initialized());

    let first = register(&manager, "first");
    let second = register(&manager, "second");
    assert!(!manager.is_initialized());

    manager.start().unwrap();
    wait_for_runs(&first, 1);
    wait_for_runs(&second, 1);
    assert!(manager.is_initialized());

    second.script_stop([Status::Error]);
    second.script_run([Status::Error]);
    assert!(wait_until(WAIT, || !manager.is_initialized()));
    assert!(manager.is_component_initialized("first").unwrap());
    assert!(!manager.is_component_initialized("second").unwrap());
    manager.stop();
}

#[test]
fn test_unknown_tag_is_not_found() {
    let manager = Manager::new(test_config());
    register(&manager, "known");

    match manager.is_component_initialized("unknown") {
        Err(ManagerError::ComponentNotFound { tag }) => assert_eq!(tag, "unknown"),
        other => panic!("Unexpected lookup result: {:?}", other),
    }
    assert!(manager.component_report("unknown").is_err());
}

#[test]
#[should_panic(expected = "capacity of 1 reached")]
fn test_registration_beyond_capacity_panics() {
    let manager = Manager::new(test_config().with_capacity(1));
    register(&manager, "first");
    register(&manager, "second");
}

#[test]
fn test_blocked_component_stalls_every_other_component() {
    let manager = Manager::new(test_config());
    let stuck = register(&manager, "stuck");
    let bystander = register(&manager, "bystander");

    manager.start().unwrap();
    wait_for_runs(&stuck, 1);
    wait_for_runs(&bystander, 1);

    let gate = stuck.block_next_run();
    assert!(wait_until(WAIT, || stuck.is_blocked()));
    assert_no_more_runs(&bystander);

    // Health queries keep answering while the worker is stuck
    assert!(manager.is_initialized());

    match manager.stop_timeout(Duration::from_millis(20)) {
        Err(ManagerError::ShutdownTimeout { .. }) => {}
        other => panic!("Unexpected stop result: {:?}", other),
    }
    assert!(!manager.is_running());
    assert!(matches!(
        manager.start(),
        Err(ManagerError::WorkerStillRunning)
    ));

    gate.release();
    manager.stop();

    assert_eq!(stuck.stop_calls(), 1);
    assert_eq!(bystander.stop_calls(), 1);
}

#[test]
fn test_panicking_run_is_restarted() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "flaky");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    probe.panic_next_run();
    assert!(wait_until(WAIT, || {
        manager.component_report("flaky").unwrap().restarts == 1
    }));
    let runs = probe.run_calls();
    wait_for_runs(&probe, runs + 1);
    manager.stop();

    let events = drain(&mut events);
    let failure = events
        .iter()
        .find_map(|event| match event {
            LifecycleEvent::RunFailed { error, .. } => Some(error.clone()),
            _ => None,
        })
        .expect("no run failure published");
    assert!(failure.contains("panicked"));
}

#[test]
fn test_lifecycle_events_published() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "wifi");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);
    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || probe.initialize_calls() == 2));
    manager.stop();

    let events = drain(&mut events);
    let types: Vec<_> = events.iter().map(|event| event.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "manager_started",
            "initialized",
            "run_failed",
            "restarted",
            "component_stopped",
            "manager_stopped",
        ]
    );
    assert!(events.contains(&LifecycleEvent::Restarted {
        tag: "wifi".to_string(),
        restarts: 1,
    }));
}

#[test]
fn test_quarantine_event_names_the_failed_phase() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "led");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);
    probe.script_initialize([Status::Error]);
    probe.script_run([Status::Error]);
    assert!(wait_until(WAIT, || {
        !manager.is_component_initialized("led").unwrap()
    }));
    manager.stop();

    assert!(drain(&mut events).contains(&LifecycleEvent::Quarantined {
        tag: "led".to_string(),
        phase: RestartPhase::Initialize,
        error: "forced initialize error".to_string(),
    }));
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "wifi");

    manager.stop();
    manager.start().unwrap();
    manager.start().unwrap();
    wait_for_runs(&probe, 1);
    manager.stop();
    manager.stop();

    assert!(!manager.is_running());
    assert_eq!(probe.initialize_calls(), 1);
    assert_eq!(probe.stop_calls(), 1);

    let started = drain(&mut events)
        .iter()
        .filter(|event| matches!(event, LifecycleEvent::ManagerStarted { .. }))
        .count();
    assert_eq!(started, 1);
}

#[test]
fn test_start_after_stop_opens_new_session() {
    let manager = Manager::new(test_config());
    let mut events = manager.subscribe();
    let probe = register(&manager, "wifi");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);
    manager.stop();
    assert_eq!(probe.status(), Status::Stopped);

    // A stopped component is only brought back if it asks for it
    manager.start().unwrap();
    std::thread::sleep(SETTLE);
    assert_eq!(probe.initialize_calls(), 1);

    probe.set_status(Status::Uninitialized);
    assert!(wait_until(WAIT, || probe.initialize_calls() == 2));
    let runs = probe.run_calls();
    wait_for_runs(&probe, runs + 1);
    manager.stop();

    let sessions: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            LifecycleEvent::ManagerStarted { session } => Some(session),
            _ => None,
        })
        .collect();
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0], sessions[1]);
}

#[test]
fn test_component_added_while_running() {
    let manager = Manager::new(test_config());
    let first = register(&manager, "first");

    manager.start().unwrap();
    wait_for_runs(&first, 1);

    let late = register(&manager, "late");
    wait_for_runs(&late, 1);
    assert_eq!(manager.len(), 2);
    assert!(manager.is_initialized());
    manager.stop();
}

#[test]
fn test_mailbox_messages_reach_running_component() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "knob");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    assert!(probe.send(42));
    assert!(wait_until(WAIT, || probe.received() == vec![42]));
    manager.stop();
}

#[test]
fn test_zero_quantum_still_sleeps_between_passes() {
    let config = ManagerConfig {
        quantum_ms: 0,
        ..test_config()
    };
    let manager = Manager::new(config);
    let probe = register(&manager, "busy");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);
    let runs = probe.run_calls();
    std::thread::sleep(Duration::from_millis(100));
    manager.stop();

    // One millisecond per pass allows about a hundred runs, a spinning worker far more
    assert!(probe.run_calls() - runs < 1_000, "worker never slept");
}

#[test]
fn test_report_json_lists_components() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "wifi");
    probe.set_default_initialize(Status::Error);

    manager.start().unwrap();
    assert!(wait_until(WAIT, || probe.initialize_calls() == 1));
    manager.stop();

    let text = manager.report_json().unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json[0]["tag"], "wifi");
    assert_eq!(json[0]["active"], false);
    assert_eq!(json[0]["status"], "error");
    assert_eq!(json[0]["error"], "forced initialize error");
}

#[test]
fn test_report_serializes_to_json() {
    let manager = Manager::new(test_config());
    let probe = register(&manager, "wifi");

    manager.start().unwrap();
    wait_for_runs(&probe, 1);

    let json = serde_json::to_value(manager.report()).unwrap();
    assert_eq!(json[0]["tag"], "wifi");
    assert_eq!(json[0]["active"], true);
    assert_eq!(json[0]["status"], "running");
    assert_eq!(json[0]["restarts"], 0);
    manager.stop();
}

/// Asks the manager to stop from inside its own `run()`
struct StopsManager {
    manager: Weak<Manager>,
    status: Status,
}

impl Component for StopsManager {
    fn tag(&self) -> &str {
        "stopper"
    }

    fn status(&self) -> Status {
        self.status
    }

    fn initialize(&mut self) -> Status {
        self.status = Status::Running;
        self.status
    }

    fn run(&mut self) -> Status {
        if let Some(manager) = self.manager.upgrade() {
            manager.stop();
        }
        Status::Running
    }

    fn stop(&mut self) -> Status {
        self.status = Status::Stopped;
        self.status
    }
}

#[test]
fn test_stop_from_worker_thread_does_not_deadlock() {
    let manager = Arc::new(Manager::new(test_config()));
    let mut events = manager.subscribe();
    manager.add_component(component::shared(StopsManager {
        manager: Arc::downgrade(&manager),
        status: Status::Uninitialized,
    }));

    manager.start().unwrap();
    assert!(wait_until(WAIT, || !manager.is_running()));
    assert!(wait_until(WAIT, || {
        drain(&mut events)
            .iter()
            .any(|event| matches!(event, LifecycleEvent::ManagerStopped { .. }))
    }));
    assert!(!manager.is_component_initialized("stopper").unwrap());
}
