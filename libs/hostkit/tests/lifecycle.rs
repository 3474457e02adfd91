//! Orchestrator behavior against real component trees on disk.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{empty_config, recorder_registry, CallLog, Fault, HostTree};
use hostkit::{ComponentOrchestrator, ComponentState, HostError, RunOptions, ShutdownOptions};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

fn faults(entries: &[(&str, Fault)]) -> HashMap<String, Vec<Fault>> {
    let mut map: HashMap<String, Vec<Fault>> = HashMap::new();
    for (name, f) in entries {
        map.entry(name.to_string()).or_default().push(*f);
    }
    map
}

fn orchestrator(tree: &HostTree, names: &[&str], log: &CallLog, f: HashMap<String, Vec<Fault>>) -> ComponentOrchestrator {
    let paths = names.iter().map(|n| tree.component(n, &[])).collect();
    ComponentOrchestrator::new(tree.settings(paths), recorder_registry(log, f), empty_config())
}

#[tokio::test]
async fn pause_then_resume_mirrors_load_order() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B", "C"], &log, HashMap::new());

    orch.run_components(CancellationToken::new()).await.unwrap();
    assert_eq!(log.take(), vec!["Start(A)", "Start(B)", "Start(C)"]);

    orch.pause_all().await;
    orch.resume_all().await;
    assert_eq!(
        log.take(),
        vec!["Pause(C)", "Pause(B)", "Pause(A)", "Resume(A)", "Resume(B)", "Resume(C)"]
    );

    let states: Vec<_> = orch.get_components().iter().map(|c| c.state()).collect();
    assert!(states.iter().all(|s| *s == ComponentState::Running));
}

#[tokio::test]
async fn pause_skips_components_that_are_not_running() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B"], &log, HashMap::new());
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    orch.pause_all().await;
    orch.pause_all().await;
    assert_eq!(log.take(), vec!["Pause(B)", "Pause(A)"]);

    orch.resume_all().await;
    orch.resume_all().await;
    assert_eq!(log.take(), vec!["Resume(A)", "Resume(B)"]);
}

#[tokio::test]
#[traced_test]
async fn unload_continues_past_failing_stop() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B", "C"], &log, faults(&[("B", Fault::FailStop)]));
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    let components = orch.get_components();
    orch.unload_all().await;

    assert_eq!(log.take(), vec!["Stop(C)", "Stop(B)", "Stop(A)"]);
    assert!(orch.get_components().is_empty());
    assert!(components.iter().all(|c| c.state() == ComponentState::Unloaded));
    assert!(components.iter().all(|c| c.boundary().is_none()));
    assert!(logs_contain("Failed to unload component"));
    assert!(logs_contain("B exploded while stopping"));
}

#[tokio::test]
#[traced_test]
async fn unload_continues_past_panicking_stop() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B", "C"], &log, faults(&[("B", Fault::PanicStop)]));
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    let components = orch.get_components();
    orch.unload_all().await;

    assert_eq!(log.take(), vec!["Stop(C)", "Stop(B)", "Stop(A)"]);
    assert!(orch.get_components().is_empty());
    assert!(components.iter().all(|c| c.state() == ComponentState::Unloaded));
    assert!(logs_contain("B blew up while stopping"));
}

#[tokio::test]
#[traced_test]
async fn unload_reports_stop_that_outlives_the_timeout() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let paths = vec![tree.component("A", &[]), tree.component("B", &[])];
    let mut settings = tree.settings(paths);
    settings.stopping_timeout = Duration::from_millis(50);
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(&log, faults(&[("B", Fault::HangStop)])),
        empty_config(),
    );
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    tokio::time::timeout(Duration::from_secs(2), orch.unload_all())
        .await
        .expect("unload_all must respect the stopping timeout");

    assert_eq!(log.take(), vec!["Stop(A)"]);
    assert!(orch.get_components().is_empty());
    assert!(logs_contain("unload failed: stop did not finish"));
}

#[tokio::test]
#[traced_test]
async fn pause_walk_survives_a_panicking_unit() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B", "C"], &log, faults(&[("B", Fault::PanicPause)]));
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    orch.pause_all().await;
    assert_eq!(log.take(), vec!["Pause(C)", "Pause(A)"]);
    let states: Vec<_> = orch.get_components().iter().map(|c| c.state()).collect();
    assert_eq!(
        states,
        vec![ComponentState::Paused, ComponentState::Running, ComponentState::Paused]
    );
    assert!(logs_contain("Failed to pause component"));
    assert!(logs_contain("B blew up while pausing"));

    orch.resume_all().await;
    assert_eq!(log.take(), vec!["Resume(A)", "Resume(C)"]);
}

#[tokio::test]
#[traced_test]
async fn stop_all_abandons_components_past_the_deadline() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B"], &log, faults(&[("B", Fault::HangStop)]));
    orch.run_components(CancellationToken::new()).await.unwrap();
    log.take();

    tokio::time::timeout(Duration::from_secs(2), orch.stop_all(Duration::from_millis(100)))
        .await
        .expect("stop_all must respect its timeout");

    let components = orch.get_components();
    assert_eq!(components[0].state(), ComponentState::Stopped);
    assert_eq!(components[1].state(), ComponentState::Stopping);
    assert_eq!(log.take(), vec!["Stop(A)"]);
    assert!(logs_contain("did not stop in time"));

    // unloading still clears everything, including the abandoned component
    orch.unload_all().await;
    assert!(orch.get_components().is_empty());
}

#[tokio::test]
async fn load_failure_keeps_earlier_components_registered() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let a = tree.component("A", &[]);
    let b = tree.component("B", &["Missing"]);
    let c = tree.component("C", &[]);
    let orch = ComponentOrchestrator::new(
        tree.settings(vec![a, b.clone(), c]),
        recorder_registry(&log, HashMap::new()),
        empty_config(),
    );

    let err = orch.run_components(CancellationToken::new()).await.unwrap_err();
    match &err {
        HostError::Resolution {
            component,
            dependency,
            ..
        } => {
            assert_eq!(component, &b.display().to_string());
            assert_eq!(dependency, "Missing");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let registered: Vec<_> = orch.get_components().iter().map(|c| c.path().to_path_buf()).collect();
    assert_eq!(common::names(&registered), vec!["A"]);
    assert_eq!(log.take(), vec!["Start(A)"]);
}

#[tokio::test]
async fn start_failure_is_fatal_and_not_registered() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B", "C"], &log, faults(&[("B", Fault::FailStart)]));

    let err = orch.run_components(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, HostError::Lifecycle { .. }));
    assert!(err.to_string().contains("start failed"));
    assert_eq!(orch.get_components().len(), 1);
}

#[tokio::test]
async fn async_start_gates_pause_until_started() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let paths = vec![tree.component("Slow", &[])];
    let mut settings = tree.settings(paths);
    settings.async_start = true;
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(&log, faults(&[("Slow", Fault::SlowStart(Duration::from_millis(150)))])),
        empty_config(),
    );

    orch.run_components(CancellationToken::new()).await.unwrap();
    // start was dispatched, not awaited
    assert!(log.snapshot().is_empty());
    assert_eq!(orch.get_components()[0].state(), ComponentState::Starting);

    orch.pause_all().await;
    assert_eq!(log.take(), vec!["Start(Slow)", "Pause(Slow)"]);
    assert_eq!(orch.get_components()[0].state(), ComponentState::Paused);
}

#[tokio::test]
async fn stop_and_unload_wait_for_pending_async_start() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let mut settings = tree.settings(vec![tree.component("Slow", &[]), tree.component("Late", &[])]);
    settings.async_start = true;
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(
            &log,
            faults(&[
                ("Slow", Fault::SlowStart(Duration::from_millis(150))),
                ("Late", Fault::SlowStart(Duration::from_millis(100))),
            ]),
        ),
        empty_config(),
    );

    orch.run_components(CancellationToken::new()).await.unwrap();
    assert!(log.snapshot().is_empty());

    orch.stop_all(Duration::from_secs(2)).await;
    let calls = log.take();
    for name in ["Slow", "Late"] {
        let started = calls.iter().position(|c| *c == format!("Start({name})"));
        let stopped = calls.iter().position(|c| *c == format!("Stop({name})"));
        assert!(started.is_some() && started < stopped, "{calls:?}");
    }

    let components = orch.get_components();
    assert!(components.iter().all(|c| c.state() == ComponentState::Stopped));
    orch.unload_all().await;
    assert!(log.take().is_empty());
    assert!(components.iter().all(|c| c.state() == ComponentState::Unloaded));
}

#[tokio::test]
async fn unload_waits_for_pending_async_start() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let mut settings = tree.settings(vec![tree.component("Slow", &[])]);
    settings.async_start = true;
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(&log, faults(&[("Slow", Fault::SlowStart(Duration::from_millis(100)))])),
        empty_config(),
    );

    orch.run_components(CancellationToken::new()).await.unwrap();
    orch.unload_all().await;
    assert_eq!(log.take(), vec!["Start(Slow)", "Stop(Slow)"]);
    assert!(orch.get_components().is_empty());
}

#[tokio::test]
#[traced_test]
async fn async_start_panic_marks_component_failed() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let mut settings = tree.settings(vec![tree.component("Bad", &[])]);
    settings.async_start = true;
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(&log, faults(&[("Bad", Fault::PanicStart)])),
        empty_config(),
    );

    orch.run_components(CancellationToken::new()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), orch.pause_all())
        .await
        .expect("pause_all must not wait on a start that panicked");

    let bad = orch.get_components()[0].clone();
    assert_eq!(bad.state(), ComponentState::Failed);
    assert!(logs_contain("Asynchronous start failed"));
    assert!(logs_contain("Bad blew up while starting"));

    tokio::time::timeout(Duration::from_secs(2), orch.unload_all())
        .await
        .expect("unload_all must not wait on a start that panicked");
    assert_eq!(bad.state(), ComponentState::Unloaded);
}

#[tokio::test]
async fn sync_start_panic_is_a_start_failure() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let orch = orchestrator(&tree, &["A", "B"], &log, faults(&[("B", Fault::PanicStart)]));

    let err = orch.run_components(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, HostError::Lifecycle { .. }));
    assert!(err.display_chain().contains("B blew up while starting"), "{}", err.display_chain());
    assert_eq!(orch.get_components().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn async_start_failure_marks_component_failed() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let mut settings = tree.settings(vec![tree.component("Bad", &[])]);
    settings.async_start = true;
    let orch = ComponentOrchestrator::new(
        settings,
        recorder_registry(&log, faults(&[("Bad", Fault::FailStart)])),
        empty_config(),
    );

    orch.run_components(CancellationToken::new()).await.unwrap();
    let bad = orch.get_components()[0].clone();
    bad.wait_started().await;
    assert_eq!(bad.state(), ComponentState::Failed);
    assert!(logs_contain("Asynchronous start failed"));

    orch.unload_all().await;
    assert_eq!(bad.state(), ComponentState::Unloaded);
}

#[tokio::test]
async fn run_drives_full_cycle_with_token() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let settings = tree.settings(vec![tree.component("A", &[]), tree.component("B", &[])]);
    let token = CancellationToken::new();

    let handle = tokio::spawn(hostkit::run(RunOptions {
        settings,
        config: empty_config(),
        factories: recorder_registry(&log, HashMap::new()),
        shutdown: ShutdownOptions::Token(token.clone()),
    }));

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("run must return after cancellation")
        .unwrap()
        .unwrap();

    let calls = log.take();
    assert_eq!(calls[..2], ["Start(A)", "Start(B)"]);
    // stops run concurrently; both must have happened
    let mut stops = calls[2..].to_vec();
    stops.sort();
    assert_eq!(stops, vec!["Stop(A)", "Stop(B)"]);
}

#[tokio::test]
async fn run_reports_offending_component_on_startup_failure() {
    let tree = HostTree::new();
    let log = CallLog::default();
    let a = tree.component("A", &[]);
    let b = tree.component("B", &["Gone"]);
    let settings = tree.settings(vec![a, b]);

    let err = hostkit::run(RunOptions {
        settings,
        config: empty_config(),
        factories: recorder_registry(&log, HashMap::new()),
        shutdown: ShutdownOptions::Token(CancellationToken::new()),
    })
    .await
    .unwrap_err();

    let msg = format!("{err:#}");
    assert!(msg.contains("B.module"), "{msg}");
    assert!(msg.contains("'Gone'"), "{msg}");
    // A was started, then unwound
    assert_eq!(log.take(), vec!["Start(A)", "Stop(A)"]);
}
