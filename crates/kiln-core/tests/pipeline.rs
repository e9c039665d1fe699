#![cfg(unix)]

mod common;

use common::{lines, program, Harness};
use kiln_core::kiln_types::{CorrelationId, EventKind, ExecutionRequest, OutputEvent};
use kiln_core::{ExecutionCoordinator, OutputRelay};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn pair(kind: &str, line: &str) -> (String, String) {
    (kind.to_string(), line.to_string())
}

#[tokio::test]
async fn test_successful_program_streams_output_and_exit() {
    let mut harness = Harness::new().await;

    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program("echo Hello")))
        .await;

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));

    let events = harness.drain();
    assert_eq!(
        lines(&events),
        vec![
            pair("system", "Starting execution"),
            pair("system", "Compilation succeeded"),
            pair("stdout", "Hello"),
            pair("exit", "Program exited with code 0"),
        ]
    );
    assert!(events.iter().all(|e| e.correlation_id == result.correlation_id));
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert!(events.iter().all(|e| e.timestamp.is_some()));

    assert_eq!(harness.coordinator.workspaces().active(), 0);
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_compile_failure_reports_diagnostics_and_never_runs() {
    let mut harness = Harness::new().await;

    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program(
            "# KILN_COMPILE_ERROR\necho should-not-run",
        )))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);

    let events = harness.drain();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::System,
            EventKind::Stderr,
            EventKind::Stderr,
            EventKind::Error,
        ]
    );
    assert!(events[1].line.contains("error: expected ';'"));
    assert_eq!(events[2].line, "compilation terminated.");
    assert_eq!(events[3].line, "Compilation failed with exit code 1");
    assert!(events.iter().all(|e| e.kind != EventKind::Stdout));
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_runtime_failure_reports_exit_code() {
    let mut harness = Harness::new().await;

    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program(
            "echo partial\necho oops >&2\nexit 2",
        )))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(2));

    let events = harness.drain();
    let pairs = lines(&events);
    let tail = &pairs[2..];
    assert!(tail.contains(&pair("stdout", "partial")));
    assert!(tail.contains(&pair("stderr", "oops")));
    assert_eq!(
        events.last().map(|e| (e.kind, e.line.as_str())),
        Some((EventKind::Error, "Program exited with code 2"))
    );
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_run_deadline_kills_program() {
    let mut harness = Harness::with_config(|config| config.limits.run_timeout_secs = 1).await;

    let started = Instant::now();
    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program(
            "echo spinning\nwhile :; do :; done",
        )))
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!result.success);
    assert_eq!(result.exit_code, Some(-9));

    let events = harness.drain();
    assert!(lines(&events).contains(&pair("stdout", "spinning")));
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.line, "Program execution timed out after 1s");
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_compile_deadline_stops_toolchain() {
    let mut harness =
        Harness::with_config(|config| config.limits.compile_timeout_secs = 1).await;

    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program("# KILN_COMPILE_HANG")))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    let events = harness.drain();
    assert_eq!(
        events.last().map(|e| e.line.as_str()),
        Some("Compilation timed out after 1s")
    );
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_missing_artifact_is_a_fault() {
    let mut harness = Harness::new().await;

    let result = harness
        .coordinator
        .execute(ExecutionRequest::new(program("# KILN_NO_ARTIFACT")))
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    let last = harness.drain().pop().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert!(last.line.starts_with("Unexpected error:"));
}

#[tokio::test]
async fn test_concurrent_sessions_stay_separated() {
    let mut harness = Harness::new().await;

    let first = program("for i in 1 2 3 4 5; do echo a$i; done");
    let second = program("for i in 1 2 3 4 5; do echo b$i; done");
    let (a, b) = tokio::join!(
        harness.coordinator.execute(ExecutionRequest::new(first)),
        harness.coordinator.execute(ExecutionRequest::new(second)),
    );

    assert!(a.success && b.success);
    assert_ne!(a.correlation_id, b.correlation_id);

    let events = harness.drain();
    for (result, prefix) in [(&a, "a"), (&b, "b")] {
        let own: Vec<&OutputEvent> = events
            .iter()
            .filter(|e| e.correlation_id == result.correlation_id)
            .collect();
        let stdout: Vec<&str> = own
            .iter()
            .filter(|e| e.kind == EventKind::Stdout)
            .map(|e| e.line.as_str())
            .collect();
        let expected: Vec<String> = (1..=5).map(|i| format!("{}{}", prefix, i)).collect();
        assert_eq!(stdout, expected);

        let sequences: Vec<u64> = own.iter().map(|e| e.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(own.last().unwrap().kind, EventKind::Exit);
    }
    assert_eq!(harness.leftover_workspaces(), 0);
}

#[tokio::test]
async fn test_slot_limit_serializes_sessions() {
    let mut harness = Harness::with_config(|config| config.limits.max_concurrent = 1).await;

    let started = Instant::now();
    let slow = || ExecutionRequest::new(program("sleep 1\necho done"));
    let (a, b) = tokio::join!(
        harness.coordinator.execute(slow()),
        harness.coordinator.execute(slow()),
    );

    assert!(a.success && b.success);
    assert!(started.elapsed() >= Duration::from_secs(2));

    let events = harness.drain();
    let exits: Vec<&CorrelationId> = events
        .iter()
        .filter(|e| e.kind == EventKind::Exit)
        .map(|e| &e.correlation_id)
        .collect();
    assert_eq!(exits.len(), 2);
}

#[tokio::test]
async fn test_cancel_running_session() {
    let root = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(ExecutionCoordinator::new(common::config(root.path())).unwrap());
    let (tx, mut rx) = mpsc::channel(1024);
    coordinator.attach_consumer(tx).await;

    let running = Arc::clone(&coordinator);
    let handle = tokio::spawn(async move {
        running
            .execute(ExecutionRequest::new(program("echo ready\nwhile :; do :; done")))
            .await
    });

    let id = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no output before deadline")
            .unwrap();
        if event.kind == EventKind::Stdout && event.line == "ready" {
            break event.correlation_id;
        }
    };

    assert_eq!(coordinator.live_sessions(), vec![id.clone()]);
    assert!(coordinator.cancel(&id));

    let result = handle.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.correlation_id, id);
    assert_eq!(result.exit_code, Some(-9));

    let last = rx.recv().await.unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.line, "Execution cancelled");

    assert!(coordinator.live_sessions().is_empty());
    assert!(!coordinator.cancel(&id));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_dropped_execution_releases_workspace() {
    let root = tempfile::tempdir().unwrap();
    let coordinator = ExecutionCoordinator::new(common::config(root.path())).unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        coordinator.execute(ExecutionRequest::new(program("while :; do :; done"))),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(coordinator.workspaces().active(), 0);
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    assert!(coordinator.live_sessions().is_empty());
}

#[tokio::test]
async fn test_events_buffer_until_consumer_attaches() {
    let root = tempfile::tempdir().unwrap();
    let config = common::config(root.path());
    let relay = Arc::new(OutputRelay::new(&config.relay));
    let coordinator = ExecutionCoordinator::with_relay(config, Arc::clone(&relay)).unwrap();

    let result = coordinator
        .execute(ExecutionRequest::new(program("echo early")))
        .await;
    assert!(result.success);
    assert_eq!(relay.buffered().await, 4);

    let (tx, mut rx) = mpsc::channel(16);
    assert!(coordinator.attach_consumer(tx).await);

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }
    assert_eq!(
        lines(&received),
        vec![
            pair("system", "Starting execution"),
            pair("system", "Compilation succeeded"),
            pair("stdout", "early"),
            pair("exit", "Program exited with code 0"),
        ]
    );
    assert_eq!(relay.buffered().await, 0);
}

#[tokio::test]
async fn test_slow_consumer_receives_output_produced_before_exit() {
    let root = tempfile::tempdir().unwrap();
    let coordinator = ExecutionCoordinator::new(common::config(root.path())).unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    assert!(coordinator.attach_consumer(tx).await);

    let consumer = tokio::spawn(async move {
        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.kind.is_terminal();
            received.push(event);
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        received
    });

    let result = coordinator
        .execute(ExecutionRequest::new(program(
            "i=0; while [ $i -lt 1000 ]; do echo row$i; i=$((i+1)); done",
        )))
        .await;
    assert!(result.success);

    let received = tokio::time::timeout(Duration::from_secs(30), consumer)
        .await
        .expect("consumer never saw the exit event")
        .unwrap();
    let stdout: Vec<&str> = received
        .iter()
        .filter(|e| e.kind == EventKind::Stdout)
        .map(|e| e.line.as_str())
        .collect();
    let expected: Vec<String> = (0..1000).map(|i| format!("row{}", i)).collect();
    assert_eq!(stdout, expected);
    assert_eq!(
        received.last().map(|e| e.line.as_str()),
        Some("Program exited with code 0")
    );
    assert_eq!(coordinator.relay().buffered().await, 0);
}
