//! End-to-end workflow execution tests.
//!
//! These tests run real shell commands from YAML definitions and check the
//! status document the orchestrator produces.

use std::sync::Arc;
use std::time::Duration;
use waypoint::testing::{RecordingSink, WorkflowFixture};
use waypoint::{ConfigError, Outcome, WorkflowError, WorkflowState};

use crate::common::{wait_for_status, wait_for_task};

/// Test: groups and tasks run in declaration order.
#[tokio::test]
async fn test_runs_groups_in_order() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: prepare
    tasks:
      - id: fetch
        cmd: "echo fetch >> log.txt"
      - id: unpack
        cmd: "echo unpack >> log.txt"
  - id: install
    tasks:
      - id: copy
        cmd: "echo copy >> log.txt"
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let outcome = workflow.start().await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(workflow.state(), WorkflowState::Finished);

    let log = std::fs::read_to_string(fixture.path("log.txt")).unwrap();
    assert_eq!(log, "fetch\nunpack\ncopy\n");

    let status = workflow.snapshot().await;
    assert!(status.finished);
    assert_eq!(status.percent, 100);
    for group in &status.groups {
        assert!(group.started && group.finished);
        for task in &group.tasks {
            assert!(task.started && task.finished);
            assert_eq!(task.percent, 1.0);
        }
    }

    // A finished workflow leaves no status file behind.
    assert!(!fixture.has_status());
}

/// Test: the weighted progress of a skipped group plus a partially done group.
#[tokio::test]
async fn test_weighted_progress_with_skipped_group() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: legacy
    skip_cmd: "exit 0"
    tasks:
      - id: migrate
        cmd: "echo migrate >> log.txt"
  - id: main
    tasks:
      - id: small
        cmd: "true"
        weight: 1
      - id: large
        cmd: "progress 0.5"
        weight: 3
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let sink = RecordingSink::new();
    workflow.subscribe(Arc::new(sink.clone())).await;

    let outcome = workflow.start().await.unwrap();
    assert_eq!(outcome, Outcome::Finished);

    // (1 + 3 * 0.5) / 4 = 62.5%, truncated.
    let percents = sink.percents();
    assert!(percents.contains(&62), "percents seen: {percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    // The skipped group never ran a command.
    assert!(!fixture.path("log.txt").exists());
}

/// Test: a skipped group is recorded as started and finished without running.
#[tokio::test]
async fn test_skipped_group_shape() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: optional
    skip_cmd: "test -d ."
    tasks:
      - {id: a, cmd: "echo a >> log.txt"}
      - {id: b, cmd: "echo b >> log.txt"}
  - id: required
    skip_cmd: "exit 1"
    tasks:
      - {id: c, cmd: "echo c >> log.txt"}
"#,
    );

    let workflow = fixture.open().await.unwrap();
    workflow.start().await.unwrap();

    let status = workflow.snapshot().await;
    let optional = status.group("optional").unwrap();
    assert!(optional.skip);
    assert!(optional.started && optional.finished);
    assert!(optional.tasks.iter().all(|t| t.started && t.finished));

    let required = status.group("required").unwrap();
    assert!(!required.skip);

    let log = std::fs::read_to_string(fixture.path("log.txt")).unwrap();
    assert_eq!(log, "c\n");
}

/// Test: a workflow whose groups are all skipped finishes at zero percent.
#[tokio::test]
async fn test_all_groups_skipped() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: one
    skip_cmd: "true"
    tasks: [{id: a, cmd: "exit 1"}]
  - id: two
    skip_cmd: "true"
    tasks: [{id: b, cmd: "exit 1"}]
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let outcome = workflow.start().await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    let status = workflow.snapshot().await;
    assert!(status.finished);
    assert_eq!(status.percent, 0);
    assert!(status.error.is_none());
}

/// Test: resolved variables reach skip predicates and tasks.
#[tokio::test]
async fn test_variables_are_injected() {
    let fixture = WorkflowFixture::new(
        r#"
vars:
  GREETING: "echo hello"
  TARGET: "printf '  world  '"
groups:
  - id: skipped
    skip_cmd: 'test "$GREETING" = hello'
    tasks: [{id: never, cmd: "touch never"}]
  - id: main
    tasks:
      - id: greet
        cmd: 'echo "$GREETING $TARGET" > greeting.txt'
"#,
    );

    let workflow = fixture.open().await.unwrap();
    workflow.start().await.unwrap();

    let greeting = std::fs::read_to_string(fixture.path("greeting.txt")).unwrap();
    assert_eq!(greeting, "hello world\n");
    assert!(!fixture.path("never").exists());

    let status = workflow.snapshot().await;
    let vars = status.vars.unwrap();
    assert_eq!(vars.get("TARGET"), Some("world"));
}

/// Test: a failing variable command aborts startup.
#[tokio::test]
async fn test_variable_failure_is_fatal() {
    let fixture = WorkflowFixture::new(
        r#"
vars:
  BROKEN: "exit 3"
groups:
  - id: main
    tasks: [{id: a, cmd: "touch ran"}]
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let err = workflow.start().await.unwrap_err();

    assert!(matches!(
        err,
        WorkflowError::Config(ConfigError::Variable { ref name, .. }) if name == "BROKEN"
    ));
    assert!(!fixture.path("ran").exists());
    assert_eq!(workflow.state(), WorkflowState::Fresh);
}

/// Test: a failing task ends the run and records its exit status.
#[tokio::test]
async fn test_task_failure_ends_run() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: main
    tasks:
      - {id: ok, cmd: "true"}
      - {id: broken, cmd: "exit 2"}
      - {id: after, cmd: "touch after"}
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let err = workflow.start().await.unwrap_err();

    match err {
        WorkflowError::Task { group, task, .. } => {
            assert_eq!(group.as_str(), "main");
            assert_eq!(task.as_str(), "broken");
        }
        other => panic!("unexpected error: {other}"),
    }

    let status = workflow.snapshot().await;
    assert!(status.finished);
    assert_eq!(status.error.as_deref(), Some("exit status 2"));
    let main = status.group("main").unwrap();
    assert_eq!(main.error.as_deref(), Some("exit status 2"));
    assert_eq!(main.tasks[1].error.as_deref(), Some("exit status 2"));
    assert!(!main.tasks[2].started);
    assert!(!fixture.path("after").exists());
    assert!(!fixture.has_status());
}

/// Test: an error the task reports itself takes precedence over its exit status.
#[tokio::test]
async fn test_reported_error_is_kept() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: main
    tasks:
      - id: check
        cmd: 'error "disk full"; output "still running"; exit 1'
"#,
    );

    let workflow = fixture.open().await.unwrap();
    assert!(workflow.start().await.is_err());

    let status = workflow.snapshot().await;
    assert_eq!(status.error.as_deref(), Some("disk full"));
    let main = status.group("main").unwrap();
    assert_eq!(main.last_message, "still running");
    assert_eq!(status.last_message, "still running");
}

/// Test: a subscriber attaching mid-run sees only the current snapshot first.
#[tokio::test]
async fn test_late_subscriber_gets_current_snapshot() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: main
    tasks:
      - id: chatty
        cmd: 'output one; output two; output three; while [ ! -f go ]; do sleep 0.05; done'
"#,
    );

    let workflow = fixture.open().await.unwrap();
    let run = tokio::spawn({
        let workflow = workflow.clone();
        async move { workflow.start().await }
    });

    wait_for_task(&workflow, "chatty").await;
    wait_for_status(&workflow, Duration::from_secs(10), |s| {
        s.last_message == "three"
    })
    .await;

    let sink = RecordingSink::new();
    workflow.subscribe(Arc::new(sink.clone())).await;

    let first = sink.values();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["lastMessage"], "three");
    assert_eq!(first[0]["currentTask"], "chatty");

    std::fs::write(fixture.path("go"), "").unwrap();
    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Finished);

    let last = sink.last().unwrap();
    assert_eq!(last["finished"], true);
    assert_eq!(last["percent"], 100);
}

/// Test: an invalid definition is rejected at load.
#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: main
    tasks:
      - id: a
"#,
    );

    let err = fixture.open().await.err().unwrap();
    assert!(matches!(
        err,
        WorkflowError::Config(ConfigError::TaskMissingCommand(_))
    ));
}
