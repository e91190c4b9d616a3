//! Recovery integration tests.
//!
//! These tests verify that a run picks up from its status file, both after
//! an interruption and after a task that ends the process on purpose.

use waypoint::testing::WorkflowFixture;
use waypoint::{
    Definition, EXIT_CODE_CONTINUE, FileStore, GroupId, InMemoryStore, Outcome, Status,
    StatusStore, TaskId, Workflow, WorkflowError,
};

const PIPELINE: &str = r#"
groups:
  - id: setup
    tasks:
      - {id: a, cmd: "echo a >> log.txt"}
      - {id: b, cmd: "echo b >> log.txt"}
  - id: finish
    tasks:
      - {id: c, cmd: "echo c >> log.txt"}
"#;

fn log(fixture: &WorkflowFixture) -> String {
    std::fs::read_to_string(fixture.path("log.txt")).unwrap_or_default()
}

/// Write a status that looks like a run interrupted while `task` was running.
async fn interrupted_status(fixture: &WorkflowFixture, group: &str, task: &str) -> Status {
    let definition = Definition::parse(PIPELINE).unwrap();
    let mut status = definition.to_status();
    status.started = true;
    status.current_group = Some(GroupId::new(group));
    status.current_task = Some(TaskId::new(task));
    for g in &mut status.groups {
        if g.id.as_str() == group {
            g.started = true;
            for t in &mut g.tasks {
                if t.id.as_str() == task {
                    t.started = true;
                    t.percent = 0.3;
                }
            }
        }
    }
    fixture.store().save(&status).await.unwrap();
    status
}

/// Test: a task flagged `exits` stops the run and the next run continues after it.
#[tokio::test]
async fn test_exits_then_resume() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: setup
    tasks:
      - {id: a, cmd: "echo a >> log.txt"}
      - {id: reboot, cmd: "echo reboot >> log.txt", exits: true}
  - id: finish
    tasks:
      - {id: c, cmd: "echo c >> log.txt"}
"#,
    );

    let first = fixture.open().await.unwrap();
    let outcome = first.start().await.unwrap();

    assert_eq!(
        outcome,
        Outcome::Exited {
            group: GroupId::new("setup"),
            task: TaskId::new("reboot"),
        }
    );
    assert_eq!(outcome.exit_code(), EXIT_CODE_CONTINUE);
    assert_eq!(log(&fixture), "a\nreboot\n");

    let stored = fixture.status_json().unwrap();
    assert_eq!(stored["finished"], false);
    assert_eq!(stored["currentGroup"], "setup");
    assert_eq!(stored["currentTask"], "reboot");
    assert_eq!(stored["groups"][0]["tasks"][1]["finished"], false);
    drop(first);

    let second = fixture.open().await.unwrap();
    let outcome = second.start().await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(log(&fixture), "a\nreboot\nc\n");

    let status = second.snapshot().await;
    assert!(status.finished);
    assert_eq!(status.percent, 100);
    assert!(status.groups[0].tasks[1].finished);
    assert!(!fixture.has_status());
}

/// Test: an interrupted task runs again, the tasks before it do not.
#[tokio::test]
async fn test_resume_reruns_current_task() {
    let fixture = WorkflowFixture::new(PIPELINE);
    interrupted_status(&fixture, "setup", "b").await;

    let workflow = fixture.open().await.unwrap();
    let outcome = workflow.resume().await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(log(&fixture), "b\nc\n");
}

/// Test: a resumed run ends with the same task records as an uninterrupted one.
#[tokio::test]
async fn test_resume_is_idempotent() {
    let straight = WorkflowFixture::new(PIPELINE);
    let workflow = straight.open().await.unwrap();
    workflow.start().await.unwrap();
    let expected = workflow.snapshot().await;

    let resumed = WorkflowFixture::new(PIPELINE);
    interrupted_status(&resumed, "finish", "c").await;
    let workflow = resumed.open().await.unwrap();
    workflow.start().await.unwrap();
    let actual = workflow.snapshot().await;

    assert_eq!(log(&resumed), "c\n");
    assert_eq!(actual.percent, expected.percent);
    for (a, e) in actual.groups.iter().zip(&expected.groups) {
        assert_eq!(a.id, e.id);
        assert_eq!(a.started, e.started);
        assert_eq!(a.finished, e.finished);
        assert_eq!(a.percent, e.percent);
        for (at, et) in a.tasks.iter().zip(&e.tasks) {
            assert_eq!(at.started, et.started);
            assert_eq!(at.finished, et.finished);
            assert_eq!(at.percent, et.percent);
        }
    }
}

/// Test: a group whose predicate became true across an exit is skipped on resume.
#[tokio::test]
async fn test_resume_rechecks_skip_predicates() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: upgrade
    tasks:
      - {id: install, cmd: "touch upgraded", exits: true}
  - id: legacy
    skip_cmd: "test -f upgraded"
    tasks:
      - {id: patch, cmd: "echo legacy >> log.txt"}
  - id: finish
    tasks:
      - {id: done, cmd: "echo done >> log.txt"}
"#,
    );

    let first = fixture.open().await.unwrap();
    assert!(matches!(
        first.start().await.unwrap(),
        Outcome::Exited { .. }
    ));
    let stored = fixture.status_json().unwrap();
    assert_eq!(stored["groups"][1]["skip"], false);
    drop(first);

    let second = fixture.open().await.unwrap();
    let outcome = second.start().await.unwrap();

    assert_eq!(outcome, Outcome::Finished);
    assert_eq!(log(&fixture), "done\n");
    let status = second.snapshot().await;
    let legacy = status.group("legacy").unwrap();
    assert!(legacy.skip);
    assert!(legacy.started && legacy.finished);
}

/// Test: the group being resumed runs even if its predicate is now true.
#[tokio::test]
async fn test_resumed_group_is_not_skipped() {
    let fixture = WorkflowFixture::new(
        r#"
groups:
  - id: first
    skip_cmd: "true"
    tasks:
      - {id: a, cmd: "echo a >> log.txt"}
  - id: second
    skip_cmd: "true"
    tasks:
      - {id: b, cmd: "echo b >> log.txt"}
"#,
    );

    // The first run decided not to skip `first`, then stopped inside it.
    let definition = Definition::from_file(fixture.definition_path()).unwrap();
    let mut status = definition.to_status();
    status.started = true;
    status.current_group = Some(GroupId::new("first"));
    status.current_task = Some(TaskId::new("a"));
    fixture.store().save(&status).await.unwrap();

    let workflow = fixture.open().await.unwrap();
    workflow.start().await.unwrap();

    assert_eq!(log(&fixture), "a\n");
    let status = workflow.snapshot().await;
    assert!(!status.group("first").unwrap().skip);
    assert!(status.group("second").unwrap().skip);
}

/// Test: the stored status wins over the definition file.
#[tokio::test]
async fn test_stored_status_wins_over_definition() {
    let fixture = WorkflowFixture::new(PIPELINE);
    interrupted_status(&fixture, "setup", "a").await;
    std::fs::write(fixture.definition_path(), "not: [valid").unwrap();

    let workflow = fixture.open().await.unwrap();
    workflow.start().await.unwrap();

    assert_eq!(log(&fixture), "a\nb\nc\n");
}

/// Test: resume without a stored status is refused.
#[tokio::test]
async fn test_resume_without_status_fails() {
    let definition = Definition::parse(PIPELINE).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let workflow = Workflow::with_definition(&definition, dir.path(), InMemoryStore::new())
        .await
        .unwrap();

    let err = workflow.resume().await.unwrap_err();
    assert!(matches!(err, WorkflowError::NothingToResume));
    assert!(!dir.path().join("log.txt").exists());
}

/// Test: a status file left by an exited run is readable on its own.
#[tokio::test]
async fn test_status_file_round_trip() {
    let fixture = WorkflowFixture::new(PIPELINE);
    let written = interrupted_status(&fixture, "setup", "b").await;

    let loaded = FileStore::new(fixture.status_path())
        .load()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(loaded.current_task, written.current_task);
    assert_eq!(loaded.groups.len(), 2);
    assert_eq!(loaded.groups[0].tasks[1].percent, 0.3);
    assert!(loaded.is_resumable());
}
