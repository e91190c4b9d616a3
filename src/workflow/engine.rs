//! Workflow orchestrator.
//!
//! The [`Workflow`] runs groups and tasks strictly in order. Its whole state
//! is one [`Status`] value, persisted after every change, which makes a run
//! resumable after a crash or after a task that ends the process on purpose.
//!
//! # Resuming
//!
//! A stored status that names a current task is resumed by *seeking*: groups
//! before the current group and tasks before the current task are marked
//! finished without running them. The current task itself runs again, unless
//! it is flagged `exits`, in which case it is assumed to have done its job
//! (a reboot, for example) and is marked finished as well.
//!
//! # Concurrency
//!
//! The status and the [`Broadcaster`] share one async mutex. The lock is
//! released while a task runs; the task's messages are applied by a separate
//! task that takes the lock for each line. The run loop waits for that task
//! before recording the outcome, so no message is applied after the task is
//! marked finished.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::types::{ABORTED_MESSAGE, Outcome, WorkflowError, WorkflowState};
use crate::config::{Definition, vars};
use crate::core::status::Status;
use crate::core::types::{GroupId, SubscriberId, TaskId};
use crate::events::{Broadcaster, StatusSink};
use crate::execution::{AbortHandle, Message, TaskExecutor};
use crate::storage::StatusStore;

/// Status and broadcaster, always locked together.
struct Inner<S> {
    status: Status,
    broadcaster: Broadcaster<S>,
}

impl<S: StatusStore> Inner<S> {
    async fn publish(&mut self) -> Result<(), WorkflowError> {
        self.broadcaster.publish(&mut self.status).await?;
        Ok(())
    }
}

/// Run bookkeeping that must be reachable without waiting for the status
/// lock.
struct Control {
    state: WorkflowState,
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
}

struct Shared<S> {
    base_dir: PathBuf,
    inner: Mutex<Inner<S>>,
    control: StdMutex<Control>,
}

impl<S> Shared<S> {
    fn control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the workflow as running for as long as it lives.
///
/// Dropping it without [`RunGuard::complete`] restores the previous state,
/// which covers startup errors and dropped futures.
struct RunGuard<S> {
    shared: Arc<Shared<S>>,
    previous: WorkflowState,
    completed: bool,
}

impl<S> RunGuard<S> {
    fn acquire(shared: &Arc<Shared<S>>) -> Result<(Self, CancellationToken), WorkflowError> {
        let mut control = shared.control();
        if control.state == WorkflowState::Running {
            return Err(WorkflowError::AlreadyRunning);
        }
        let previous = control.state;
        control.state = WorkflowState::Running;
        control.cancel = CancellationToken::new();
        let cancel = control.cancel.clone();
        drop(control);

        let guard = Self {
            shared: Arc::clone(shared),
            previous,
            completed: false,
        };
        Ok((guard, cancel))
    }

    fn complete(mut self, state: WorkflowState) {
        self.shared.control().state = state;
        self.completed = true;
    }
}

impl<S> Drop for RunGuard<S> {
    fn drop(&mut self) {
        if !self.completed {
            let mut control = self.shared.control();
            control.state = self.previous;
            control.abort = None;
        }
    }
}

/// What happened to a single task.
enum TaskOutcome {
    Done,
    Aborted,
    Exited { group: GroupId, task: TaskId },
}

/// A sequential, resumable workflow.
///
/// Cheap to clone; clones share the same run.
pub struct Workflow<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for Workflow<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: StatusStore + 'static> Workflow<S> {
    /// Open the workflow defined at `definition_path`.
    ///
    /// If the store holds a status from a previous run, it is used as is and
    /// the definition file is not read. Otherwise a fresh status is built
    /// from the file. Commands run in the directory of the definition file.
    pub async fn load(definition_path: impl AsRef<Path>, store: S) -> Result<Self, WorkflowError> {
        let path = definition_path.as_ref();
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let status = match store.load().await? {
            Some(status) => {
                tracing::info!(path = %path.display(), "resuming from stored status");
                status
            }
            None => Definition::from_file(path)?.to_status(),
        };

        Ok(Self::from_status(status, base_dir, store))
    }

    /// Open a workflow from an already loaded definition.
    ///
    /// A status in the store still takes precedence over the definition.
    pub async fn with_definition(
        definition: &Definition,
        base_dir: impl Into<PathBuf>,
        store: S,
    ) -> Result<Self, WorkflowError> {
        let status = match store.load().await? {
            Some(status) => status,
            None => definition.to_status(),
        };
        Ok(Self::from_status(status, base_dir.into(), store))
    }

    fn from_status(status: Status, base_dir: PathBuf, store: S) -> Self {
        let state = if status.finished {
            WorkflowState::Finished
        } else {
            WorkflowState::Fresh
        };

        Self {
            shared: Arc::new(Shared {
                base_dir,
                inner: Mutex::new(Inner {
                    status,
                    broadcaster: Broadcaster::new(store),
                }),
                control: StdMutex::new(Control {
                    state,
                    cancel: CancellationToken::new(),
                    abort: None,
                }),
            }),
        }
    }

    /// Directory commands run in.
    pub fn base_dir(&self) -> &Path {
        &self.shared.base_dir
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkflowState {
        self.shared.control().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkflowState::Running
    }

    /// A copy of the current status.
    pub async fn snapshot(&self) -> Status {
        self.shared.inner.lock().await.status.clone()
    }

    /// Attach an observer. It immediately receives the current status.
    pub async fn subscribe(&self, sink: Arc<dyn StatusSink>) -> SubscriberId {
        let mut inner = self.shared.inner.lock().await;
        let Inner {
            status,
            broadcaster,
        } = &mut *inner;
        broadcaster.subscribe(sink, status).await
    }

    /// Detach an observer. Returns whether it was attached.
    pub async fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.shared.inner.lock().await.broadcaster.unsubscribe(id)
    }

    /// Stop the current run.
    ///
    /// No further task is started, and the running task's process group
    /// receives `SIGTERM`. Does nothing when no run is in progress.
    pub fn abort(&self) {
        let control = self.shared.control();
        if control.state != WorkflowState::Running {
            tracing::debug!("abort requested while not running");
            return;
        }

        tracing::warn!("aborting workflow");
        control.cancel.cancel();
        if let Some(handle) = &control.abort {
            if let Err(e) = handle.abort() {
                tracing::error!(error = %e, "unable to abort task");
            }
        }
    }

    /// Rebuild a fresh status from the stored definition snapshot.
    ///
    /// Only allowed once the workflow has finished.
    pub async fn reset(&self) -> Result<(), WorkflowError> {
        if self.is_running() {
            return Err(WorkflowError::AlreadyRunning);
        }

        let mut inner = self.shared.inner.lock().await;
        if !inner.status.finished {
            return Err(WorkflowError::NotFinished);
        }

        let definition = Definition::from_value(Value::Object(inner.status.definition.clone()))?;
        inner.status = definition.to_status();
        drop(inner);

        self.shared.control().state = WorkflowState::Fresh;
        tracing::info!("workflow reset");
        Ok(())
    }

    /// Continue a previous run. Fails when nothing is stored.
    pub async fn resume(&self) -> Result<Outcome, WorkflowError> {
        let exists = self
            .shared
            .inner
            .lock()
            .await
            .broadcaster
            .store()
            .exists()
            .await?;
        if !exists {
            return Err(WorkflowError::NothingToResume);
        }
        self.start().await
    }

    /// Run the workflow until every group is processed, a task fails, the
    /// run is aborted, or a task flagged `exits` completes.
    pub async fn start(&self) -> Result<Outcome, WorkflowError> {
        let (guard, cancel) = RunGuard::acquire(&self.shared)?;

        let commands = {
            let inner = self.shared.inner.lock().await;
            if inner.status.finished {
                return Err(WorkflowError::AlreadyFinished);
            }
            let commands = match inner.status.vars {
                Some(_) => None,
                None => Some(
                    Definition::from_value(Value::Object(inner.status.definition.clone()))?
                        .vars()
                        .clone(),
                ),
            };
            commands
        };

        if let Some(commands) = commands {
            let env = vars::resolve(&commands, &self.shared.base_dir).await?;
            self.shared.inner.lock().await.status.vars = Some(env);
        }

        self.evaluate_skips().await;

        {
            let mut inner = self.shared.inner.lock().await;
            inner.status.started = true;
            inner.publish().await?;
        }
        tracing::info!("workflow started");

        let result = self.run_groups(&cancel).await;

        match &result {
            Ok(Outcome::Exited { group, task }) => {
                tracing::info!(group = %group, task = %task, "task requested exit, run will continue on next start");
                self.shared.inner.lock().await.broadcaster.close_all();
            }
            Ok(outcome) => {
                tracing::info!(outcome = ?outcome, "workflow ended");
                self.finalize().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "workflow failed");
                self.finalize().await;
            }
        }

        self.shared.control().abort = None;
        guard.complete(match &result {
            Ok(outcome) => outcome.state(),
            Err(_) => WorkflowState::Finished,
        });
        result
    }

    /// Check the skip predicates of groups that have not started yet.
    ///
    /// Runs on every start, resumes included, so a predicate that became
    /// true while the orchestrator was down still takes effect. Decisions
    /// only ever go from run to skip, and the group being resumed is left
    /// alone.
    async fn evaluate_skips(&self) {
        let (candidates, env) = {
            let inner = self.shared.inner.lock().await;
            let status = &inner.status;
            let candidates: Vec<_> = status
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| {
                    !g.skip && !g.started && Some(&g.id) != status.current_group.as_ref()
                })
                .map(|(index, g)| (index, g.clone()))
                .collect();
            (candidates, status.vars.clone().unwrap_or_default())
        };

        let mut skipped = Vec::new();
        for (index, group) in candidates {
            if group.should_skip(&env, &self.shared.base_dir).await {
                tracing::info!(group = %group.id, "skipping group");
                skipped.push(index);
            }
        }

        let mut inner = self.shared.inner.lock().await;
        for index in skipped {
            if let Some(group) = inner.status.groups.get_mut(index) {
                group.skip = true;
                group.mark_finished();
            }
        }
    }

    async fn run_groups(&self, cancel: &CancellationToken) -> Result<Outcome, WorkflowError> {
        let (target_group, target_task, group_count) = {
            let inner = self.shared.inner.lock().await;
            (
                inner.status.current_group.clone(),
                inner.status.current_task.clone(),
                inner.status.groups.len(),
            )
        };
        let mut seeking = target_task.is_some();
        if seeking {
            tracing::debug!(group = ?target_group, task = ?target_task, "seeking resume point");
        }

        for gi in 0..group_count {
            let task_count = {
                let mut inner = self.shared.inner.lock().await;
                let status = &mut inner.status;
                let group = &mut status.groups[gi];

                if group.skip {
                    tracing::debug!(group = %group.id, "skipped group");
                    continue;
                }

                if seeking && Some(&group.id) != target_group.as_ref() {
                    tracing::debug!(group = %group.id, "skipping group (not current group)");
                    group.mark_finished();
                    continue;
                }

                group.started = true;
                let count = group.tasks.len();
                status.current_group = Some(status.groups[gi].id.clone());
                count
            };

            for ti in 0..task_count {
                if cancel.is_cancelled() {
                    let mut inner = self.shared.inner.lock().await;
                    inner.status.record_error(gi, ti, ABORTED_MESSAGE);
                    tracing::warn!("workflow aborted");
                    return Ok(Outcome::Aborted);
                }

                if seeking {
                    let mut inner = self.shared.inner.lock().await;
                    let task = &mut inner.status.groups[gi].tasks[ti];
                    if Some(&task.id) != target_task.as_ref() {
                        tracing::debug!(task = %task.id, "skipping task (not current task)");
                        task.mark_finished();
                        continue;
                    }

                    seeking = false;
                    if task.exits {
                        tracing::info!(task = %task.id, "task exited previous run, marking finished");
                        task.mark_finished();
                        continue;
                    }
                }

                match self.run_task(gi, ti, cancel).await? {
                    TaskOutcome::Done => {}
                    TaskOutcome::Aborted => return Ok(Outcome::Aborted),
                    TaskOutcome::Exited { group, task } => {
                        return Ok(Outcome::Exited { group, task });
                    }
                }
            }

            let mut inner = self.shared.inner.lock().await;
            inner.status.groups[gi].finished = true;
            tracing::debug!(group = %inner.status.groups[gi].id, "group ended");
            inner.publish().await?;
        }

        Ok(Outcome::Finished)
    }

    async fn run_task(
        &self,
        gi: usize,
        ti: usize,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, WorkflowError> {
        let (group_id, task, env) = {
            let mut inner = self.shared.inner.lock().await;
            let status = &mut inner.status;
            let group_id = status.groups[gi].id.clone();
            let task = &mut status.groups[gi].tasks[ti];
            task.started = true;
            let task = task.clone();
            status.current_task = Some(task.id.clone());
            let env = status.vars.clone().unwrap_or_default();
            inner.publish().await?;
            (group_id, task, env)
        };

        let mut executor = TaskExecutor::new(task.cmd.clone()).environment(env);
        let messages = executor.messages().map_err(|source| WorkflowError::Task {
            group: group_id.clone(),
            task: task.id.clone(),
            source,
        })?;
        self.shared.control().abort = Some(executor.abort_handle());

        let applier = tokio::spawn(apply_messages(Arc::clone(&self.shared), gi, ti, messages));

        tracing::info!(group = %group_id, task = %task.id, "running task");
        let result = executor.run(cancel, &self.shared.base_dir).await;
        self.shared.control().abort = None;

        if let Err(e) = applier.await {
            tracing::error!(error = %e, "message applier failed");
        }

        let mut inner = self.shared.inner.lock().await;
        match result {
            Ok(()) if task.exits => {
                // Left unfinished: the next run sees it as current and
                // marks it finished without running it again.
                inner.publish().await?;
                Ok(TaskOutcome::Exited {
                    group: group_id,
                    task: task.id,
                })
            }
            Ok(()) => {
                inner.status.groups[gi].tasks[ti].mark_finished();
                tracing::info!(group = %group_id, task = %task.id, "task ended");
                inner.publish().await?;
                Ok(TaskOutcome::Done)
            }
            Err(e) if cancel.is_cancelled() => {
                tracing::warn!(group = %group_id, task = %task.id, error = %e, "task stopped by abort");
                inner.status.record_error(gi, ti, ABORTED_MESSAGE);
                Ok(TaskOutcome::Aborted)
            }
            Err(e) => {
                tracing::error!(group = %group_id, task = %task.id, error = %e, "task failed");
                inner.status.record_error(gi, ti, &e.to_string());
                Err(WorkflowError::Task {
                    group: group_id,
                    task: task.id,
                    source: e,
                })
            }
        }
    }

    /// Mark the run finished, notify everyone one last time, detach all
    /// observers and delete the stored status.
    async fn finalize(&self) {
        let mut inner = self.shared.inner.lock().await;
        inner.status.finished = true;
        if let Err(e) = inner.publish().await {
            tracing::error!(error = %e, "unable to write final status");
        }
        inner.broadcaster.close_all();
        if let Err(e) = inner.broadcaster.store().remove().await {
            tracing::error!(error = %e, "unable to remove status file");
        }
    }
}

/// Apply the messages of one task until its stream ends.
async fn apply_messages<S: StatusStore>(
    shared: Arc<Shared<S>>,
    gi: usize,
    ti: usize,
    mut messages: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = messages.recv().await {
        let mut inner = shared.inner.lock().await;
        let status = &mut inner.status;
        match message {
            Message::Output(line) => status.record_message(gi, &line),
            Message::Progress(value) => status.groups[gi].tasks[ti].set_progress(value),
            Message::Error(description) => status.record_error(gi, ti, &description),
            Message::End => break,
        }
        if let Err(e) = inner.publish().await {
            tracing::error!(error = %e, "unable to write status");
        }
    }
}
