//! Shell task execution.
//!
//! [`TaskExecutor`] owns one subprocess for the duration of a task. It runs
//! the task script through `bash` in its own process group and collects the
//! structured [`Message`]s the script writes to a private named pipe.
//!
//! # Message channel
//!
//! Before the subprocess is spawned, a reader task opens the pipe for both
//! reading and writing, so the stream never sees end-of-file while the
//! script opens and closes it for every line. Once the subprocess has exited,
//! the executor writes [`END_LINE`] into the pipe and waits until the reader
//! has consumed it. Every line the script wrote is therefore delivered
//! before [`TaskExecutor::run`] returns.
//!
//! ```ignore
//! let mut executor = TaskExecutor::new("progress 0.5; output halfway")
//!     .environment(vars);
//! let mut messages = executor.messages()?;
//! let abort = executor.abort_handle();
//!
//! executor.run(&cancel, base_dir).await?;
//! while let Some(message) = messages.recv().await {
//!     println!("{:?}", message);
//! }
//! ```
//!
//! # Aborting
//!
//! [`AbortHandle::abort`] sends `SIGTERM` to the whole process group, which
//! also reaches anything the script started. Cancelling the token passed to
//! `run` does the same. In both cases `run` keeps waiting for the subprocess
//! to exit so the pipe is drained as usual.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{END_LINE, Message, PRELUDE, ProtocolError, WFOUT_VAR};
use crate::core::environment::Environment;
use crate::core::task::TaskError;

const PIPE_BUFFER: usize = 64 * 1024;
const FIFO_NAME: &str = ".task";
const TEMP_PREFIX: &str = "workflow.";

/// Sends `SIGTERM` to the process group of a running task.
///
/// Cloneable and usable from any task while [`TaskExecutor::run`] is in
/// flight. Aborting when no subprocess is running does nothing.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    pid: Arc<Mutex<Option<libc::pid_t>>>,
}

impl AbortHandle {
    /// Signal the running subprocess, if any.
    pub fn abort(&self) -> io::Result<()> {
        let Some(pid) = self.current() else {
            return Ok(());
        };

        tracing::warn!(pid, "aborting task");
        // A negative pid addresses the whole process group.
        let ret = unsafe { libc::kill(-pid, libc::SIGTERM) };
        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Whether a subprocess is currently registered.
    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<libc::pid_t> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, pid: Option<libc::pid_t>) {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }
}

/// Runs a single task script.
pub struct TaskExecutor {
    script: String,
    environment: Environment,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    messages: Option<mpsc::UnboundedSender<Message>>,
    messages_taken: bool,
    abort: AbortHandle,
}

impl TaskExecutor {
    /// Create an executor for a shell script body.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            environment: Environment::new(),
            stdout: None,
            stderr: None,
            messages: None,
            messages_taken: false,
            abort: AbortHandle::default(),
        }
    }

    /// Variables added to the subprocess environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Capture the subprocess standard output instead of inheriting it.
    ///
    /// The returned stream must be read, or the subprocess blocks once the
    /// buffer is full.
    pub fn stdout_pipe(&mut self) -> Result<DuplexStream, TaskError> {
        if self.stdout.is_some() {
            return Err(TaskError::PipeAlreadyTaken("stdout"));
        }
        let (reader, writer) = tokio::io::duplex(PIPE_BUFFER);
        self.stdout = Some(writer);
        Ok(reader)
    }

    /// Capture the subprocess standard error instead of inheriting it.
    pub fn stderr_pipe(&mut self) -> Result<DuplexStream, TaskError> {
        if self.stderr.is_some() {
            return Err(TaskError::PipeAlreadyTaken("stderr"));
        }
        let (reader, writer) = tokio::io::duplex(PIPE_BUFFER);
        self.stderr = Some(writer);
        Ok(reader)
    }

    /// Receive the structured messages written by the script.
    ///
    /// The channel closes once the end of stream has been read.
    pub fn messages(&mut self) -> Result<mpsc::UnboundedReceiver<Message>, TaskError> {
        if self.messages_taken {
            return Err(TaskError::PipeAlreadyTaken("messages"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.messages = Some(tx);
        self.messages_taken = true;
        Ok(rx)
    }

    /// A handle to abort the subprocess from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run the script to completion in `working_dir`.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        working_dir: &Path,
    ) -> Result<(), TaskError> {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        let scratch = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .map_err(TaskError::Ipc)?;
        let fifo = scratch.path().join(FIFO_NAME);
        make_fifo(&fifo).map_err(TaskError::Ipc)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_messages(
            fifo.clone(),
            ready_tx,
            self.messages.take(),
            Arc::clone(&closing),
        ));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TaskError::Ipc(e)),
            Err(_) => {
                return Err(TaskError::Ipc(io::Error::other(
                    "message reader stopped before opening the pipe",
                )));
            }
        }

        let outcome = self.run_process(cancel, working_dir, &fifo).await;

        // Runs even when spawning failed: the reader stops only at the
        // terminator.
        let drained = finish_stream(&fifo, reader, &closing).await;

        let status = outcome?;
        drained?;
        exit_result(status)
    }

    async fn run_process(
        &mut self,
        cancel: &CancellationToken,
        working_dir: &Path,
        fifo: &Path,
    ) -> Result<ExitStatus, TaskError> {
        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(format!("{}{}", PRELUDE, self.script))
            .current_dir(working_dir)
            .envs(self.environment.iter())
            .env(WFOUT_VAR, fifo)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(stdio_for(&self.stdout))
            .stderr(stdio_for(&self.stderr));

        let mut child = command.spawn().map_err(|e| {
            tracing::error!(error = %e, "error while starting command");
            TaskError::Spawn(e)
        })?;

        self.abort
            .set(child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()));

        let mut copies: Vec<JoinHandle<()>> = Vec::new();
        if let (Some(mut from), Some(mut to)) = (child.stdout.take(), self.stdout.take()) {
            copies.push(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
                    tracing::debug!(error = %e, "stdout copy stopped");
                }
                if let Err(e) = to.shutdown().await {
                    tracing::debug!(error = %e, "unable to close stdout pipe");
                }
            }));
        }
        if let (Some(mut from), Some(mut to)) = (child.stderr.take(), self.stderr.take()) {
            copies.push(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut from, &mut to).await {
                    tracing::debug!(error = %e, "stderr copy stopped");
                }
                if let Err(e) = to.shutdown().await {
                    tracing::debug!(error = %e, "unable to close stderr pipe");
                }
            }));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancel.cancelled() => {
                if let Err(e) = self.abort.abort() {
                    tracing::error!(error = %e, "unable to abort task");
                }
                child.wait().await
            }
        };
        self.abort.set(None);

        for copy in copies {
            if let Err(e) = copy.await {
                tracing::debug!(error = %e, "output copy task failed");
            }
        }

        status.map_err(TaskError::Wait)
    }
}

fn stdio_for(pipe: &Option<DuplexStream>) -> Stdio {
    if pipe.is_some() {
        Stdio::piped()
    } else {
        Stdio::inherit()
    }
}

fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let ret = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Read protocol lines until the terminator.
///
/// The pipe is opened for reading and writing so that it stays open while
/// the script opens and closes its end for each line.
async fn read_messages(
    path: PathBuf,
    ready: oneshot::Sender<io::Result<()>>,
    messages: Option<mpsc::UnboundedSender<Message>>,
    closing: Arc<AtomicBool>,
) {
    let opened = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .and_then(pipe::Receiver::from_file);

    let receiver = match opened {
        Ok(receiver) => {
            let _ = ready.send(Ok(()));
            receiver
        }
        Err(e) => {
            tracing::error!(error = %e, "unable to open fifo");
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut reader = BufReader::new(receiver);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "error while reading fifo");
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        match Message::parse(&line) {
            // Only the terminator written after the script exited ends the
            // stream. A script printing `end::` itself is ignored.
            Ok(Message::End) if closing.load(Ordering::Acquire) => break,
            Ok(Message::End) => {
                tracing::warn!("ignoring reserved end line written by task");
            }
            Ok(message) => {
                tracing::debug!(line = %line.trim_end(), "task message");
                if let Some(tx) = &messages {
                    let _ = tx.send(message);
                }
            }
            Err(ProtocolError::InvalidProgress(payload)) => {
                tracing::warn!(payload = %payload, "unable to parse progress");
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring line");
            }
        }
    }
}

/// Write the terminator and wait for the reader to consume it.
///
/// The terminator is preceded by a newline so that a last line the script
/// left unterminated cannot swallow it.
async fn finish_stream(
    fifo: &Path,
    reader: JoinHandle<()>,
    closing: &AtomicBool,
) -> Result<(), TaskError> {
    closing.store(true, Ordering::Release);

    if let Err(e) = write_terminator(fifo).await {
        // No reader left: it stopped at an `end::` line the script wrote
        // just before exiting.
        let reader_gone =
            e.kind() == io::ErrorKind::BrokenPipe || e.raw_os_error() == Some(libc::ENXIO);
        if !reader_gone {
            return Err(TaskError::Ipc(e));
        }
        tracing::debug!(error = %e, "message reader stopped before the terminator");
    }

    reader
        .await
        .map_err(|e| TaskError::Ipc(io::Error::other(e)))
}

async fn write_terminator(fifo: &Path) -> io::Result<()> {
    let mut sender = pipe::OpenOptions::new().open_sender(fifo)?;
    sender
        .write_all(format!("\n{END_LINE}").as_bytes())
        .await
}

fn exit_result(status: ExitStatus) -> Result<(), TaskError> {
    if status.success() {
        return Ok(());
    }
    match (status.code(), status.signal()) {
        (Some(code), _) => Err(TaskError::CommandFailed { code }),
        (None, Some(signal)) => Err(TaskError::Signaled { signal }),
        (None, None) => Err(TaskError::CommandFailed { code: -1 }),
    }
}
