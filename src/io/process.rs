//! Child process supervision
//!
//! Spawns the language analysis daemon, keeps its stderr drained into the
//! log and tracks its exit. Requests travel over a [`StreamTransport`] wired
//! to the child's stdin and stdout.

use crate::io::transport::{StreamTransport, Transport};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Grace period a SIGTERM'd child gets before `stop` returns anyway
const GRACEFUL_EXIT_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM, then wait briefly for the exit
    Graceful,
    /// SIGKILL
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running { pid: u32 },
    Stopped,
}

impl ProcessState {
    pub fn pid(&self) -> Option<u32> {
        if let ProcessState::Running { pid } = self {
            Some(*pid)
        } else {
            None
        }
    }

    pub fn is_running(&self) -> bool {
        self.pid().is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Child {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("Spawned process reported no PID")]
    NoPid,
}

/// Lifecycle of a supervised external process
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(), Self::Error>;

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;

    /// The transport over stdin/stdout. Can be taken once per start.
    fn take_transport(&mut self) -> Result<StreamTransport, Self::Error>;
}

struct ChildPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl ChildPipes {
    fn take(child: &mut Child) -> Result<Self, ProcessError> {
        Ok(Self {
            stdin: child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?,
            stdout: child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?,
            stderr: child.stderr.take().ok_or(ProcessError::MissingPipe("stderr"))?,
        })
    }
}

/// Supervises one child spawned through [`Command`]
pub struct ChildProcessManager {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    state: Arc<Mutex<ProcessState>>,
    /// true once the child has exited
    exited: watch::Sender<bool>,
    transport: Option<StreamTransport>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChildProcessManager {
    pub fn new(program: String, args: Vec<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            program,
            args,
            cwd,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            exited: watch::channel(false).0,
            transport: None,
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> ProcessState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(_) => ProcessState::Stopped,
        }
    }

    pub fn exit_watcher(&self) -> watch::Receiver<bool> {
        self.exited.subscribe()
    }

    fn set_state(&self, next: ProcessState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }

    /// The child blocks once its stderr pipe fills, so it is always drained
    fn drain_stderr(program: String, stderr: ChildStderr) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        debug!(target: "ext_host::daemon", process = %program, "{}", line.trim())
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(process = %program, "stderr read failed: {}", e);
                        break;
                    }
                }
            }
            trace!(process = %program, "stderr closed");
        })
    }

    /// Owns the child from here on; aborting the task kills it
    fn watch_exit(&self, mut child: Child, pid: u32) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let exited = self.exited.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => info!(pid, %status, "Child process exited"),
                Err(e) => warn!(pid, "Waiting on child failed: {}", e),
            }
            if let Ok(mut state) = state.lock() {
                *state = ProcessState::Stopped;
            }
            exited.send_replace(true);
        })
    }

    #[cfg(unix)]
    fn signal(pid: u32, mode: StopMode) {
        let signal = if mode == StopMode::Force {
            libc::SIGKILL
        } else {
            libc::SIGTERM
        };
        let Ok(raw) = libc::pid_t::try_from(pid) else {
            warn!(pid, "PID out of range for pid_t");
            return;
        };
        // SAFETY: kill(2) on a pid this manager spawned, with a valid signal.
        if unsafe { libc::kill(raw, signal) } == 0 {
            debug!(pid, signal, "Signalled child process");
        }
    }

    #[cfg(not(unix))]
    fn signal(pid: u32, _mode: StopMode) {
        warn!(pid, "Signalling processes is unsupported on this platform");
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }
        info!(program = %self.program, args = ?self.args, "Spawning child process");

        let mut child = self.command().spawn()?;
        let pid = child.id().ok_or(ProcessError::NoPid)?;
        let pipes = ChildPipes::take(&mut child)?;

        self.abort_tasks();
        self.set_state(ProcessState::Running { pid });
        self.exited.send_replace(false);
        self.transport = Some(StreamTransport::new(pipes.stdout, pipes.stdin));
        self.tasks
            .push(Self::drain_stderr(self.program.clone(), pipes.stderr));
        let waiter = self.watch_exit(child, pid);
        self.tasks.push(waiter);

        info!(pid, "Child process running");
        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.state().pid().ok_or(ProcessError::NotStarted)?;

        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            debug!(pid, "Closing child stdin failed: {}", e);
        }

        Self::signal(pid, mode);

        if mode == StopMode::Graceful {
            let mut exited = self.exit_watcher();
            if tokio::time::timeout(GRACEFUL_EXIT_WAIT, exited.wait_for(|done| *done))
                .await
                .is_err()
            {
                warn!(pid, "Child ignored SIGTERM, killing");
                Self::signal(pid, StopMode::Force);
            }
        }

        self.abort_tasks();
        self.set_state(ProcessState::Stopped);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state().is_running()
    }

    fn take_transport(&mut self) -> Result<StreamTransport, Self::Error> {
        self.transport.take().ok_or(ProcessError::NotStarted)
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}
