//! External process capability.
//!
//! The recorder only needs "start a command" and "wait for it, or stop it".
//! [`TokioProcessLauncher`] does that with real child processes; tests inject
//! their own [`ProcessLauncher`].

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use process_utils::{WaitOutcome, tokio_command, wait_or_stop};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Number of stderr lines kept for diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// Time a stopped child gets to exit on its own before it is killed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Grace period for a killed child to be reaped.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Value following `flag` in the argument list.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` if killed by a signal or not reaped.
    pub code: Option<i32>,
    /// The wait was interrupted by cancellation and the process was stopped.
    pub cancelled: bool,
    /// Last stderr lines, oldest first.
    pub stderr_tail: Vec<String>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        !self.cancelled && self.code == Some(0)
    }
}

/// A started process.
#[async_trait]
pub trait RunningProcess: Send {
    /// Wait for exit. If `cancel` fires first the process is asked to
    /// terminate, killed if it does not, and the returned exit has
    /// `cancelled` set.
    async fn wait(&mut self, cancel: &CancellationToken) -> Result<ProcessExit>;
}

/// Starts processes. `start` failing means the program could not be launched.
pub trait ProcessLauncher: Send + Sync {
    fn start(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>>;
}

/// [`ProcessLauncher`] spawning real child processes with tokio.
///
/// stdout is discarded, stderr is read line by line into a bounded tail.
#[derive(Debug, Clone)]
pub struct TokioProcessLauncher {
    stop_grace: Duration,
    kill_timeout: Duration,
}

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self {
            stop_grace: DEFAULT_STOP_GRACE,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }

    /// How long a cancelled child may take to exit after SIGTERM.
    pub fn with_stop_grace(mut self, stop_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self
    }

    pub fn with_kill_timeout(mut self, kill_timeout: Duration) -> Self {
        self.kill_timeout = kill_timeout;
        self
    }
}

impl Default for TokioProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for TokioProcessLauncher {
    fn start(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        let mut child = tokio_command(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::process(format!("failed to launch {}: {e}", spec.program)))?;

        debug!(program = %spec.program, pid = ?child.id(), "Process started");

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = tail.clone();
            let program = spec.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            trace!(program = %program, "{line}");
                            let mut tail = tail.lock();
                            if tail.len() == STDERR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(program = %program, "Error reading stderr: {e}");
                            break;
                        }
                    }
                }
            })
        });

        Ok(Box::new(TokioRunningProcess {
            child,
            stderr_task,
            tail,
            stop_grace: self.stop_grace,
            kill_timeout: self.kill_timeout,
        }))
    }
}

struct TokioRunningProcess {
    child: tokio::process::Child,
    stderr_task: Option<JoinHandle<()>>,
    tail: Arc<Mutex<VecDeque<String>>>,
    stop_grace: Duration,
    kill_timeout: Duration,
}

#[async_trait]
impl RunningProcess for TokioRunningProcess {
    async fn wait(&mut self, cancel: &CancellationToken) -> Result<ProcessExit> {
        let outcome = wait_or_stop(
            &mut self.child,
            cancel.cancelled(),
            self.stop_grace,
            self.kill_timeout,
        )
        .await?;

        if let Some(task) = self.stderr_task.take() {
            // The pipe closes with the process; a grandchild holding it must not block us.
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                debug!("stderr reader still running after exit");
            }
        }

        let stderr_tail = self.tail.lock().iter().cloned().collect();
        Ok(ProcessExit {
            code: outcome.code(),
            cancelled: matches!(outcome, WaitOutcome::Stopped(_)),
            stderr_tail,
        })
    }
}
