//! Fakes for the external collaborators.
//!
//! This module is available for local unit tests and for the integration
//! tests when the `test-utils` feature is enabled.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::credentials::{AccessToken, TokenProvider};
use crate::downloader::{CommandSpec, ProcessExit, ProcessLauncher, RunningProcess};
use crate::monitor::{StatusClient, StreamStatus};
use crate::{Error, Result};

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Valid configuration with dummy credentials.
pub fn test_config() -> AppConfig {
    AppConfig {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        ..AppConfig::default()
    }
}

/// Token provider handing out `token-1`, `token-2`, ...
#[derive(Debug, Default)]
pub struct CountingTokenProvider {
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl CountingTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent fetches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fetch attempts so far, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokenProvider {
    async fn fetch_token(&self) -> Result<AccessToken> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::auth("token endpoint unavailable"));
        }
        Ok(AccessToken::new(format!("token-{n}")))
    }
}

/// One recorded status query.
#[derive(Debug, Clone)]
pub struct StatusCall {
    pub channel: String,
    pub token: String,
    pub at: Instant,
}

/// Status client answering from per-channel queues, then a default.
#[derive(Debug)]
pub struct ScriptedStatusClient {
    scripts: Mutex<HashMap<String, VecDeque<StreamStatus>>>,
    default: Mutex<StreamStatus>,
    calls: Mutex<Vec<StatusCall>>,
}

impl Default for ScriptedStatusClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStatusClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Mutex::new(StreamStatus::Offline),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue `status` as the next answer for `channel`.
    pub fn push(&self, channel: &str, status: StreamStatus) {
        self.scripts
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push_back(status);
    }

    /// Answer used once a channel's queue is empty.
    pub fn set_default(&self, status: StreamStatus) {
        *self.default.lock() = status;
    }

    pub fn calls(&self) -> Vec<StatusCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, channel: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.channel == channel).count()
    }
}

#[async_trait]
impl StatusClient for ScriptedStatusClient {
    async fn query_status(&self, channel: &str, token: &AccessToken) -> StreamStatus {
        self.calls.lock().push(StatusCall {
            channel: channel.to_string(),
            token: token.as_str().to_string(),
            at: Instant::now(),
        });
        let scripted = self
            .scripts
            .lock()
            .get_mut(channel)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }
}

#[derive(Debug)]
struct FakeState {
    started: Mutex<Vec<CommandSpec>>,
    failing: Vec<String>,
    capture_exit: i32,
    capture_output: bool,
    repair_output: bool,
    blocking: bool,
    release: CancellationToken,
    capture_started: Notify,
    active_captures: AtomicUsize,
    max_captures: AtomicUsize,
}

/// Process launcher that never spawns anything.
///
/// Commands with `-o <path>` act as captures and write a few bytes there.
/// Commands with `-i <in> ... <out>` act as repairs and copy `<in>` to `<out>`.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    state: Arc<FakeState>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FakeState {
                started: Mutex::new(Vec::new()),
                failing: Vec::new(),
                capture_exit: 0,
                capture_output: true,
                repair_output: true,
                blocking: false,
                release: CancellationToken::new(),
                capture_started: Notify::new(),
                active_captures: AtomicUsize::new(0),
                max_captures: AtomicUsize::new(0),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut FakeState)) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            f(state);
        }
        self
    }

    /// `start` fails for `program`, as if it were not installed.
    pub fn failing_program(self, program: &str) -> Self {
        let program = program.to_string();
        self.configure(|s| s.failing.push(program))
    }

    pub fn with_capture_exit(self, code: i32) -> Self {
        self.configure(|s| s.capture_exit = code)
    }

    /// Whether captures write their output file.
    pub fn with_capture_output(self, write: bool) -> Self {
        self.configure(|s| s.capture_output = write)
    }

    /// Whether repairs write their output file.
    pub fn with_repair_output(self, write: bool) -> Self {
        self.configure(|s| s.repair_output = write)
    }

    /// Captures run until [`release`](Self::release) or cancellation.
    pub fn blocking_capture(self) -> Self {
        self.configure(|s| s.blocking = true)
    }

    pub fn release(&self) {
        self.state.release.cancel();
    }

    /// Resolves once a capture has started (immediately if one already did).
    pub async fn wait_capture_started(&self) {
        self.state.capture_started.notified().await;
    }

    pub fn started(&self) -> Vec<CommandSpec> {
        self.state.started.lock().clone()
    }

    pub fn started_programs(&self) -> Vec<String> {
        self.started().into_iter().map(|s| s.program).collect()
    }

    pub fn active_captures(&self) -> usize {
        self.state.active_captures.load(Ordering::SeqCst)
    }

    /// Highest number of captures that ran at the same time.
    pub fn max_concurrent_captures(&self) -> usize {
        self.state.max_captures.load(Ordering::SeqCst)
    }
}

impl ProcessLauncher for FakeLauncher {
    fn start(&self, spec: &CommandSpec) -> Result<Box<dyn RunningProcess>> {
        if self.state.failing.contains(&spec.program) {
            return Err(Error::process(format!(
                "failed to launch {}: not found",
                spec.program
            )));
        }
        self.state.started.lock().push(spec.clone());
        Ok(Box::new(FakeProcess {
            spec: spec.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeProcess {
    spec: CommandSpec,
    state: Arc<FakeState>,
}

impl FakeProcess {
    async fn run_capture(&self, output: &str, cancel: &CancellationToken) -> Result<ProcessExit> {
        let state = &self.state;
        if state.capture_output {
            tokio::fs::write(output, b"fake stream data").await?;
        }

        let active = state.active_captures.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_captures.fetch_max(active, Ordering::SeqCst);
        state.capture_started.notify_one();

        let mut cancelled = false;
        if state.blocking {
            tokio::select! {
                _ = state.release.cancelled() => {}
                _ = cancel.cancelled() => cancelled = true,
            }
        }
        state.active_captures.fetch_sub(1, Ordering::SeqCst);

        Ok(ProcessExit {
            code: if cancelled { None } else { Some(state.capture_exit) },
            cancelled,
            stderr_tail: vec!["[cli][info] Stream ended".to_string()],
        })
    }

    async fn run_repair(&self, input: &str) -> Result<ProcessExit> {
        let output = self.spec.args.last().map(String::as_str).unwrap_or_default();
        if self.state.repair_output && !output.is_empty() {
            tokio::fs::copy(input, Path::new(output)).await?;
            return Ok(ProcessExit {
                code: Some(0),
                ..ProcessExit::default()
            });
        }
        Ok(ProcessExit {
            code: Some(1),
            cancelled: false,
            stderr_tail: vec!["Invalid data found when processing input".to_string()],
        })
    }
}

#[async_trait]
impl RunningProcess for FakeProcess {
    async fn wait(&mut self, cancel: &CancellationToken) -> Result<ProcessExit> {
        if let Some(output) = self.spec.arg_after("-o") {
            let output = output.to_string();
            return self.run_capture(&output, cancel).await;
        }
        if let Some(input) = self.spec.arg_after("-i") {
            let input = input.to_string();
            return self.run_repair(&input).await;
        }
        Ok(ProcessExit {
            code: Some(0),
            ..ProcessExit::default()
        })
    }
}
