//! Per-channel polling state machine.
//!
//! One unit of work is: poll the status API, record if the channel is live
//! (holding the channel lock for the whole capture and repair), then wait the
//! duration chosen for the observed status. Every failure resolves to either
//! an immediate re-poll or a bounded wait; nothing here terminates the loop
//! except cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Local;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::lock::{FileLockGuard, LockAttempt};
use crate::config::AppConfig;
use crate::credentials::SharedToken;
use crate::domain::{ChannelTarget, RecordingJob};
use crate::downloader::{CaptureRunner, RepairOutcome};
use crate::monitor::{StatusClient, StreamMetadata, StreamStatus};
use crate::utils::fs::{ensure_dir_all_with_op, file_len};

/// Immediate re-polls allowed after a rejected token, per unit.
pub const MAX_UNAUTHORIZED_RETRIES: u32 = 3;

/// What to do before the next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Regular poll interval.
    Poll(Duration),
    /// Long back-off after a transient failure.
    Cooldown(Duration),
    /// Re-poll without sleeping.
    Immediate,
}

impl Wait {
    pub fn duration(&self) -> Duration {
        match self {
            Self::Poll(d) | Self::Cooldown(d) => *d,
            Self::Immediate => Duration::ZERO,
        }
    }
}

/// Result of one poll (and the recording it may have triggered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Offline,
    NotFound,
    TransientError,
    /// The token was rejected and has been invalidated.
    Unauthorized,
    /// No token could be obtained.
    AuthFailed,
    /// Live, but another worker holds the channel lock.
    Busy,
    /// A capture ran to completion.
    Recorded {
        capture_code: Option<i32>,
        /// `None` when the capture left no file.
        repair: Option<RepairOutcome>,
    },
    /// Live, but the recording could not be set up or launched.
    Failed(String),
    Cancelled,
}

/// Drives one channel.
pub struct RecordingSupervisor {
    channel: RwLock<ChannelTarget>,
    config: Arc<AppConfig>,
    token: SharedToken,
    status_client: Arc<dyn StatusClient>,
    capture: Arc<CaptureRunner>,
    cancel: CancellationToken,
    recovery_done: AtomicBool,
    in_flight: Arc<AtomicBool>,
}

/// Marks a supervisor as having a unit scheduled; released on drop.
#[derive(Debug)]
pub struct UnitClaim {
    in_flight: Arc<AtomicBool>,
}

impl Drop for UnitClaim {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

impl RecordingSupervisor {
    pub fn new(
        channel: ChannelTarget,
        config: Arc<AppConfig>,
        token: SharedToken,
        status_client: Arc<dyn StatusClient>,
        capture: Arc<CaptureRunner>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            channel: RwLock::new(channel),
            config,
            token,
            status_client,
            capture,
            cancel,
            recovery_done: AtomicBool::new(false),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim this supervisor for one scheduled unit.
    ///
    /// Returns `None` while an earlier claim is still held, so a scheduler
    /// never queues a second unit for a channel that is still being worked.
    pub fn try_claim(&self) -> Option<UnitClaim> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| UnitClaim {
                in_flight: self.in_flight.clone(),
            })
    }

    /// Whether a claimed unit is running.
    pub fn is_claimed(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> ChannelTarget {
        self.channel.read().clone()
    }

    /// Apply a reloaded entry (quality may have changed).
    pub fn update_channel(&self, channel: ChannelTarget) {
        let mut current = self.channel.write();
        if *current != channel {
            debug!(channel = %channel, quality = %channel.quality, "Channel entry updated");
            *current = channel;
        }
    }

    /// Wait chosen for a polled status.
    pub fn next_wait(&self, status: &StreamStatus) -> Wait {
        match status {
            StreamStatus::Offline | StreamStatus::NotFound | StreamStatus::Online(_) => {
                Wait::Poll(self.config.poll_interval)
            }
            StreamStatus::TransientError(_) => Wait::Cooldown(self.config.error_cooldown),
            StreamStatus::Unauthorized => Wait::Immediate,
        }
    }

    /// Run until cancelled.
    pub async fn run_forever(&self) {
        info!(channel = %self.channel(), "Watching channel");
        while !self.cancel.is_cancelled() {
            self.run_unit().await;
        }
        debug!(channel = %self.channel(), "Supervisor stopped");
    }

    /// One unit of work: [`run_once`](Self::run_once) followed by its wait.
    pub async fn run_unit(&self) -> CycleOutcome {
        let (outcome, wait) = self.poll_with_retries().await;
        if let Some(wait) = wait {
            self.sleep(wait).await;
        }
        outcome
    }

    /// Poll (re-polling right away after a rejected token) and maybe record.
    pub async fn run_once(&self) -> CycleOutcome {
        self.poll_with_retries().await.0
    }

    async fn poll_with_retries(&self) -> (CycleOutcome, Option<Wait>) {
        let mut retries = 0;
        loop {
            let (outcome, wait) = self.step().await;
            match wait {
                Some(Wait::Immediate) if retries < MAX_UNAUTHORIZED_RETRIES => {
                    retries += 1;
                    debug!(channel = %self.channel(), retries, "Re-polling with a new token");
                }
                Some(Wait::Immediate) => {
                    warn!(
                        channel = %self.channel(),
                        "Token rejected {} times in a row, backing off",
                        retries + 1
                    );
                    return (outcome, Some(Wait::Poll(self.config.poll_interval)));
                }
                wait => return (outcome, wait),
            }
        }
    }

    async fn sleep(&self, wait: Wait) {
        let duration = wait.duration();
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// One POLLING step.
    pub async fn check_once(&self) -> CycleOutcome {
        self.step().await.0
    }

    /// Poll, maybe record, and pick the wait from the polled status.
    /// The wait is `None` once cancelled.
    async fn step(&self) -> (CycleOutcome, Option<Wait>) {
        if self.cancel.is_cancelled() {
            return (CycleOutcome::Cancelled, None);
        }

        if !self.recovery_done.swap(true, Ordering::SeqCst) {
            self.recover_leftovers().await;
        }

        let channel = self.channel();
        let token = match self.token.current().await {
            Ok(token) => token,
            Err(e) => {
                error!(channel = %channel, "Could not obtain access token: {e}");
                return (
                    CycleOutcome::AuthFailed,
                    Some(Wait::Poll(self.config.poll_interval)),
                );
            }
        };

        let status = tokio::select! {
            status = self.status_client.query_status(&channel.name, &token) => status,
            _ = self.cancel.cancelled() => return (CycleOutcome::Cancelled, None),
        };

        let wait = self.next_wait(&status);
        let outcome = match status {
            StreamStatus::Offline => {
                debug!(channel = %channel, "Channel is offline");
                CycleOutcome::Offline
            }
            StreamStatus::NotFound => {
                error!(channel = %channel, "Channel not found, check the channel name");
                CycleOutcome::NotFound
            }
            StreamStatus::TransientError(reason) => {
                warn!(
                    channel = %channel,
                    "Status check failed ({reason}), retrying in {}s",
                    self.config.error_cooldown.as_secs()
                );
                CycleOutcome::TransientError
            }
            StreamStatus::Unauthorized => {
                if let Err(e) = self.token.invalidate(&token).await {
                    error!(channel = %channel, "Token refresh failed: {e}");
                }
                CycleOutcome::Unauthorized
            }
            StreamStatus::Online(metadata) => self.record(&channel, &metadata).await,
        };

        match outcome {
            CycleOutcome::Cancelled => (outcome, None),
            outcome => (outcome, Some(wait)),
        }
    }

    async fn record(&self, channel: &ChannelTarget, metadata: &StreamMetadata) -> CycleOutcome {
        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let _lock = match FileLockGuard::try_acquire(
            &self.config.lock_path(&channel.name),
            self.config.lock_timeout,
        )
        .await
        {
            Ok(LockAttempt::Acquired(guard)) => guard,
            Ok(LockAttempt::Busy) => {
                info!(channel = %channel, "Channel is live but already being recorded");
                return CycleOutcome::Busy;
            }
            Err(e) => {
                error!(channel = %channel, "{e}");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        let recorded_dir = self.config.recorded_dir(&channel.name);
        let processed_dir = self.config.processed_dir(&channel.name);
        for dir in [&recorded_dir, &processed_dir] {
            if let Err(e) = ensure_dir_all_with_op("creating channel directory", dir).await {
                error!(channel = %channel, "{e}");
                return CycleOutcome::Failed(e.to_string());
            }
        }

        let job = RecordingJob::new(
            channel.clone(),
            &recorded_dir,
            &processed_dir,
            metadata.title(),
            Local::now(),
        );
        info!(
            channel = %channel,
            title = %metadata.title(),
            stream_id = %metadata.id,
            "Channel is live, recording"
        );

        let exit = match self
            .capture
            .capture(channel, &job.recorded_file_path, &self.cancel)
            .await
        {
            Ok(exit) => exit,
            Err(e) => {
                error!(channel = %channel, "Capture failed: {e}");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        if exit.cancelled {
            info!(
                channel = %channel,
                file = %job.recorded_file_path.display(),
                "Shutdown during capture, leaving file for the next run"
            );
            return CycleOutcome::Cancelled;
        }

        info!(channel = %channel, "Recording stopped");

        if file_len(&job.recorded_file_path).await.is_none() {
            info!(
                channel = %channel,
                file = %job.recorded_file_path.display(),
                "Capture produced no file, skipping repair"
            );
            return CycleOutcome::Recorded {
                capture_code: exit.code,
                repair: None,
            };
        }

        let repair = self
            .capture
            .repair(&job.recorded_file_path, &job.processed_file_path, &self.cancel)
            .await;

        CycleOutcome::Recorded {
            capture_code: exit.code,
            repair: Some(repair),
        }
    }

    /// Hand files left in the recorded directory by an earlier run to the
    /// repair step. Returns how many were handled.
    pub async fn recover_leftovers(&self) -> usize {
        let channel = self.channel();
        let recorded_dir = self.config.recorded_dir(&channel.name);

        let mut entries = match tokio::fs::read_dir(&recorded_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(channel = %channel, "Cannot scan {}: {e}", recorded_dir.display());
                return 0;
            }
        };

        let _lock = match FileLockGuard::try_acquire(
            &self.config.lock_path(&channel.name),
            self.config.lock_timeout,
        )
        .await
        {
            Ok(LockAttempt::Acquired(guard)) => guard,
            Ok(LockAttempt::Busy) => {
                debug!(channel = %channel, "Channel locked, skipping leftover recovery");
                return 0;
            }
            Err(e) => {
                warn!(channel = %channel, "Skipping leftover recovery: {e}");
                return 0;
            }
        };

        let processed_dir = self.config.processed_dir(&channel.name);
        let mut handled = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(channel = %channel, "Error while scanning leftovers: {e}");
                    break;
                }
            };

            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }

            let input = entry.path();
            let output = processed_dir.join(entry.file_name());
            if tokio::fs::try_exists(&output).await.unwrap_or(false) {
                warn!(
                    channel = %channel,
                    file = %output.display(),
                    "Processed file already exists, leaving leftover in place"
                );
                continue;
            }

            info!(channel = %channel, file = %input.display(), "Recovering leftover recording");
            let outcome = self.capture.repair(&input, &output, &self.cancel).await;
            debug!(channel = %channel, ?outcome, "Leftover handled");
            handled += 1;
        }

        handled
    }
}
