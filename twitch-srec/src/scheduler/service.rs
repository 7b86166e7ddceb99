//! Multi-channel scheduling.
//!
//! Each cycle reloads the channel list, makes sure a token is available and
//! submits one unit per channel to the [`WorkerPool`]. Submission waits for a
//! free slot, so a cycle ends once its last unit was admitted and the next
//! cycle starts right after. A channel whose previous unit is still running is
//! skipped; a cycle that submits nothing waits one poll interval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::worker_pool::WorkerPool;
use crate::Result;
use crate::config::AppConfig;
use crate::credentials::SharedToken;
use crate::domain::{ChannelSource, ChannelTarget};
use crate::downloader::CaptureRunner;
use crate::monitor::StatusClient;
use crate::recorder::RecordingSupervisor;

/// What a submitted unit does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    /// Check, maybe record, then serve the wait inside the slot.
    Continuous,
    /// Check and maybe record, no wait.
    Once,
}

/// Dispatches channel units onto a bounded pool.
pub struct Scheduler {
    config: Arc<AppConfig>,
    source: Arc<dyn ChannelSource>,
    token: SharedToken,
    status_client: Arc<dyn StatusClient>,
    capture: Arc<CaptureRunner>,
    pool: WorkerPool,
    supervisors: parking_lot::Mutex<HashMap<String, Arc<RecordingSupervisor>>>,
    channels: parking_lot::Mutex<Vec<ChannelTarget>>,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    pub fn new(
        config: Arc<AppConfig>,
        source: Arc<dyn ChannelSource>,
        token: SharedToken,
        status_client: Arc<dyn StatusClient>,
        capture: Arc<CaptureRunner>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            pool: WorkerPool::new(config.max_workers, cancellation_token.child_token()),
            config,
            source,
            token,
            status_client,
            capture,
            supervisors: parking_lot::Mutex::new(HashMap::new()),
            channels: parking_lot::Mutex::new(Vec::new()),
            cancellation_token,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Load the channel list for the first time. Failure is fatal for the caller.
    pub async fn load_initial(&self) -> Result<Vec<ChannelTarget>> {
        let channels = self.source.load().await?;
        info!("Loaded {} channel(s)", channels.len());
        *self.channels.lock() = channels.clone();
        Ok(channels)
    }

    /// Reload the list, keeping the previous one if the source fails.
    async fn reload(&self) -> Vec<ChannelTarget> {
        match self.source.load().await {
            Ok(channels) => {
                let mut current = self.channels.lock();
                if *current != channels {
                    info!("Channel list changed: {} channel(s)", channels.len());
                }
                *current = channels.clone();
                channels
            }
            Err(e) => {
                warn!("Failed to reload channel list, keeping previous: {e}");
                self.channels.lock().clone()
            }
        }
    }

    /// Supervisors for `channels`, reusing cached ones and dropping removed channels.
    fn sync_supervisors(&self, channels: &[ChannelTarget]) -> Vec<Arc<RecordingSupervisor>> {
        let mut supervisors = self.supervisors.lock();

        let names: HashSet<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        supervisors.retain(|name, _| {
            let keep = names.contains(name.as_str());
            if !keep {
                info!(channel = %name, "Channel removed from list");
            }
            keep
        });

        channels
            .iter()
            .map(|channel| {
                let supervisor = supervisors.entry(channel.name.clone()).or_insert_with(|| {
                    debug!(channel = %channel, "New channel");
                    Arc::new(RecordingSupervisor::new(
                        channel.clone(),
                        self.config.clone(),
                        self.token.clone(),
                        self.status_client.clone(),
                        self.capture.clone(),
                        self.cancellation_token.child_token(),
                    ))
                });
                supervisor.update_channel(channel.clone());
                supervisor.clone()
            })
            .collect()
    }

    /// Run one scheduling cycle. Returns the number of units submitted.
    pub async fn run_cycle(&self, mode: UnitMode) -> usize {
        let channels = self.reload().await;
        if channels.is_empty() {
            warn!("Channel list is empty");
            return 0;
        }

        if let Err(e) = self.token.current().await {
            error!("Could not obtain access token: {e}");
            return 0;
        }

        let supervisors = self.sync_supervisors(&channels);
        let mut submitted = 0;
        for supervisor in supervisors {
            let Some(claim) = supervisor.try_claim() else {
                debug!(channel = %supervisor.channel(), "Previous unit still running, skipping");
                continue;
            };
            let admitted = self
                .pool
                .submit(async move {
                    let _claim = claim;
                    match mode {
                        UnitMode::Continuous => supervisor.run_unit().await,
                        UnitMode::Once => supervisor.run_once().await,
                    };
                })
                .await;
            if !admitted {
                break;
            }
            submitted += 1;
        }

        debug!(submitted, in_flight = self.pool.in_flight(), "Cycle dispatched");
        submitted
    }

    /// Cycle until cancelled, then wait for running units.
    pub async fn run(&self) {
        info!(
            "Scheduler started with {} worker(s)",
            self.pool.max_workers()
        );
        while !self.cancellation_token.is_cancelled() {
            if self.run_cycle(UnitMode::Continuous).await == 0 {
                self.idle_wait().await;
            }
        }
        self.pool.shutdown().await;
        info!("Scheduler stopped");
    }

    /// One cycle of check-and-maybe-record for every channel, waiting for all units.
    pub async fn run_once(&self) -> usize {
        let submitted = self.run_cycle(UnitMode::Once).await;
        self.pool.wait_idle().await;
        submitted
    }

    async fn idle_wait(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.cancellation_token.cancelled() => {}
        }
    }

    /// Names of the channels with a cached supervisor.
    pub fn known_channels(&self) -> Vec<String> {
        let mut names: Vec<_> = self.supervisors.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::ProcessLauncher;
    use crate::domain::StaticChannelSource;
    use crate::monitor::StreamStatus;
    use crate::test_utils::{CountingTokenProvider, FakeLauncher, ScriptedStatusClient, test_config};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct SwappableSource(parking_lot::Mutex<Option<Vec<ChannelTarget>>>);

    #[async_trait]
    impl ChannelSource for SwappableSource {
        async fn load(&self) -> Result<Vec<ChannelTarget>> {
            self.0
                .lock()
                .clone()
                .ok_or_else(|| crate::Error::config("list unavailable"))
        }
    }

    fn scheduler(
        root: &std::path::Path,
        source: Arc<dyn ChannelSource>,
        status: Arc<ScriptedStatusClient>,
        tokens: Arc<CountingTokenProvider>,
    ) -> Scheduler {
        let config = Arc::new(AppConfig {
            root_path: root.to_path_buf(),
            max_workers: 2,
            ..test_config()
        });
        let launcher: Arc<dyn ProcessLauncher> = Arc::new(FakeLauncher::new());
        let capture = Arc::new(CaptureRunner::new(launcher, &config));
        Scheduler::new(
            config,
            source,
            SharedToken::new(tokens),
            status,
            capture,
            CancellationToken::new(),
        )
    }

    fn names(list: &[&str]) -> Vec<ChannelTarget> {
        list.iter().map(|n| ChannelTarget::new(*n, "best")).collect()
    }

    #[tokio::test]
    async fn test_once_checks_every_channel() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        let tokens = Arc::new(CountingTokenProvider::new());
        let source = Arc::new(StaticChannelSource::new(names(&["a", "b", "c", "d", "e"])));
        let scheduler = scheduler(temp.path(), source, status.clone(), tokens.clone());

        assert_eq!(scheduler.run_once().await, 5);
        for name in ["a", "b", "c", "d", "e"] {
            assert_eq!(status.calls_for(name), 1);
        }
        assert_eq!(tokens.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_reload_drops_removed_and_keeps_list_on_error() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        let tokens = Arc::new(CountingTokenProvider::new());
        let source = Arc::new(SwappableSource(parking_lot::Mutex::new(Some(names(&[
            "a", "b",
        ])))));
        let scheduler = scheduler(temp.path(), source.clone(), status.clone(), tokens);

        scheduler.run_once().await;
        assert_eq!(scheduler.known_channels(), ["a", "b"]);

        *source.0.lock() = Some(names(&["b", "c"]));
        scheduler.run_once().await;
        assert_eq!(scheduler.known_channels(), ["b", "c"]);
        assert_eq!(status.calls_for("a"), 1);

        *source.0.lock() = None;
        assert_eq!(scheduler.run_once().await, 2);
        assert_eq!(status.calls_for("c"), 2);
    }

    #[tokio::test]
    async fn test_token_failure_skips_cycle() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        let tokens = Arc::new(CountingTokenProvider::new());
        tokens.set_failing(true);
        let source = Arc::new(StaticChannelSource::new(names(&["a"])));
        let scheduler = scheduler(temp.path(), source, status.clone(), tokens.clone());

        assert_eq!(scheduler.run_cycle(UnitMode::Continuous).await, 0);
        assert!(status.calls().is_empty());
        assert_eq!(tokens.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cycles_are_spaced_by_poll_interval() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        let tokens = Arc::new(CountingTokenProvider::new());
        tokens.set_failing(true);
        let source = Arc::new(StaticChannelSource::new(names(&["a"])));
        let scheduler = Arc::new(scheduler(temp.path(), source, status, tokens.clone()));

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(tokens.fetch_count(), 3);

        scheduler.cancellation_token.cancel();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_with_running_unit_is_skipped() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        let tokens = Arc::new(CountingTokenProvider::new());
        let source = Arc::new(StaticChannelSource::new(names(&["a", "b"])));
        let scheduler = scheduler(temp.path(), source, status.clone(), tokens);

        // Sync once so the cached supervisor can be claimed from outside.
        assert_eq!(scheduler.run_once().await, 2);
        let busy = scheduler.supervisors.lock()["a"].clone();
        let claim = busy.try_claim().unwrap();

        assert_eq!(scheduler.run_once().await, 1);
        assert_eq!(status.calls_for("a"), 1);
        assert_eq!(status.calls_for("b"), 2);

        drop(claim);
        assert_eq!(scheduler.run_once().await, 2);
        assert_eq!(status.calls_for("a"), 2);
    }

    #[tokio::test]
    async fn test_not_found_channel_does_not_affect_others() {
        let temp = TempDir::new().unwrap();
        let status = Arc::new(ScriptedStatusClient::new());
        status.push("typo", StreamStatus::NotFound);
        status.push("bad", StreamStatus::TransientError("HTTP 500".into()));
        let tokens = Arc::new(CountingTokenProvider::new());
        let source = Arc::new(StaticChannelSource::new(names(&["typo", "bad", "ok"])));
        let scheduler = scheduler(temp.path(), source, status.clone(), tokens);

        assert_eq!(scheduler.run_once().await, 3);
        assert_eq!(status.calls_for("ok"), 1);
    }
}
