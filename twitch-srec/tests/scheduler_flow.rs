//! End-to-end scheduling tests with fake status, token and process backends.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use twitch_srec::config::AppConfig;
use twitch_srec::credentials::SharedToken;
use twitch_srec::domain::{ChannelSource, ChannelTarget, FileChannelSource, StaticChannelSource};
use twitch_srec::downloader::CaptureRunner;
use twitch_srec::monitor::{StreamMetadata, StreamStatus};
use twitch_srec::scheduler::Scheduler;
use twitch_srec::test_utils::{
    CountingTokenProvider, FakeLauncher, ScriptedStatusClient, init_tracing, test_config,
};

struct Setup {
    scheduler: Arc<Scheduler>,
    status: Arc<ScriptedStatusClient>,
    launcher: Arc<FakeLauncher>,
    config: Arc<AppConfig>,
    cancel: CancellationToken,
}

fn setup(
    root: &Path,
    workers: usize,
    source: Arc<dyn ChannelSource>,
    launcher: FakeLauncher,
) -> Setup {
    init_tracing();
    let config = Arc::new(AppConfig {
        root_path: root.to_path_buf(),
        max_workers: workers,
        ..test_config()
    });
    let status = Arc::new(ScriptedStatusClient::new());
    let launcher = Arc::new(launcher);
    let cancel = CancellationToken::new();
    let scheduler = build_scheduler(&config, source, &status, &launcher, &cancel);
    Setup {
        scheduler,
        status,
        launcher,
        config,
        cancel,
    }
}

/// A scheduler sharing the fakes of another, like a second process on the same root.
fn build_scheduler(
    config: &Arc<AppConfig>,
    source: Arc<dyn ChannelSource>,
    status: &Arc<ScriptedStatusClient>,
    launcher: &Arc<FakeLauncher>,
    cancel: &CancellationToken,
) -> Arc<Scheduler> {
    let capture = Arc::new(CaptureRunner::new(launcher.clone(), config));
    Arc::new(Scheduler::new(
        config.clone(),
        source,
        SharedToken::new(Arc::new(CountingTokenProvider::new())),
        status.clone(),
        capture,
        cancel.clone(),
    ))
}

fn live(title: &str) -> StreamStatus {
    StreamStatus::Online(StreamMetadata {
        title: Some(title.to_string()),
        id: "1".to_string(),
        game_name: None,
        started_at: None,
    })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_live_channels_never_exceed_worker_cap() {
    let temp = TempDir::new().unwrap();
    let channels = (0..10)
        .map(|i| ChannelTarget::new(format!("chan{i}"), "best"))
        .collect();
    let s = setup(
        temp.path(),
        3,
        Arc::new(StaticChannelSource::new(channels)),
        FakeLauncher::new().blocking_capture(),
    );
    s.status.set_default(live("marathon"));

    let runner = {
        let scheduler = s.scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    wait_until(|| s.launcher.active_captures() == 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(s.launcher.max_concurrent_captures(), 3);
    assert!(s.scheduler.pool().in_flight() <= 3);
    assert_eq!(s.status.calls().len(), 3);

    s.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(s.scheduler.pool().in_flight(), 0);

    // Interrupted captures stay in place for the next run.
    for i in 0..3 {
        let dir = s.config.recorded_dir(&format!("chan{i}"));
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);
    }
}

#[tokio::test]
async fn test_recording_channel_is_not_repolled() {
    let temp = TempDir::new().unwrap();
    let s = setup(
        temp.path(),
        4,
        Arc::new(StaticChannelSource::new(vec![ChannelTarget::new("alice", "best")])),
        FakeLauncher::new().blocking_capture(),
    );
    s.status.set_default(live("marathon"));

    let runner = {
        let scheduler = s.scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    wait_until(|| s.launcher.active_captures() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(s.status.calls_for("alice"), 1);
    assert_eq!(s.scheduler.pool().in_flight(), 1);

    s.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shared_root_records_once() {
    let temp = TempDir::new().unwrap();
    let alice = vec![ChannelTarget::new("alice", "best")];
    let s = setup(
        temp.path(),
        2,
        Arc::new(StaticChannelSource::new(alice.clone())),
        FakeLauncher::new().blocking_capture(),
    );
    s.status.set_default(live("Ranked Play!"));
    let other = build_scheduler(
        &s.config,
        Arc::new(StaticChannelSource::new(alice)),
        &s.status,
        &s.launcher,
        &s.cancel,
    );

    let first = {
        let scheduler = s.scheduler.clone();
        tokio::spawn(async move { scheduler.run_once().await })
    };
    s.launcher.wait_capture_started().await;

    // The second instance sees the channel live but locked.
    assert_eq!(other.run_once().await, 1);
    assert_eq!(s.status.calls_for("alice"), 2);
    assert_eq!(s.launcher.active_captures(), 1);

    s.launcher.release();
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(s.launcher.max_concurrent_captures(), 1);
    assert_eq!(
        s.launcher
            .started_programs()
            .iter()
            .filter(|p| *p == "streamlink")
            .count(),
        1
    );

    let processed: Vec<_> = std::fs::read_dir(s.config.processed_dir("alice"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(processed.len(), 1);
    assert!(processed[0].ends_with(" - Ranked Play.mp4"));
}

#[tokio::test]
async fn test_file_source_picks_up_edits_between_cycles() {
    let temp = TempDir::new().unwrap();
    let list = temp.path().join("streamers.txt");
    std::fs::write(&list, "alice\n# bob\n").unwrap();

    let s = setup(
        temp.path(),
        4,
        Arc::new(FileChannelSource::new(&list, "best")),
        FakeLauncher::new(),
    );

    assert_eq!(s.scheduler.load_initial().await.unwrap().len(), 1);
    assert_eq!(s.scheduler.run_once().await, 1);

    std::fs::write(&list, "alice\nbob 720p\n").unwrap();
    assert_eq!(s.scheduler.run_once().await, 2);
    assert_eq!(s.status.calls_for("alice"), 2);
    assert_eq!(s.status.calls_for("bob"), 1);
    assert_eq!(s.scheduler.known_channels(), ["alice", "bob"]);
}

#[tokio::test]
async fn test_missing_channel_list_is_fatal_at_startup() {
    let temp = TempDir::new().unwrap();
    let s = setup(
        temp.path(),
        1,
        Arc::new(FileChannelSource::new(temp.path().join("missing.txt"), "best")),
        FakeLauncher::new(),
    );
    assert!(s.scheduler.load_initial().await.is_err());
}
