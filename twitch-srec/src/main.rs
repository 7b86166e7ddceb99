use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use twitch_srec::cli::Args;
use twitch_srec::config::AppConfig;
use twitch_srec::credentials::{SharedToken, TwitchTokenProvider};
use twitch_srec::domain::{ChannelTarget, FileChannelSource};
use twitch_srec::downloader::{CaptureRunner, TokioProcessLauncher};
use twitch_srec::logging;
use twitch_srec::monitor::HelixStatusClient;
use twitch_srec::recorder::RecordingSupervisor;
use twitch_srec::scheduler::Scheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard =
        logging::init_logging(&args.log_dir, args.log_level).context("initializing logging")?;

    let mut config = args.to_config();
    config.validate()?;
    let config = Arc::new(config);

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());
    logging::start_retention_cleanup(config.log_dir.clone(), cancel.child_token());

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("building HTTP client")?;

    let token = SharedToken::new(Arc::new(TwitchTokenProvider::new(http.clone(), &config)));
    token
        .current()
        .await
        .context("fetching the initial access token")?;
    info!("Access token acquired");

    let status_client = Arc::new(HelixStatusClient::new(http, &config));
    let capture = Arc::new(CaptureRunner::new(
        Arc::new(TokioProcessLauncher::new()),
        &config,
    ));

    if !config.repair_enabled {
        info!("ffmpeg repair disabled, recordings will be moved as is");
    }

    match args.username {
        Some(name) => {
            let channel = ChannelTarget::new(name, config.quality.clone());
            info!(
                channel = %channel,
                quality = %channel.quality,
                "Checking every {} seconds",
                config.poll_interval.as_secs()
            );
            let supervisor = RecordingSupervisor::new(
                channel,
                config.clone(),
                token,
                status_client,
                capture,
                cancel.clone(),
            );
            if args.once {
                let outcome = supervisor.run_once().await;
                info!(?outcome, "Single check finished");
            } else {
                supervisor.run_forever().await;
            }
        }
        None => {
            let scheduler = build_scheduler(&config, token, status_client, capture, &cancel);
            scheduler.load_initial().await.with_context(|| {
                format!("loading channel list {}", config.streamers_file.display())
            })?;

            if args.once {
                let submitted = scheduler.run_once().await;
                info!(submitted, "Single cycle finished");
            } else {
                scheduler.run().await;
            }
        }
    }

    cancel.cancel();
    info!("twitch-srec stopped");
    Ok(())
}

fn build_scheduler(
    config: &Arc<AppConfig>,
    token: SharedToken,
    status_client: Arc<HelixStatusClient>,
    capture: Arc<CaptureRunner>,
    cancel: &CancellationToken,
) -> Scheduler {
    info!(
        file = %config.streamers_file.display(),
        workers = config.max_workers,
        "Starting multi-channel mode"
    );
    Scheduler::new(
        config.clone(),
        Arc::new(FileChannelSource::new(
            config.streamers_file.clone(),
            config.quality.clone(),
        )),
        token,
        status_client,
        capture,
        cancel.clone(),
    )
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Shutdown requested, stopping after current work");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
    });
}
