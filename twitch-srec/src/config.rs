//! Runtime configuration.
//!
//! One `AppConfig` is built at startup (CLI + environment) and handed to each
//! component constructor. Nothing reads configuration from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::{Error, Result};

/// Lowest allowed poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default wait after a transient API failure.
pub const DEFAULT_ERROR_COOLDOWN: Duration = Duration::from_secs(300);

/// Default timeout for status and token requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time spent trying to take a channel lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(50);

/// Default number of concurrent channel workers.
pub const DEFAULT_MAX_WORKERS: usize = 4;

pub const DEFAULT_STATUS_ENDPOINT: &str = "https://api.twitch.tv/helix/streams";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://id.twitch.tv/oauth2/token";

/// Application configuration shared (read-only) by every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Twitch application client id.
    pub client_id: String,
    /// Twitch application client secret.
    pub client_secret: String,
    /// Root under which `recorded/` and `processed/` live.
    pub root_path: PathBuf,
    /// Wait between checks of an offline channel.
    pub poll_interval: Duration,
    /// Wait after a transient API failure.
    pub error_cooldown: Duration,
    /// Timeout applied to each HTTP request.
    pub request_timeout: Duration,
    /// Time spent trying to take a channel lock before skipping.
    pub lock_timeout: Duration,
    /// Default stream quality passed to the capture tool.
    pub quality: String,
    /// When false, finished recordings are moved instead of remuxed.
    pub repair_enabled: bool,
    /// Worker cap for multi-channel mode.
    pub max_workers: usize,
    /// Channel list file for multi-channel mode.
    pub streamers_file: PathBuf,
    /// Capture tool binary.
    pub capture_binary: String,
    /// Repair tool binary.
    pub repair_binary: String,
    pub status_endpoint: String,
    pub token_endpoint: String,
    /// Directory for rolling log files.
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            root_path: PathBuf::from("."),
            poll_interval: MIN_POLL_INTERVAL,
            error_cooldown: DEFAULT_ERROR_COOLDOWN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            quality: "best".to_string(),
            repair_enabled: true,
            max_workers: DEFAULT_MAX_WORKERS,
            streamers_file: PathBuf::from("streamers.txt"),
            capture_binary: "streamlink".to_string(),
            repair_binary: "ffmpeg".to_string(),
            status_endpoint: DEFAULT_STATUS_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Check the configuration, fixing up values that have a safe fallback.
    ///
    /// Missing credentials and a zero worker cap are fatal.
    pub fn validate(&mut self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::config("client id is not set"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::config("client secret is not set"));
        }
        if self.max_workers == 0 {
            return Err(Error::config("worker count must be at least 1"));
        }
        if self.quality.trim().is_empty() {
            return Err(Error::config("quality must not be empty"));
        }

        if self.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                "check interval should not be lower than {} seconds",
                MIN_POLL_INTERVAL.as_secs()
            );
            self.poll_interval = MIN_POLL_INTERVAL;
            info!(
                "check interval set to {} seconds",
                MIN_POLL_INTERVAL.as_secs()
            );
        }

        Ok(())
    }

    /// Directory that receives raw captures for `channel`.
    pub fn recorded_dir(&self, channel: &str) -> PathBuf {
        self.root_path.join("recorded").join(channel)
    }

    /// Directory that receives repaired (or moved) files for `channel`.
    pub fn processed_dir(&self, channel: &str) -> PathBuf {
        self.root_path.join("processed").join(channel)
    }

    /// Lock file guarding `channel`'s recorded directory.
    pub fn lock_path(&self, channel: &str) -> PathBuf {
        lock_path_for(&self.recorded_dir(channel))
    }
}

/// `<dir>.lock`, next to the directory it protects.
pub fn lock_path_for(dir: &Path) -> PathBuf {
    let mut os = dir.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}
