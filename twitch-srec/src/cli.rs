use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{self, AppConfig};

#[derive(Parser, Debug)]
#[command(
    name = "twitch-srec",
    about = "Watches Twitch channels and records them while they are live",
    version
)]
pub struct Args {
    /// Record a single channel instead of the streamers file
    #[arg(short, long)]
    pub username: Option<String>,

    /// Stream quality passed to streamlink
    #[arg(short, long, default_value = "best")]
    pub quality: String,

    /// Log level
    #[arg(
        short,
        long = "log",
        alias = "logging",
        value_enum,
        ignore_case = true,
        default_value = "info"
    )]
    pub log_level: LogLevel,

    /// Move finished recordings instead of remuxing them with ffmpeg
    #[arg(long)]
    pub disable_ffmpeg: bool,

    /// Channel list, one name per line (optionally followed by a quality)
    #[arg(long, default_value = "streamers.txt")]
    pub streamers: PathBuf,

    /// Maximum number of channels handled concurrently
    #[arg(short, long, default_value_t = config::DEFAULT_MAX_WORKERS)]
    pub workers: usize,

    /// Root directory for recorded/ and processed/ folders
    #[arg(long, env = "TWITCH_SREC_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Seconds between checks of an offline channel (minimum 15)
    #[arg(long, default_value = "15")]
    pub interval: u64,

    /// Run a single check (or a single scheduling cycle) and exit
    #[arg(long)]
    pub once: bool,

    /// Twitch application client id
    #[arg(long, env = "TWITCH_CLIENT_ID", hide_env_values = true)]
    pub client_id: String,

    /// Twitch application client secret
    #[arg(long, env = "TWITCH_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,

    /// streamlink binary
    #[arg(long, env = "STREAMLINK_PATH", default_value = "streamlink")]
    pub streamlink_path: String,

    /// ffmpeg binary
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: String,

    /// Directory for log files
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl Args {
    /// Build the application configuration. Validation happens separately.
    pub fn to_config(&self) -> AppConfig {
        AppConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            root_path: self.root.clone(),
            poll_interval: Duration::from_secs(self.interval),
            quality: self.quality.clone(),
            repair_enabled: !self.disable_ffmpeg,
            max_workers: self.workers,
            streamers_file: self.streamers.clone(),
            capture_binary: self.streamlink_path.clone(),
            repair_binary: self.ffmpeg_path.clone(),
            log_dir: self.log_dir.clone(),
            ..AppConfig::default()
        }
    }
}
