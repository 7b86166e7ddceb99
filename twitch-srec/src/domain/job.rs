use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::ChannelTarget;
use crate::utils::filename::recording_filename;

/// One recording of a live channel, from capture start to hand-off.
#[derive(Debug, Clone)]
pub struct RecordingJob {
    pub channel: ChannelTarget,
    /// Where the capture tool writes.
    pub recorded_file_path: PathBuf,
    /// Where the repaired (or moved) file ends up.
    pub processed_file_path: PathBuf,
    pub started_at: DateTime<Local>,
}

impl RecordingJob {
    /// Plan a recording that starts now-ish; both paths share one sanitized filename.
    pub fn new(
        channel: ChannelTarget,
        recorded_dir: &Path,
        processed_dir: &Path,
        title: &str,
        started_at: DateTime<Local>,
    ) -> Self {
        let filename = recording_filename(&channel.name, started_at.naive_local(), title);
        Self {
            recorded_file_path: recorded_dir.join(&filename),
            processed_file_path: processed_dir.join(&filename),
            channel,
            started_at,
        }
    }
}
