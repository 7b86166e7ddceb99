//! Capture (streamlink) and repair (ffmpeg) of one recording.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::process::{CommandSpec, ProcessExit, ProcessLauncher};
use crate::Result;
use crate::config::AppConfig;
use crate::domain::ChannelTarget;
use crate::utils::fs::{ensure_dir_all_with_op, file_len, move_file};

/// Result of handing a finished recording to the repair step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Repair disabled; the file was moved unchanged.
    Moved,
    /// The repair tool produced the output and the input was removed.
    Repaired { code: Option<i32> },
    /// The repair tool ran but no usable output exists; the input was kept.
    Failed { reason: String },
    /// The repair tool could not be started; the input was kept.
    LaunchFailed,
}

impl RepairOutcome {
    /// Whether the recorded file is still in place.
    pub fn input_kept(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::LaunchFailed)
    }
}

/// Status parsed from a streamlink stderr line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamlinkStatus {
    StreamOpened,
    StreamEnded,
    Error(String),
}

/// Parse streamlink output for status information.
pub fn parse_streamlink_output(line: &str) -> Option<StreamlinkStatus> {
    if line.contains("[cli][info] Stream ended") {
        return Some(StreamlinkStatus::StreamEnded);
    }
    if line.contains("[cli][info] Opening stream") {
        return Some(StreamlinkStatus::StreamOpened);
    }
    if line.contains("[cli][error]") || line.contains("error: ") {
        return Some(StreamlinkStatus::Error(line.to_string()));
    }
    None
}

/// Runs the external capture and repair tools.
///
/// No retries happen here; the supervisor re-polls and records again if the
/// channel is still live.
pub struct CaptureRunner {
    launcher: Arc<dyn ProcessLauncher>,
    capture_binary: String,
    repair_binary: String,
    repair_enabled: bool,
}

impl CaptureRunner {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, config: &AppConfig) -> Self {
        Self {
            launcher,
            capture_binary: config.capture_binary.clone(),
            repair_binary: config.repair_binary.clone(),
            repair_enabled: config.repair_enabled,
        }
    }

    pub fn capture_command(&self, channel: &ChannelTarget, output: &Path) -> CommandSpec {
        CommandSpec::new(&self.capture_binary)
            .arg("--twitch-disable-ads")
            .arg(channel.stream_url())
            .arg(&channel.quality)
            .arg("-o")
            .arg(output.to_string_lossy())
    }

    pub fn repair_command(&self, input: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new(&self.repair_binary)
            .arg("-err_detect")
            .arg("ignore_err")
            .arg("-i")
            .arg(input.to_string_lossy())
            .arg("-c")
            .arg("copy")
            .arg(output.to_string_lossy())
    }

    /// Record `channel` into `output` until the capture tool exits.
    ///
    /// Any exit code is returned as is. Only a launch or wait failure is an error.
    pub async fn capture(
        &self,
        channel: &ChannelTarget,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProcessExit> {
        let spec = self.capture_command(channel, output);
        info!(channel = %channel, output = %output.display(), "Starting capture");

        let mut process = self.launcher.start(&spec)?;
        let exit = process.wait(cancel).await?;

        for line in &exit.stderr_tail {
            match parse_streamlink_output(line) {
                Some(StreamlinkStatus::StreamEnded) => {
                    info!(channel = %channel, "Streamlink stream ended")
                }
                Some(StreamlinkStatus::Error(err)) => {
                    warn!(channel = %channel, "Streamlink error: {err}")
                }
                Some(StreamlinkStatus::StreamOpened) | None => {}
            }
        }

        if exit.cancelled {
            info!(channel = %channel, "Capture stopped by shutdown");
        } else {
            debug!(channel = %channel, code = ?exit.code, "Capture process exited");
        }
        Ok(exit)
    }

    /// Hand a finished recording to the repair step.
    ///
    /// The input is only removed once a replacement exists at `output`.
    pub async fn repair(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> RepairOutcome {
        if let Some(parent) = output.parent()
            && let Err(e) = ensure_dir_all_with_op("creating processed directory", parent).await
        {
            error!("{e}");
            return RepairOutcome::Failed {
                reason: e.to_string(),
            };
        }

        if !self.repair_enabled {
            return match move_file(input, output).await {
                Ok(()) => {
                    info!(output = %output.display(), "Moved recording");
                    RepairOutcome::Moved
                }
                Err(e) => {
                    error!(input = %input.display(), "Failed to move recording: {e}");
                    RepairOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
        }

        let spec = self.repair_command(input, output);
        info!(input = %input.display(), "Repairing recording");

        let mut process = match self.launcher.start(&spec) {
            Ok(process) => process,
            Err(e) => {
                error!(input = %input.display(), "Repair could not start, keeping file: {e}");
                return RepairOutcome::LaunchFailed;
            }
        };

        let exit = match process.wait(cancel).await {
            Ok(exit) => exit,
            Err(e) => {
                error!(input = %input.display(), "Waiting for repair failed: {e}");
                return RepairOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        if exit.cancelled {
            if let Err(e) = tokio::fs::remove_file(output).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(output = %output.display(), "Failed to remove partial output: {e}");
            }
            return RepairOutcome::Failed {
                reason: "repair stopped by shutdown".to_string(),
            };
        }

        match file_len(output).await {
            Some(len) if len > 0 => {}
            _ => {
                let reason = match exit.stderr_tail.last() {
                    Some(last) => format!("no output produced (exit {:?}): {last}", exit.code),
                    None => format!("no output produced (exit {:?})", exit.code),
                };
                error!(input = %input.display(), "Repair failed, keeping file: {reason}");
                return RepairOutcome::Failed { reason };
            }
        }

        if exit.code != Some(0) {
            warn!(code = ?exit.code, output = %output.display(), "Repair exited with errors");
        }

        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!(input = %input.display(), "Failed to remove repaired input: {e}");
        }
        info!(output = %output.display(), "Recording repaired");
        RepairOutcome::Repaired { code: exit.code }
    }
}
