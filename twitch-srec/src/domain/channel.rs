//! Channel targets and the list they are loaded from.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;
use crate::utils::fs::io_error;

/// A channel to watch. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelTarget {
    /// Twitch login name.
    pub name: String,
    /// Quality passed to the capture tool.
    pub quality: String,
}

impl ChannelTarget {
    pub fn new(name: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quality: quality.into(),
        }
    }

    /// URL handed to the capture tool.
    pub fn stream_url(&self) -> String {
        format!("twitch.tv/{}", self.name)
    }
}

impl std::fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Source of the channel list, re-read on every scheduling cycle.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn load(&self) -> Result<Vec<ChannelTarget>>;
}

/// Channel list stored in a text file.
///
/// One channel per line, optionally followed by a quality. Blank lines,
/// `#` comments and lines of a single character are skipped.
#[derive(Debug, Clone)]
pub struct FileChannelSource {
    path: PathBuf,
    default_quality: String,
}

impl FileChannelSource {
    pub fn new(path: impl Into<PathBuf>, default_quality: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            default_quality: default_quality.into(),
        }
    }
}

#[async_trait]
impl ChannelSource for FileChannelSource {
    async fn load(&self) -> Result<Vec<ChannelTarget>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| io_error("reading channel list", &self.path, e))?;
        Ok(parse_channel_list(&content, &self.default_quality))
    }
}

/// Parse channel list text. Duplicate names keep their first entry.
pub fn parse_channel_list(content: &str, default_quality: &str) -> Vec<ChannelTarget> {
    let mut seen = HashSet::new();
    let mut channels = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.chars().count() <= 1 || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        let quality = parts.next().unwrap_or(default_quality);

        if seen.insert(name.to_string()) {
            channels.push(ChannelTarget::new(name, quality));
        }
    }

    channels
}

/// Fixed list, used for single-channel mode and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticChannelSource {
    channels: Vec<ChannelTarget>,
}

impl StaticChannelSource {
    pub fn new(channels: Vec<ChannelTarget>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl ChannelSource for StaticChannelSource {
    async fn load(&self) -> Result<Vec<ChannelTarget>> {
        Ok(self.channels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_blank_short_and_comment_lines() {
        let content = "alice\n\n  \nx\n# paused\nbob\n";
        let channels = parse_channel_list(content, "best");
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob"]);
    }

    #[test]
    fn test_parse_quality_override() {
        let channels = parse_channel_list("alice 720p60\r\nbob\n", "best");
        assert_eq!(channels[0], ChannelTarget::new("alice", "720p60"));
        assert_eq!(channels[1], ChannelTarget::new("bob", "best"));
    }

    #[test]
    fn test_parse_dedupes_by_name() {
        let channels = parse_channel_list("alice 720p\nalice 480p\n", "best");
        assert_eq!(channels, vec![ChannelTarget::new("alice", "720p")]);
    }

    #[test]
    fn test_stream_url() {
        assert_eq!(ChannelTarget::new("bob", "best").stream_url(), "twitch.tv/bob");
    }

    #[tokio::test]
    async fn test_file_source_rereads_on_each_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("streamers.txt");
        tokio::fs::write(&path, "alice\n").await.unwrap();

        let source = FileChannelSource::new(&path, "best");
        assert_eq!(source.load().await.unwrap().len(), 1);

        tokio::fs::write(&path, "alice\nbob\n").await.unwrap();
        assert_eq!(source.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        let source = FileChannelSource::new(temp.path().join("missing.txt"), "best");
        assert!(source.load().await.is_err());
    }
}
