//! Live status of a channel.

use serde::Deserialize;

/// Metadata of a live stream, taken from the first `data` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamMetadata {
    /// Stream title. Helix may send `null` or omit it.
    #[serde(default)]
    pub title: Option<String>,
    /// Platform stream id.
    #[serde(default)]
    pub id: String,
    /// Category (if available).
    #[serde(default)]
    pub game_name: Option<String>,
    /// Stream start time as reported by the platform (if available).
    #[serde(default)]
    pub started_at: Option<String>,
}

impl StreamMetadata {
    /// Title, empty when the stream has none.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }
}

/// Result of one status poll. Produced fresh each poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    /// Channel is live.
    Online(StreamMetadata),
    /// Channel is offline.
    Offline,
    /// Channel name is unknown to the API (configuration problem).
    NotFound,
    /// Token was rejected.
    Unauthorized,
    /// Timeout, connection failure, 5xx or unparsable response.
    TransientError(String),
}

impl StreamStatus {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Online(_) => "online",
            Self::Offline => "offline",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::TransientError(_) => "transient_error",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientError(reason) => write!(f, "transient_error ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}
