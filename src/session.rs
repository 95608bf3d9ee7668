//! Types shared by the timeshift and ABR session managers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies the live input being buffered or transcoded.
///
/// Owned by the external stream-catalog collaborator; passed in by value at
/// session start and immutable for the life of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSource {
    /// Numeric stream identifier.
    pub id: u32,
    /// Source feed URL (e.g. udp://, http://, rtsp://).
    pub source_url: String,
}

impl StreamSource {
    pub fn new(id: u32, source_url: impl Into<String>) -> Self {
        Self {
            id,
            source_url: source_url.into(),
        }
    }
}

/// Lifecycle state of a buffering or transcode session.
///
/// `Initializing` covers the window between process spawn and the first
/// segment appearing on disk. A process exit during that window means no
/// useful output was produced and maps to `Error`; an exit while `Active`
/// is treated as the feed ending and maps to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Initializing,
    Active,
    Stopped,
    Error,
}

impl SessionStatus {
    /// Whether the session still owns a running (or starting) process.
    pub fn is_live(self) -> bool {
        matches!(self, SessionStatus::Initializing | SessionStatus::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// The seekable window of a timeshift session, in seconds of playback time.
///
/// `start` is the playback time of the oldest retained segment (0 until
/// eviction begins, then drifting upward). `end` is the live edge, capped at
/// the maximum retention. Both are non-decreasing over the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvailableRange {
    pub start: f64,
    pub end: f64,
}

impl AvailableRange {
    /// Whether a seek target falls inside the window (inclusive bounds).
    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.start && secs <= self.end
    }
}

/// Current playback position report for a timeshift session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// The live edge, in seconds since session start.
    pub position: f64,
    /// The window a player may seek within.
    pub available_range: AvailableRange,
}

/// Plain-data summary of a session, safe to hand across the API boundary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub stream_id: u32,
    pub source_url: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub output_dir: std::path::PathBuf,
}
