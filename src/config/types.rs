use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub transcoder: TranscoderConfig,

    #[serde(default)]
    pub timeshift: TimeshiftConfig,

    #[serde(default)]
    pub abr: AbrConfig,

    #[serde(default)]
    pub sweep: SweepConfig,
}

/// External transcoder process settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscoderConfig {
    /// Transcoder binary name or path (resolved via PATH when bare).
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Seconds to wait after the cooperative shutdown signal before killing.
    #[serde(default = "default_termination_grace")]
    pub termination_grace_secs: u64,
}

fn default_binary() -> String {
    "ffmpeg".to_string()
}
fn default_termination_grace() -> u64 {
    5
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            termination_grace_secs: default_termination_grace(),
        }
    }
}

impl TranscoderConfig {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }
}

/// Timeshift buffer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeshiftConfig {
    /// Root directory holding one `stream_<id>` buffer per session.
    #[serde(default = "default_buffer_root")]
    pub buffer_root: PathBuf,

    /// Fixed segment length in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,

    /// Segment file extension written by the transcoder.
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,

    /// Interval between output-directory scans. Must stay strictly below
    /// the segment duration or segments could be missed between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum retained history (the rewind window).
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// How long a stopped session's directory stays on disk for in-flight
    /// viewers before deletion.
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,
}

fn default_buffer_root() -> PathBuf {
    PathBuf::from("/var/lib/streamvault/buffer")
}
fn default_segment_duration() -> u64 {
    10
}
fn default_segment_extension() -> String {
    "ts".to_string()
}
fn default_poll_interval() -> u64 {
    5
}
fn default_retention() -> u64 {
    7200
}
fn default_cleanup_grace() -> u64 {
    3600
}

impl Default for TimeshiftConfig {
    fn default() -> Self {
        Self {
            buffer_root: default_buffer_root(),
            segment_duration_secs: default_segment_duration(),
            segment_extension: default_segment_extension(),
            poll_interval_secs: default_poll_interval(),
            retention_secs: default_retention(),
            cleanup_grace_secs: default_cleanup_grace(),
        }
    }
}

impl TimeshiftConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

/// Adaptive-bitrate session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbrConfig {
    /// Root directory holding one `stream_<id>` tree per ABR session.
    #[serde(default = "default_abr_root")]
    pub output_root: PathBuf,

    /// Fixed segment length in seconds.
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,

    /// Segment file extension written by the transcoder.
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,

    /// Interval between variant-directory scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// How long a stopped session's directory stays on disk before deletion.
    #[serde(default = "default_cleanup_grace")]
    pub cleanup_grace_secs: u64,
}

fn default_abr_root() -> PathBuf {
    PathBuf::from("/var/lib/streamvault/abr")
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            output_root: default_abr_root(),
            segment_duration_secs: default_segment_duration(),
            segment_extension: default_segment_extension(),
            poll_interval_secs: default_poll_interval(),
            cleanup_grace_secs: default_cleanup_grace(),
        }
    }
}

impl AbrConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

/// Stale buffer-directory sweep, guarding against state leaked by crashed
/// sessions that never went through a normal stop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,

    /// How often the sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Directories untouched for longer than this are force-deleted.
    #[serde(default = "default_sweep_max_age")]
    pub max_age_secs: u64,
}

fn default_sweep_enabled() -> bool {
    true
}
fn default_sweep_interval() -> u64 {
    3600
}
fn default_sweep_max_age() -> u64 {
    10800
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval(),
            max_age_secs: default_sweep_max_age(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}
