//! Segment discovery and sliding-window eviction.
//!
//! The tracker polls an output directory for segment files written by the
//! external transcoder, parses their indices from the file name, and evicts
//! from the low end once the retained duration exceeds the window. Retained
//! segments always form a contiguous index range.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

/// Metadata for one on-disk media segment.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Monotonic index assigned by the transcoder's naming scheme.
    pub index: u64,
    pub path: PathBuf,
    /// Nominal duration (the configured segment length).
    pub duration: Duration,
    /// Byte size at discovery time.
    pub size: u64,
}

impl Segment {
    /// Playback time of this segment's first frame, in seconds from start.
    pub fn start_offset(&self) -> Duration {
        self.duration * self.index as u32
    }

    /// Wall-clock start, computed as `session_start + index * duration`.
    pub fn start_time(&self, session_start: DateTime<Utc>) -> DateTime<Utc> {
        session_start + chrono::Duration::from_std(self.start_offset()).unwrap_or_default()
    }

    /// File name relative to the output directory.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Tracks the segment files of one buffering session.
#[derive(Debug)]
pub struct SegmentTracker {
    dir: PathBuf,
    segment_duration: Duration,
    pattern: Regex,
    /// Retained segments in ascending, contiguous index order.
    segments: VecDeque<Segment>,
    /// Highest index ever discovered; scan only emits indices above this.
    high_water: Option<u64>,
}

impl SegmentTracker {
    /// Create a tracker over `dir` for files named `segment_<index>.<ext>`.
    pub fn new(dir: impl Into<PathBuf>, segment_duration: Duration, extension: &str) -> Self {
        let pattern = Regex::new(&format!(r"^segment_(\d+)\.{}$", regex::escape(extension)))
            .expect("static segment pattern");
        Self {
            dir: dir.into(),
            segment_duration,
            pattern,
            segments: VecDeque::new(),
            high_water: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_duration(&self) -> Duration {
        self.segment_duration
    }

    /// Scan the output directory for newly written segments.
    ///
    /// Idempotent: already-known indices are not re-emitted. Files that do
    /// not match the expected naming pattern are ignored.
    pub fn scan(&mut self) -> std::io::Result<Vec<Segment>> {
        let mut discovered = Vec::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(caps) = self.pattern.captures(name) else {
                continue;
            };
            let Ok(index) = caps[1].parse::<u64>() else {
                continue;
            };
            if self.high_water.is_some_and(|hw| index <= hw) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            discovered.push(Segment {
                index,
                path: entry.path(),
                duration: self.segment_duration,
                size,
            });
        }

        discovered.sort_by_key(|s| s.index);
        for segment in &discovered {
            debug!(index = segment.index, size = segment.size, "Discovered segment");
            self.high_water = Some(segment.index);
            self.segments.push_back(segment.clone());
        }

        Ok(discovered)
    }

    /// Evict oldest segments so the retained duration fits the window.
    ///
    /// Removal is batched: if `count * segment_duration` exceeds the window,
    /// `floor((total - window) / segment_duration)` oldest segments are
    /// deleted in one pass. A failed file delete keeps the segment's metadata
    /// so the delete is retried on the next sweep; eviction never removes
    /// from anywhere but the low end.
    pub fn evict(&mut self, window: Duration) -> Vec<Segment> {
        let total = self.segment_duration * self.segments.len() as u32;
        if total <= window {
            return Vec::new();
        }

        let excess = total - window;
        let count = (excess.as_secs_f64() / self.segment_duration.as_secs_f64()).floor() as usize;

        let mut removed = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(oldest) = self.segments.front() else {
                break;
            };
            match std::fs::remove_file(&oldest.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = ?oldest.path, error = %e, "Failed to delete evicted segment, will retry");
                    break;
                }
            }
            let segment = self.segments.pop_front().expect("front checked above");
            debug!(index = segment.index, "Evicted segment");
            removed.push(segment);
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn oldest(&self) -> Option<&Segment> {
        self.segments.front()
    }

    pub fn newest(&self) -> Option<&Segment> {
        self.segments.back()
    }

    /// Total playback time currently retained.
    pub fn retained_duration(&self) -> Duration {
        self.segment_duration * self.segments.len() as u32
    }

    /// Retained segments with `index >= from`, in ascending order.
    pub fn segments_from(&self, from: u64) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| s.index >= from)
    }
}
