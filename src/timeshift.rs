//! Timeshift buffer sessions.
//!
//! One buffering session per stream: an external transcoder copies the live
//! feed into fixed-length segments, a monitor task tracks the segment files
//! and enforces the retention window, and seek requests are answered by
//! synthesizing a position playlist over the retained range.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TimeshiftConfig, TranscoderConfig};
use crate::error::{Error, Result};
use crate::manifest::{MediaPlaylist, PlaylistType};
use crate::process::{ProcessHandle, ProcessSupervisor};
use crate::segment::SegmentTracker;
use crate::session::{AvailableRange, Position, SessionStatus, SessionSummary, StreamSource};

/// A single stream's buffering session.
#[derive(Debug)]
pub struct TimeshiftSession {
    pub stream_id: u32,
    pub source_url: String,
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Distinguishes this session from earlier sessions of the same stream,
    /// so a deferred cleanup can never delete a restarted stream's buffer.
    generation: u64,
    started: Instant,
    segment_duration: Duration,
    max_retention: Duration,
    inner: Mutex<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    status: SessionStatus,
    process: Option<ProcessHandle>,
    tracker: SegmentTracker,
    /// Live-edge position frozen at stop or unexpected exit.
    frozen_end: Option<f64>,
}

impl TimeshiftSession {
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    pub fn pid(&self) -> Option<u32> {
        self.inner.lock().process.as_ref().and_then(|p| p.pid())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            stream_id: self.stream_id,
            source_url: self.source_url.clone(),
            status: self.status(),
            started_at: self.started_at,
            output_dir: self.dir.clone(),
        }
    }

    /// Current live-edge position and seekable window.
    pub fn position(&self) -> Position {
        let inner = self.inner.lock();
        self.position_locked(&inner)
    }

    fn position_locked(&self, inner: &SessionInner) -> Position {
        let elapsed = inner
            .frozen_end
            .unwrap_or_else(|| self.started.elapsed().as_secs_f64());
        let end = elapsed.min(self.max_retention.as_secs_f64());
        let start = inner
            .tracker
            .oldest()
            .map(|s| s.start_offset().as_secs_f64())
            .unwrap_or(0.0)
            .min(end);
        Position {
            position: end,
            available_range: AvailableRange { start, end },
        }
    }
}

/// Session registry for timeshift buffering.
///
/// Owned by the service and injected wherever sessions are started or
/// queried; there is no global state. Mutations to one session are
/// serialized by its entry lock, and no operation takes a cross-session
/// lock.
pub struct TimeshiftManager {
    timeshift: TimeshiftConfig,
    transcoder: TranscoderConfig,
    supervisor: ProcessSupervisor,
    sessions: Arc<DashMap<u32, Arc<TimeshiftSession>>>,
    next_generation: AtomicU64,
}

impl TimeshiftManager {
    pub fn new(config: &Config) -> Self {
        Self {
            timeshift: config.timeshift.clone(),
            transcoder: config.transcoder.clone(),
            supervisor: ProcessSupervisor::new(config.transcoder.binary.clone()),
            sessions: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Root directory holding all buffer directories.
    pub fn buffer_root(&self) -> &std::path::Path {
        &self.timeshift.buffer_root
    }

    /// Start buffering a stream, or return the existing live session.
    ///
    /// Idempotent: a second call while the session is initializing or active
    /// returns the same session unchanged and spawns nothing. A session in
    /// `stopped` or `error` is replaced by a fresh one (with a new
    /// generation, so the old session's deferred cleanup is disarmed).
    ///
    /// A spawn failure is recorded as a session in the `error` state and
    /// also returned to the caller.
    pub fn start(&self, source: StreamSource) -> Result<Arc<TimeshiftSession>> {
        if let Some(existing) = self.sessions.get(&source.id) {
            if existing.status().is_live() {
                debug!(stream_id = source.id, "Reusing live timeshift session");
                return Ok(Arc::clone(&existing));
            }
        }
        self.sessions
            .remove_if(&source.id, |_, s| !s.status().is_live());

        let dir = self
            .timeshift
            .buffer_root
            .join(format!("stream_{}", source.id));
        std::fs::create_dir_all(&dir)?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let args = buffering_args(
            &source.source_url,
            self.timeshift.segment_duration_secs,
            &self.timeshift.segment_extension,
        );

        let tracker = SegmentTracker::new(
            &dir,
            self.timeshift.segment_duration(),
            &self.timeshift.segment_extension,
        );

        let (status, process, spawn_err) = match self.supervisor.spawn(&args, &dir) {
            Ok(handle) => (SessionStatus::Initializing, Some(handle), None),
            Err(e) => {
                error!(stream_id = source.id, error = %e, "Transcoder spawn failed");
                (SessionStatus::Error, None, Some(e))
            }
        };

        let session = Arc::new(TimeshiftSession {
            stream_id: source.id,
            source_url: source.source_url,
            dir,
            started_at: Utc::now(),
            generation,
            started: Instant::now(),
            segment_duration: self.timeshift.segment_duration(),
            max_retention: self.timeshift.retention(),
            inner: Mutex::new(SessionInner {
                status,
                process,
                tracker,
                frozen_end: None,
            }),
        });

        self.sessions.insert(source.id, Arc::clone(&session));

        if let Some(e) = spawn_err {
            return Err(e);
        }

        info!(
            stream_id = session.stream_id,
            dir = ?session.dir,
            "Started timeshift session"
        );
        self.spawn_monitor(Arc::clone(&session));
        Ok(session)
    }

    /// Current position and available range for a stream.
    pub fn get_position(&self, stream_id: u32) -> Result<Position> {
        Ok(self.get_session(stream_id)?.position())
    }

    /// Synthesize a position playlist starting at `target` seconds.
    ///
    /// Validates the target against the available range and writes
    /// `playlist_<position>.m3u8` into the session's buffer directory,
    /// listing exactly the retained segments from the first segment whose
    /// window contains or follows the target.
    pub fn seek(&self, stream_id: u32, target: f64) -> Result<PathBuf> {
        let session = self.get_session(stream_id)?;
        let inner = session.inner.lock();

        let range = session.position_locked(&inner).available_range;
        if !range.contains(target) {
            return Err(Error::OutOfRangeSeek {
                requested: target,
                start: range.start,
                end: range.end,
            });
        }

        // First segment whose window contains or follows the target,
        // clamped to the retained range so a live-edge seek that lands on a
        // segment boundary still lists the newest segment.
        let seg_secs = session.segment_duration.as_secs_f64();
        let low = inner.tracker.oldest().map(|s| s.index).unwrap_or(0);
        let high = inner.tracker.newest().map(|s| s.index).unwrap_or(0);
        let first = ((target / seg_secs).floor() as u64).clamp(low, high);

        let frozen = !inner.status.is_live();
        let mut playlist = MediaPlaylist::event(session.segment_duration.as_secs() as u32);
        playlist.media_sequence = first;
        if frozen {
            playlist.playlist_type = PlaylistType::Vod;
            playlist.ended = true;
        }
        for segment in inner.tracker.segments_from(first) {
            playlist.add_segment(seg_secs, segment.file_name());
        }

        let path = session
            .dir
            .join(format!("playlist_{}.m3u8", target.floor() as u64));
        std::fs::write(&path, playlist.render()).map_err(|source| Error::ManifestWrite {
            path: path.clone(),
            source,
        })?;

        debug!(stream_id, target, first_segment = first, "Seek playlist written");
        Ok(path)
    }

    /// Seek to the beginning of the programme (playback time 0).
    pub fn watch_from_start(&self, stream_id: u32) -> Result<PathBuf> {
        self.seek(stream_id, 0.0)
    }

    /// Jump to the live edge.
    pub fn go_live(&self, stream_id: u32) -> Result<PathBuf> {
        let end = self.get_position(stream_id)?.available_range.end;
        self.seek(stream_id, end)
    }

    /// Stop a session: two-phase process termination plus delayed directory
    /// cleanup.
    ///
    /// Returns as soon as the termination signal has been dispatched; the
    /// grace-period countdown and the directory removal run as scheduled
    /// tasks. The session stays queryable (with a frozen live edge) until
    /// the cleanup grace period elapses.
    pub fn stop(&self, stream_id: u32) -> Result<()> {
        let session = self.get_session(stream_id)?;

        let handle = {
            let mut inner = session.inner.lock();
            if !inner.status.is_live() {
                return Ok(());
            }
            let end = session
                .started
                .elapsed()
                .as_secs_f64()
                .min(session.max_retention.as_secs_f64());
            inner.frozen_end = Some(end);
            inner.status = SessionStatus::Stopped;
            inner.process.take()
        };

        if let Some(mut handle) = handle {
            let grace = self.transcoder.termination_grace();
            tokio::spawn(async move {
                if let Err(e) = handle.terminate(grace).await {
                    warn!(stream_id, error = %e, "Transcoder termination failed");
                }
            });
        }

        schedule_cleanup(
            Arc::clone(&self.sessions),
            stream_id,
            session.generation,
            session.dir.clone(),
            self.timeshift.cleanup_grace(),
        );

        info!(stream_id, "Timeshift session stopped");
        Ok(())
    }

    pub fn get_session(&self, stream_id: u32) -> Result<Arc<TimeshiftSession>> {
        self.sessions
            .get(&stream_id)
            .map(|s| Arc::clone(&s))
            .ok_or(Error::SessionNotFound(stream_id))
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|e| e.summary()).collect()
    }

    /// Per-session monitor loop: poll for new segments, enforce the
    /// retention window, and watch the process for exits. Errors in one
    /// iteration are logged and the loop continues on the next poll.
    fn spawn_monitor(&self, session: Arc<TimeshiftSession>) {
        let poll = self.timeshift.poll_interval();
        let retention = self.timeshift.retention();
        let sessions = Arc::clone(&self.sessions);
        let cleanup_grace = self.timeshift.cleanup_grace();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                let exited = {
                    let mut inner = session.inner.lock();
                    if !inner.status.is_live() {
                        break;
                    }

                    match inner.tracker.scan() {
                        Ok(new) => {
                            if !new.is_empty() && inner.status == SessionStatus::Initializing {
                                inner.status = SessionStatus::Active;
                                info!(
                                    stream_id = session.stream_id,
                                    "Timeshift session active"
                                );
                            }
                        }
                        Err(e) => {
                            warn!(stream_id = session.stream_id, error = %e, "Segment scan failed");
                        }
                    }

                    inner.tracker.evict(retention);

                    let exit = inner
                        .process
                        .as_mut()
                        .and_then(|p| p.poll_exit().ok().flatten());
                    match exit {
                        Some(exit) if exit.unexpected => {
                            inner.process = None;
                            if inner.status == SessionStatus::Active {
                                // An exited encoder means the feed ended.
                                let end = session
                                    .started
                                    .elapsed()
                                    .as_secs_f64()
                                    .min(session.max_retention.as_secs_f64());
                                inner.frozen_end = Some(end);
                                inner.status = SessionStatus::Stopped;
                                warn!(
                                    stream_id = session.stream_id,
                                    code = ?exit.code,
                                    "Transcoder exited unexpectedly, session stopped"
                                );
                            } else {
                                inner.status = SessionStatus::Error;
                                error!(
                                    stream_id = session.stream_id,
                                    code = ?exit.code,
                                    "Transcoder exited before producing output"
                                );
                            }
                            true
                        }
                        _ => false,
                    }
                };

                if exited {
                    schedule_cleanup(
                        Arc::clone(&sessions),
                        session.stream_id,
                        session.generation,
                        session.dir.clone(),
                        cleanup_grace,
                    );
                    break;
                }
            }

            debug!(stream_id = session.stream_id, "Monitor loop ended");
        });
    }
}

/// Remove the session entry and its buffer directory after `delay`.
///
/// The removal is keyed by generation: if the stream was restarted in the
/// meantime (a new session under the same id), the old timer finds a
/// different generation and does nothing.
fn schedule_cleanup(
    sessions: Arc<DashMap<u32, Arc<TimeshiftSession>>>,
    stream_id: u32,
    generation: u64,
    dir: PathBuf,
    delay: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let removed = sessions.remove_if(&stream_id, |_, s| {
            s.generation == generation && !s.status().is_live()
        });
        if removed.is_none() {
            debug!(stream_id, generation, "Cleanup timer superseded, skipping");
            return;
        }

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => info!(stream_id, dir = ?dir, "Removed buffer directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(stream_id, dir = ?dir, error = %e, "Failed to remove buffer directory"),
        }
    });
}

/// Transcoder arguments for a buffering task: copy the feed into an
/// unbounded segmented playlist. The retention window is enforced by the
/// tracker on disk, not by the playlist length.
fn buffering_args(source_url: &str, segment_duration_secs: u64, extension: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        source_url,
        "-c",
        "copy",
        "-f",
        "hls",
        "-hls_time",
        &segment_duration_secs.to_string(),
        "-hls_list_size",
        "0",
        "-hls_segment_filename",
        &format!("segment_%d.{}", extension),
        "playlist.m3u8",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
