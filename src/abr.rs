//! Adaptive-bitrate transcode sessions.
//!
//! One multi-output encode process per stream produces a segmented
//! sub-playlist per quality variant; the session becomes active (and the
//! master manifest is published) only once every enabled variant has its
//! first segment on disk. Bandwidth figures in the master manifest are
//! derived from configured bitrates, an advertised ceiling rather than a
//! measurement.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::{AbrConfig, Config, TranscoderConfig};
use crate::error::{Error, Result};
use crate::manifest::{MasterPlaylist, VariantStream};
use crate::process::{ProcessHandle, ProcessSupervisor};
use crate::segment::SegmentTracker;
use crate::session::{SessionStatus, SessionSummary, StreamSource};

/// One rung of the quality ladder.
///
/// Immutable for the session's lifetime. Disabling a variant removes it
/// from the master manifest but does not stop its underlying encode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityVariant {
    pub id: u32,
    /// Human label, also used as the variant's subdirectory name.
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in transcoder notation, e.g. "5000k".
    pub video_bitrate: String,
    /// Target audio bitrate, e.g. "192k".
    pub audio_bitrate: String,
    pub enabled: bool,
}

impl QualityVariant {
    /// Advertised bandwidth: `(video_bits + audio_bits) / 8`.
    ///
    /// Unparseable bitrates contribute 0; `start` validates them up front.
    pub fn bandwidth(&self) -> u64 {
        let video = parse_bitrate(&self.video_bitrate).unwrap_or(0);
        let audio = parse_bitrate(&self.audio_bitrate).unwrap_or(0);
        (video + audio) / 8
    }

    /// Relative URI of this variant's sub-playlist.
    pub fn playlist_uri(&self) -> String {
        format!("{}/playlist.m3u8", self.label)
    }
}

/// Parse a transcoder-style bitrate ("5000k", "2M", "800000") into bits/s.
pub fn parse_bitrate(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, multiplier) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1_000),
        Some('m') | Some('M') => (&s[..s.len() - 1], 1_000_000),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * multiplier)
}

/// Built-in 4-rung ladder used when a session is started without an
/// explicit variant list.
pub fn default_ladder() -> Vec<QualityVariant> {
    vec![
        QualityVariant {
            id: 1,
            label: "1080p".to_string(),
            width: 1920,
            height: 1080,
            video_bitrate: "5000k".to_string(),
            audio_bitrate: "192k".to_string(),
            enabled: true,
        },
        QualityVariant {
            id: 2,
            label: "720p".to_string(),
            width: 1280,
            height: 720,
            video_bitrate: "2800k".to_string(),
            audio_bitrate: "128k".to_string(),
            enabled: true,
        },
        QualityVariant {
            id: 3,
            label: "480p".to_string(),
            width: 854,
            height: 480,
            video_bitrate: "1400k".to_string(),
            audio_bitrate: "128k".to_string(),
            enabled: true,
        },
        QualityVariant {
            id: 4,
            label: "360p".to_string(),
            width: 640,
            height: 360,
            video_bitrate: "800k".to_string(),
            audio_bitrate: "96k".to_string(),
            enabled: true,
        },
    ]
}

/// Render the master manifest for a variant set. Pure function: one
/// stream-reference entry per enabled variant, with derived bandwidth and
/// a relative sub-playlist URI.
pub fn generate_master_manifest(variants: &[QualityVariant]) -> String {
    let mut master = MasterPlaylist::new();
    for variant in variants.iter().filter(|v| v.enabled) {
        master = master.add_variant(VariantStream {
            name: variant.label.clone(),
            bandwidth: variant.bandwidth(),
            width: variant.width,
            height: variant.height,
            uri: variant.playlist_uri(),
        });
    }
    master.render()
}

/// A single stream's multi-variant transcode session.
#[derive(Debug)]
pub struct AbrSession {
    pub stream_id: u32,
    pub source_url: String,
    pub dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub variants: Vec<QualityVariant>,
    generation: u64,
    inner: Mutex<AbrInner>,
}

#[derive(Debug)]
struct AbrInner {
    status: SessionStatus,
    process: Option<ProcessHandle>,
    /// One tracker per variant subdirectory, in `variants` order.
    trackers: Vec<SegmentTracker>,
    master_written: bool,
}

impl AbrSession {
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

    /// Path of the master manifest, once it has been published.
    pub fn master_manifest_path(&self) -> Option<PathBuf> {
        if self.inner.lock().master_written {
            Some(self.dir.join("master.m3u8"))
        } else {
            None
        }
    }
}

/// Session registry for ABR transcoding. Injected, never global; same
/// per-entry locking discipline as the timeshift registry.
pub struct AbrManager {
    abr: AbrConfig,
    transcoder: TranscoderConfig,
    supervisor: ProcessSupervisor,
    sessions: Arc<DashMap<u32, Arc<AbrSession>>>,
    next_generation: AtomicU64,
}

impl AbrManager {
    pub fn new(config: &Config) -> Self {
        Self {
            abr: config.abr.clone(),
            transcoder: config.transcoder.clone(),
            supervisor: ProcessSupervisor::new(config.transcoder.binary.clone()),
            sessions: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Root directory holding all ABR session trees.
    pub fn output_root(&self) -> &std::path::Path {
        &self.abr.output_root
    }

    /// Start an ABR session, or return the existing live one.
    ///
    /// `variants: None` instantiates the built-in ladder. Idempotency and
    /// spawn-failure semantics match the timeshift manager.
    pub fn start(
        &self,
        source: StreamSource,
        variants: Option<Vec<QualityVariant>>,
    ) -> Result<Arc<AbrSession>> {
        if let Some(existing) = self.sessions.get(&source.id) {
            if existing.status().is_live() {
                debug!(stream_id = source.id, "Reusing live ABR session");
                return Ok(Arc::clone(&existing));
            }
        }
        self.sessions
            .remove_if(&source.id, |_, s| !s.status().is_live());

        let variants = variants.unwrap_or_else(default_ladder);
        if !variants.iter().any(|v| v.enabled) {
            return Err(Error::NoEnabledVariants(source.id));
        }
        for variant in &variants {
            if parse_bitrate(&variant.video_bitrate).is_none() {
                return Err(Error::InvalidBitrate(variant.video_bitrate.clone()));
            }
            if parse_bitrate(&variant.audio_bitrate).is_none() {
                return Err(Error::InvalidBitrate(variant.audio_bitrate.clone()));
            }
        }

        let dir = self.abr.output_root.join(format!("stream_{}", source.id));
        let mut trackers = Vec::with_capacity(variants.len());
        for variant in &variants {
            let subdir = dir.join(&variant.label);
            std::fs::create_dir_all(&subdir)?;
            trackers.push(SegmentTracker::new(
                subdir,
                self.abr.segment_duration(),
                &self.abr.segment_extension,
            ));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let args = encode_args(
            &source.source_url,
            &variants,
            self.abr.segment_duration_secs,
            &self.abr.segment_extension,
        );

        let (status, process, spawn_err) = match self.supervisor.spawn(&args, &dir) {
            Ok(handle) => (SessionStatus::Initializing, Some(handle), None),
            Err(e) => {
                error!(stream_id = source.id, error = %e, "Encoder spawn failed");
                (SessionStatus::Error, None, Some(e))
            }
        };

        let session = Arc::new(AbrSession {
            stream_id: source.id,
            source_url: source.source_url,
            dir,
            started_at: Utc::now(),
            variants,
            generation,
            inner: Mutex::new(AbrInner {
                status,
                process,
                trackers,
                master_written: false,
            }),
        });

        self.sessions.insert(source.id, Arc::clone(&session));

        if let Some(e) = spawn_err {
            return Err(e);
        }

        info!(
            stream_id = session.stream_id,
            variants = session.variants.len(),
            dir = ?session.dir,
            "Started ABR session"
        );
        self.spawn_monitor(Arc::clone(&session));
        Ok(session)
    }

    /// The session's variant set (enabled and disabled).
    pub fn get_variants(&self, stream_id: u32) -> Result<Vec<QualityVariant>> {
        Ok(self.get_session(stream_id)?.variants.clone())
    }

    /// Path of the master manifest, `None` until every enabled variant has
    /// produced its first segment.
    pub fn master_manifest_path(&self, stream_id: u32) -> Result<Option<PathBuf>> {
        Ok(self.get_session(stream_id)?.master_manifest_path())
    }

    /// Stop a session; termination and delayed cleanup semantics match the
    /// timeshift manager.
    pub fn stop(&self, stream_id: u32) -> Result<()> {
        let session = self.get_session(stream_id)?;

        let handle = {
            let mut inner = session.inner.lock();
            if !inner.status.is_live() {
                return Ok(());
            }
            inner.status = SessionStatus::Stopped;
            inner.process.take()
        };

        if let Some(mut handle) = handle {
            let grace = self.transcoder.termination_grace();
            tokio::spawn(async move {
                if let Err(e) = handle.terminate(grace).await {
                    warn!(stream_id, error = %e, "Encoder termination failed");
                }
            });
        }

        schedule_cleanup(
            Arc::clone(&self.sessions),
            stream_id,
            session.generation,
            session.dir.clone(),
            self.abr.cleanup_grace(),
        );

        info!(stream_id, "ABR session stopped");
        Ok(())
    }

    pub fn get_session(&self, stream_id: u32) -> Result<Arc<AbrSession>> {
        self.sessions
            .get(&stream_id)
            .map(|s| Arc::clone(&s))
            .ok_or(Error::SessionNotFound(stream_id))
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(|e| e.summary()).collect()
    }

    /// Per-session monitor: scan every variant subdirectory, publish the
    /// master manifest once all enabled variants have output, and watch the
    /// encode process for exits.
    fn spawn_monitor(&self, session: Arc<AbrSession>) {
        let poll = self.abr.poll_interval();
        let sessions = Arc::clone(&self.sessions);
        let cleanup_grace = self.abr.cleanup_grace();

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

                    for tracker in inner.trackers.iter_mut() {
                        if let Err(e) = tracker.scan() {
                            warn!(
                                stream_id = session.stream_id,
                                dir = ?tracker.dir(),
                                error = %e,
                                "Variant scan failed"
                            );
                        }
                    }

                    if inner.status == SessionStatus::Initializing {
                        let all_ready = session
                            .variants
                            .iter()
                            .zip(inner.trackers.iter())
                            .filter(|(v, _)| v.enabled)
                            .all(|(_, t)| !t.is_empty());
                        if all_ready {
                            match write_master(&session) {
                                Ok(path) => {
                                    inner.master_written = true;
                                    inner.status = SessionStatus::Active;
                                    info!(
                                        stream_id = session.stream_id,
                                        master = ?path,
                                        "ABR session active, master manifest published"
                                    );
                                }
                                Err(e) => {
                                    warn!(
                                        stream_id = session.stream_id,
                                        error = %e,
                                        "Failed to write master manifest, retrying"
                                    );
                                }
                            }
                        }
                    }

                    let exit = inner
                        .process
                        .as_mut()
                        .and_then(|p| p.poll_exit().ok().flatten());
                    match exit {
                        Some(exit) if exit.unexpected => {
                            inner.process = None;
                            if inner.status == SessionStatus::Active {
                                inner.status = SessionStatus::Stopped;
                                warn!(
                                    stream_id = session.stream_id,
                                    code = ?exit.code,
                                    "Encoder exited unexpectedly, session stopped"
                                );
                            } else {
                                inner.status = SessionStatus::Error;
                                error!(
                                    stream_id = session.stream_id,
                                    code = ?exit.code,
                                    "Encoder exited before producing output"
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

fn write_master(session: &AbrSession) -> Result<PathBuf> {
    let path = session.dir.join("master.m3u8");
    let m3u8 = generate_master_manifest(&session.variants);
    std::fs::write(&path, m3u8).map_err(|source| Error::ManifestWrite {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Generation-keyed deferred removal, identical in shape to the timeshift
/// cleanup timer.
fn schedule_cleanup(
    sessions: Arc<DashMap<u32, Arc<AbrSession>>>,
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
            Ok(()) => info!(stream_id, dir = ?dir, "Removed ABR output directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(stream_id, dir = ?dir, error = %e, "Failed to remove ABR output directory"),
        }
    });
}

/// Arguments for the single multi-output encode process.
///
/// Every supplied variant gets a mapped output, enabled or not; disabling
/// only affects the master manifest. Sub-playlists and segments land in
/// per-variant subdirectories via the `%v` stream placeholder.
fn encode_args(
    source_url: &str,
    variants: &[QualityVariant],
    segment_duration_secs: u64,
    extension: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        source_url.into(),
    ];

    for _ in variants {
        args.extend(["-map".into(), "0:v:0".into(), "-map".into(), "0:a:0".into()]);
    }

    for (i, variant) in variants.iter().enumerate() {
        args.extend([
            format!("-c:v:{}", i),
            "libx264".into(),
            format!("-b:v:{}", i),
            variant.video_bitrate.clone(),
            format!("-s:v:{}", i),
            format!("{}x{}", variant.width, variant.height),
            format!("-c:a:{}", i),
            "aac".into(),
            format!("-b:a:{}", i),
            variant.audio_bitrate.clone(),
        ]);
    }

    let stream_map = variants
        .iter()
        .enumerate()
        .map(|(i, v)| format!("v:{},a:{},name:{}", i, i, v.label))
        .collect::<Vec<_>>()
        .join(" ");

    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        segment_duration_secs.to_string(),
        "-hls_list_size".into(),
        "0".into(),
        "-var_stream_map".into(),
        stream_map,
        "-hls_segment_filename".into(),
        format!("%v/segment_%d.{}", extension),
        "%v/playlist.m3u8".into(),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(label: &str, video: &str, audio: &str, enabled: bool) -> QualityVariant {
        QualityVariant {
            id: 0,
            label: label.to_string(),
            width: 1920,
            height: 1080,
            video_bitrate: video.to_string(),
            audio_bitrate: audio.to_string(),
            enabled,
        }
    }

    #[test]
    fn test_parse_bitrate() {
        assert_eq!(parse_bitrate("5000k"), Some(5_000_000));
        assert_eq!(parse_bitrate("192K"), Some(192_000));
        assert_eq!(parse_bitrate("2M"), Some(2_000_000));
        assert_eq!(parse_bitrate("800000"), Some(800_000));
        assert_eq!(parse_bitrate(""), None);
        assert_eq!(parse_bitrate("fast"), None);
    }

    #[test]
    fn test_bandwidth_derivation() {
        let v = variant("1080p", "5000k", "192k", true);
        assert_eq!(v.bandwidth(), (5_000_000 + 192_000) / 8);
        assert_eq!(v.bandwidth(), 649_000);
    }

    #[test]
    fn test_default_ladder_shape() {
        let ladder = default_ladder();
        assert_eq!(ladder.len(), 4);
        assert!(ladder.iter().all(|v| v.enabled));
        // Rungs are ordered high to low.
        for pair in ladder.windows(2) {
            assert!(pair[0].bandwidth() > pair[1].bandwidth());
        }
    }

    #[test]
    fn test_master_manifest_skips_disabled() {
        let mut variants = default_ladder();
        variants.push(variant("prev", "600k", "64k", false));

        let m3u8 = generate_master_manifest(&variants);
        assert_eq!(m3u8.matches("#EXT-X-STREAM-INF").count(), 4);
        assert!(!m3u8.contains("prev/playlist.m3u8"));
        assert!(m3u8.contains("1080p/playlist.m3u8"));
        assert!(m3u8.contains("BANDWIDTH=649000"));
        assert!(m3u8.contains("RESOLUTION=1920x1080"));
    }

    #[test]
    fn test_encode_args_stream_map() {
        let variants = vec![
            variant("1080p", "5000k", "192k", true),
            variant("720p", "2800k", "128k", true),
        ];
        let args = encode_args("http://example.com/feed", &variants, 10, "ts");

        let pos = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert_eq!(args[pos + 1], "v:0,a:0,name:1080p v:1,a:1,name:720p");

        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 4);
        assert!(args.contains(&"-b:v:1".to_string()));
        assert!(args.contains(&"2800k".to_string()));
        assert!(args.contains(&"%v/segment_%d.ts".to_string()));
        assert_eq!(args.last().unwrap(), "%v/playlist.m3u8");
    }

    #[test]
    fn test_encode_args_include_disabled_variants() {
        // Disabling a variant removes it from the master manifest only; the
        // encode command still carries it.
        let variants = vec![
            variant("1080p", "5000k", "192k", true),
            variant("720p", "2800k", "128k", false),
        ];
        let args = encode_args("udp://239.0.0.1:1234", &variants, 10, "ts");
        let map = args[args.iter().position(|a| a == "-var_stream_map").unwrap() + 1].clone();
        assert!(map.contains("name:720p"));
    }
}
