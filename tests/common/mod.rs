//! Shared harness for session-manager integration tests.
//!
//! Stands in a shell script for the real transcoder so tests exercise the
//! full spawn / scan / terminate path without ffmpeg. The script runs with
//! the session's output directory as its working directory, exactly like
//! the real binary, so it writes segments with relative paths.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use streamvault::config::Config;

pub struct TestHarness {
    /// Holds the buffer root, ABR root, and fake transcoder script.
    pub dir: TempDir,
    pub config: Config,
}

impl TestHarness {
    /// Harness with short intervals so tests settle in a few seconds:
    /// 2s segments, 1s polls, 1s termination grace, long cleanup grace so
    /// directories survive until assertions run.
    pub fn with_transcoder_script(script: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let binary = write_script(dir.path(), script);

        let mut config = Config::default();
        config.transcoder.binary = binary.to_string_lossy().into_owned();
        config.transcoder.termination_grace_secs = 1;
        config.timeshift.buffer_root = dir.path().join("buffer");
        config.timeshift.segment_duration_secs = 2;
        config.timeshift.poll_interval_secs = 1;
        config.timeshift.retention_secs = 60;
        config.timeshift.cleanup_grace_secs = 3600;
        config.abr.output_root = dir.path().join("abr");
        config.abr.segment_duration_secs = 2;
        config.abr.poll_interval_secs = 1;
        config.abr.cleanup_grace_secs = 3600;
        config.sweep.enabled = false;

        Self { dir, config }
    }
}

fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-transcoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Poll `check` every 100ms until it passes or `secs` seconds elapse.
pub async fn wait_for(secs: u64, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    loop {
        if check() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {secs}s"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
