//! Stale output-directory sweep.
//!
//! Sessions that crash or are killed without a normal stop leave their
//! `stream_<id>` directories behind with no cleanup timer pointed at them.
//! The sweep walks the buffer and ABR roots on an interval and deletes any
//! stream directory whose contents have not changed for longer than the
//! configured maximum age. Directories belonging to live sessions keep
//! receiving segments, so their modification times stay fresh and they are
//! never touched.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;

/// Spawn the periodic sweep over the given root directories.
///
/// Returns without spawning when the sweep is disabled.
pub fn start_stale_dir_sweep(config: SweepConfig, roots: Vec<std::path::PathBuf>) {
    if !config.enabled {
        debug!("Stale directory sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            for root in &roots {
                if let Err(e) = sweep_once(root, config.max_age()) {
                    warn!(root = ?root, error = %e, "Stale directory sweep failed");
                }
            }
        }
    });
}

/// Delete every `stream_*` directory under `root` older than `max_age`.
///
/// Returns the number of directories removed. A missing root is not an
/// error; the first session creates it.
pub fn sweep_once(root: &Path, max_age: Duration) -> std::io::Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let is_stream_dir = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with("stream_"));
        if !is_stream_dir {
            continue;
        }

        let age = match newest_mtime(&path) {
            Ok(mtime) => now.duration_since(mtime).unwrap_or(Duration::ZERO),
            Err(e) => {
                warn!(dir = ?path, error = %e, "Could not determine directory age");
                continue;
            }
        };

        if age > max_age {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(dir = ?path, age_secs = age.as_secs(), "Removed stale stream directory");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(dir = ?path, error = %e, "Failed to remove stale directory"),
            }
        }
    }

    Ok(removed)
}

/// Most recent modification time of a directory or anything directly in it.
///
/// Live sessions append segments, so one level deep is enough to tell a
/// fresh buffer from an abandoned one (variant subdirectories get their own
/// mtime bump when segments land in them).
fn newest_mtime(dir: &Path) -> std::io::Result<SystemTime> {
    let mut newest = std::fs::metadata(dir)?.modified()?;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            if modified > newest {
                newest = modified;
            }
        }
    }
    Ok(newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_removes_old_stream_dirs() {
        let root = TempDir::new().unwrap();
        let stale = root.path().join("stream_7");
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("segment_0.ts"), b"x").unwrap();

        // max_age zero makes everything stale.
        let removed = sweep_once(root.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }

    #[test]
    fn test_sweep_keeps_fresh_dirs() {
        let root = TempDir::new().unwrap();
        let fresh = root.path().join("stream_7");
        std::fs::create_dir(&fresh).unwrap();
        std::fs::write(fresh.join("segment_0.ts"), b"x").unwrap();

        let removed = sweep_once(root.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_ignores_unrelated_entries() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("lost+found")).unwrap();
        std::fs::write(root.path().join("stream_1"), b"a plain file").unwrap();

        let removed = sweep_once(root.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 0);
        assert!(root.path().join("lost+found").exists());
    }

    #[test]
    fn test_sweep_missing_root_is_ok() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("nope");
        assert_eq!(sweep_once(&missing, Duration::ZERO).unwrap(), 0);
    }
}
