//! Timeshift session integration tests.
//!
//! Drive the manager end to end against a fake transcoder shell script.

#![cfg(unix)]

mod common;

use common::{wait_for, TestHarness};

use streamvault::error::Error;
use streamvault::session::{SessionStatus, StreamSource};
use streamvault::timeshift::TimeshiftManager;

use assert_matches::assert_matches;

/// Writes one segment per second, then idles like a healthy transcoder.
const STEADY_FEED: &str = r#"
i=0
while [ $i -lt 5 ]; do
    echo data > segment_$i.ts
    i=$((i+1))
    sleep 1
done
sleep 60
"#;

#[tokio::test]
async fn session_becomes_active_and_seekable() {
    let h = TestHarness::with_transcoder_script(STEADY_FEED);
    let manager = TimeshiftManager::new(&h.config);

    let session = manager
        .start(StreamSource::new(1, "udp://239.0.0.1:1234"))
        .unwrap();
    assert_eq!(session.status(), SessionStatus::Initializing);

    wait_for(10, || session.status() == SessionStatus::Active).await;

    let playlist = manager.watch_from_start(1).unwrap();
    let m3u8 = std::fs::read_to_string(&playlist).unwrap();
    assert!(m3u8.starts_with("#EXTM3U"));
    assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:0"));
    assert!(m3u8.contains("segment_0.ts"));

    manager.stop(1).unwrap();
}

#[tokio::test]
async fn start_is_idempotent_for_live_sessions() {
    // Each spawn appends a line, so the file doubles as a spawn counter.
    let h = TestHarness::with_transcoder_script(concat!(
        "echo spawned >> spawns.txt\n",
        "echo data > segment_0.ts\n",
        "sleep 60\n",
    ));
    let manager = TimeshiftManager::new(&h.config);

    let first = manager.start(StreamSource::new(1, "udp://feed")).unwrap();
    let second = manager.start(StreamSource::new(1, "udp://feed")).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    wait_for(10, || first.status() == SessionStatus::Active).await;

    let spawns =
        std::fs::read_to_string(h.config.timeshift.buffer_root.join("stream_1/spawns.txt"))
            .unwrap();
    assert_eq!(spawns.lines().count(), 1);

    manager.stop(1).unwrap();
}

#[tokio::test]
async fn stop_freezes_the_available_range() {
    let h = TestHarness::with_transcoder_script(STEADY_FEED);
    let manager = TimeshiftManager::new(&h.config);

    let session = manager.start(StreamSource::new(1, "udp://feed")).unwrap();
    wait_for(10, || session.status() == SessionStatus::Active).await;

    manager.stop(1).unwrap();
    assert_eq!(session.status(), SessionStatus::Stopped);

    // The range no longer advances with wall-clock time.
    let frozen = manager.get_position(1).unwrap().available_range;
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    let later = manager.get_position(1).unwrap().available_range;
    assert_eq!(frozen.end, later.end);

    // Seeking a stopped session yields a closed playlist.
    let playlist = manager.seek(1, frozen.start).unwrap();
    let m3u8 = std::fs::read_to_string(&playlist).unwrap();
    assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
    assert!(m3u8.contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn feed_death_stops_but_keeps_the_buffer() {
    let h = TestHarness::with_transcoder_script(concat!(
        "echo data > segment_0.ts\n",
        "echo data > segment_1.ts\n",
        "sleep 2\n",
        "exit 1\n",
    ));
    let manager = TimeshiftManager::new(&h.config);

    let session = manager.start(StreamSource::new(1, "udp://feed")).unwrap();
    wait_for(10, || session.status() == SessionStatus::Stopped).await;

    // Buffered content stays watchable after the feed dies.
    let position = manager.get_position(1).unwrap();
    assert!(position.available_range.end > 0.0);
    let playlist = manager.seek(1, position.available_range.start).unwrap();
    assert!(std::fs::read_to_string(&playlist)
        .unwrap()
        .contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn failed_spawn_leaves_error_session() {
    let h = TestHarness::with_transcoder_script("exit 0");
    let mut config = h.config.clone();
    config.transcoder.binary = "definitely-not-a-real-transcoder".to_string();
    let manager = TimeshiftManager::new(&config);

    let result = manager.start(StreamSource::new(9, "udp://feed"));
    assert_matches!(result, Err(Error::Spawn { .. }));

    let session = manager.get_session(9).unwrap();
    assert_eq!(session.status(), SessionStatus::Error);
}

#[tokio::test]
async fn unknown_stream_is_reported() {
    let h = TestHarness::with_transcoder_script("sleep 60");
    let manager = TimeshiftManager::new(&h.config);

    assert_matches!(manager.get_position(42), Err(Error::SessionNotFound(42)));
    assert_matches!(manager.seek(42, 0.0), Err(Error::SessionNotFound(42)));
}
