//! HLS playlist generation.
//!
//! Pure, stateless translation of segment and variant metadata into playlist
//! text. Playlists are regenerated whole on demand, never patched, so they
//! are always consistent with the session state at generation time.

use std::fmt::Write;

/// Playlist type tag emitted as `#EXT-X-PLAYLIST-TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    /// Growing playlist; segments are appended but never removed from the
    /// player's view. Used for position playlists over a live buffer.
    Event,
    /// Complete, immutable playlist. Used once a session has stopped.
    Vod,
}

/// A segment entry in a media playlist.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    /// Duration in seconds.
    pub duration: f64,
    /// Segment URI, relative to the playlist location.
    pub uri: String,
}

/// Media playlist for a single rendition or a timeshift position.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    /// Target segment duration in seconds.
    pub target_duration: u32,
    /// Index of the first segment listed.
    pub media_sequence: u64,
    pub playlist_type: PlaylistType,
    /// Ordered segment entries.
    pub segments: Vec<SegmentEntry>,
    /// Whether to emit `#EXT-X-ENDLIST` (frozen sessions only).
    pub ended: bool,
}

impl MediaPlaylist {
    /// Create an open-ended event playlist.
    pub fn event(target_duration: u32) -> Self {
        Self {
            target_duration,
            media_sequence: 0,
            playlist_type: PlaylistType::Event,
            segments: Vec::new(),
            ended: false,
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: impl Into<String>) {
        self.segments.push(SegmentEntry {
            duration,
            uri: uri.into(),
        });
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration).unwrap();
        writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();

        match self.playlist_type {
            PlaylistType::Event => writeln!(out, "#EXT-X-PLAYLIST-TYPE:EVENT").unwrap(),
            PlaylistType::Vod => writeln!(out, "#EXT-X-PLAYLIST-TYPE:VOD").unwrap(),
        }

        for segment in &self.segments {
            writeln!(out, "#EXTINF:{:.6},", segment.duration).unwrap();
            writeln!(out, "{}", segment.uri).unwrap();
        }

        if self.ended {
            writeln!(out, "#EXT-X-ENDLIST").unwrap();
        }

        out
    }
}

/// One quality rung advertised by a master playlist.
#[derive(Debug, Clone)]
pub struct VariantStream {
    /// Human label, also used as the variant subdirectory name.
    pub name: String,
    /// Advertised bandwidth ceiling, derived from configured bitrates.
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    /// Sub-playlist URI, relative to the master playlist.
    pub uri: String,
}

/// Master playlist listing all enabled variants of an ABR session.
#[derive(Debug, Clone, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variant entry.
    pub fn add_variant(mut self, variant: VariantStream) -> Self {
        self.variants.push(variant);
        self
    }

    /// Render to M3U8 string.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "#EXTM3U").unwrap();
        writeln!(out, "#EXT-X-VERSION:3").unwrap();

        for variant in &self.variants {
            writeln!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},NAME=\"{}\"",
                variant.bandwidth, variant.width, variant.height, variant.name
            )
            .unwrap();
            writeln!(out, "{}", variant.uri).unwrap();
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_playlist_render() {
        let mut playlist = MediaPlaylist::event(10);
        playlist.media_sequence = 3;
        playlist.add_segment(10.0, "segment_3.ts");
        playlist.add_segment(10.0, "segment_4.ts");

        let m3u8 = playlist.render();

        assert!(m3u8.contains("#EXTM3U"));
        assert!(m3u8.contains("#EXT-X-VERSION:3"));
        assert!(m3u8.contains("#EXT-X-TARGETDURATION:10"));
        assert!(m3u8.contains("#EXT-X-MEDIA-SEQUENCE:3"));
        assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:EVENT"));
        assert!(m3u8.contains("#EXTINF:10.000000,"));
        assert!(m3u8.contains("segment_3.ts"));
        assert!(!m3u8.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_ended_playlist_gets_endlist() {
        let mut playlist = MediaPlaylist::event(10);
        playlist.playlist_type = PlaylistType::Vod;
        playlist.ended = true;
        playlist.add_segment(10.0, "segment_0.ts");

        let m3u8 = playlist.render();
        assert!(m3u8.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(m3u8.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_master_playlist_render() {
        let master = MasterPlaylist::new()
            .add_variant(VariantStream {
                name: "1080p".to_string(),
                bandwidth: 649_000,
                width: 1920,
                height: 1080,
                uri: "1080p/playlist.m3u8".to_string(),
            })
            .add_variant(VariantStream {
                name: "720p".to_string(),
                bandwidth: 366_000,
                width: 1280,
                height: 720,
                uri: "720p/playlist.m3u8".to_string(),
            });

        let m3u8 = master.render();

        assert!(m3u8.contains("#EXTM3U"));
        assert!(m3u8.contains("BANDWIDTH=649000"));
        assert!(m3u8.contains("RESOLUTION=1920x1080"));
        assert!(m3u8.contains("NAME=\"1080p\""));
        assert!(m3u8.contains("1080p/playlist.m3u8"));
        assert_eq!(m3u8.matches("#EXT-X-STREAM-INF").count(), 2);
    }

    #[test]
    fn test_empty_master_has_header_only() {
        let m3u8 = MasterPlaylist::new().render();
        assert!(m3u8.starts_with("#EXTM3U"));
        assert!(!m3u8.contains("#EXT-X-STREAM-INF"));
    }
}
