mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./streamvault.toml",
        "~/.config/streamvault/config.toml",
        "/etc/streamvault/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.transcoder.binary.is_empty() {
        anyhow::bail!("Transcoder binary cannot be empty");
    }

    // A poll interval at or above the segment duration can miss segments
    // between scans.
    if config.timeshift.poll_interval_secs >= config.timeshift.segment_duration_secs {
        anyhow::bail!(
            "Timeshift poll interval ({}s) must be less than the segment duration ({}s)",
            config.timeshift.poll_interval_secs,
            config.timeshift.segment_duration_secs
        );
    }
    if config.abr.poll_interval_secs >= config.abr.segment_duration_secs {
        anyhow::bail!(
            "ABR poll interval ({}s) must be less than the segment duration ({}s)",
            config.abr.poll_interval_secs,
            config.abr.segment_duration_secs
        );
    }

    if config.timeshift.segment_duration_secs == 0 || config.abr.segment_duration_secs == 0 {
        anyhow::bail!("Segment duration cannot be 0");
    }
    if config.timeshift.retention_secs < config.timeshift.segment_duration_secs {
        anyhow::bail!(
            "Retention window ({}s) must hold at least one segment ({}s)",
            config.timeshift.retention_secs,
            config.timeshift.segment_duration_secs
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.transcoder.binary, "ffmpeg");
        assert_eq!(config.timeshift.segment_duration_secs, 10);
        assert_eq!(config.timeshift.poll_interval_secs, 5);
        assert_eq!(config.timeshift.retention_secs, 7200);
        assert_eq!(config.sweep.max_age_secs, 10800);
    }

    #[test]
    fn test_poll_interval_must_be_below_segment_duration() {
        let mut config = Config::default();
        config.timeshift.poll_interval_secs = 10;
        assert!(validate_config(&config).is_err());

        config.timeshift.poll_interval_secs = 9;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_abr_poll_interval_validated() {
        let mut config = Config::default();
        config.abr.poll_interval_secs = 15;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [timeshift]
            buffer_root = "/srv/buffer"
            retention_secs = 3600

            [transcoder]
            binary = "/usr/local/bin/ffmpeg"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeshift.buffer_root.to_str(), Some("/srv/buffer"));
        assert_eq!(config.timeshift.retention_secs, 3600);
        assert_eq!(config.timeshift.segment_duration_secs, 10);
        assert_eq!(config.transcoder.binary, "/usr/local/bin/ffmpeg");
        assert_eq!(config.abr.segment_duration_secs, 10);
    }

    #[test]
    fn test_retention_below_segment_duration_rejected() {
        let mut config = Config::default();
        config.timeshift.retention_secs = 5;
        assert!(validate_config(&config).is_err());
    }
}
