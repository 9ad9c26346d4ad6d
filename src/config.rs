//! TOML configuration for the `reframe` binary.

use std::path::Path;

use anyhow::{Context, Result};
use reframe_pipeline::TranscodeOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Pipeline options, the `[transcode]` table.
    #[serde(default)]
    pub transcode: TranscodeOptions,
}

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

    let default_paths = ["./reframe.toml", "~/.config/reframe/config.toml"];
    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Reject values the pipeline cannot run with.
pub fn validate_config(config: &Config) -> Result<()> {
    let options = &config.transcode;

    if options.max_pending_frames == 0 {
        anyhow::bail!("max_pending_frames must be at least 1");
    }
    if !(options.chunk_duration_secs.is_finite() && options.chunk_duration_secs > 0.0) {
        anyhow::bail!(
            "chunk_duration_secs must be positive, got {}",
            options.chunk_duration_secs
        );
    }
    if options.output.codec.is_empty() {
        anyhow::bail!("output codec cannot be empty");
    }
    if options.input_format.is_empty() || options.output_format.is_empty() {
        anyhow::bail!("input_format and output_format cannot be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_is_default() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn transcode_table_overrides_defaults() {
        let file = write_config(
            r#"
            [transcode]
            max_pending_frames = 8
            chunk_duration_secs = 0.5

            [transcode.output]
            codec = "av01.0.08M.08"
            bitrate = 2000000
            "#,
        );
        let config = load_config(file.path()).unwrap();
        let options = &config.transcode;
        assert_eq!(options.max_pending_frames, 8);
        assert_eq!(options.chunk_duration_secs, 0.5);
        assert_eq!(options.output.codec, "av01.0.08M.08");
        assert_eq!(options.output.bitrate, 2_000_000);
        assert_eq!(options.output_format, "mp4");
    }

    #[test]
    fn zero_lookahead_is_rejected() {
        let file = write_config("[transcode]\nmax_pending_frames = 0\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("max_pending_frames"));
    }

    #[test]
    fn non_positive_chunk_duration_is_rejected() {
        let mut config = Config::default();
        config.transcode.chunk_duration_secs = 0.0;
        assert!(validate_config(&config).is_err());
        config.transcode.chunk_duration_secs = -1.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let file = write_config("[transcode\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config_or_default(Some(&missing)).is_err());
    }
}
