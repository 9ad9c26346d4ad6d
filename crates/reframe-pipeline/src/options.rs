//! Transcode options.
//!
//! Every field defaults sensibly, so an empty table deserializes to a
//! working mp4 → mp4 configuration.

use serde::{Deserialize, Serialize};

/// Options for one transcode run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    /// Container of the source.
    pub input_format: String,
    /// Container to produce.
    pub output_format: String,
    pub output: OutputSettings,
    /// Decoded frames allowed in flight before the next sample waits.
    pub max_pending_frames: usize,
    /// Interleave window of the output, in seconds.
    pub chunk_duration_secs: f64,
    /// Log per-frame pipeline activity.
    pub debug: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            input_format: "mp4".into(),
            output_format: "mp4".into(),
            output: OutputSettings::default(),
            max_pending_frames: 5,
            chunk_duration_secs: 1.0,
            debug: false,
        }
    }
}

/// Target encode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Codec string, e.g. `avc1.640028` or `av01.0.08M.08`.
    pub codec: String,
    /// Output width; 0 keeps the source width.
    pub width: u32,
    /// Output height; 0 keeps the source height.
    pub height: u32,
    /// Bits per second.
    pub bitrate: u64,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            codec: "avc1.640028".into(),
            width: 0,
            height: 0,
            bitrate: 4_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let options: TranscodeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, TranscodeOptions::default());
        assert_eq!(options.max_pending_frames, 5);
        assert_eq!(options.output_format, "mp4");
    }

    #[test]
    fn partial_output_keeps_other_defaults() {
        let options: TranscodeOptions =
            serde_json::from_str(r#"{"output": {"codec": "av01.0.08M.08"}}"#).unwrap();
        assert_eq!(options.output.codec, "av01.0.08M.08");
        assert_eq!(options.output.bitrate, 4_000_000);
        assert_eq!(options.chunk_duration_secs, 1.0);
    }
}
