//! Error types for reframe-media.

use std::io;
use thiserror::Error;

use crate::mp4::BoxType;

/// Result type for reframe-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for reframe-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A byte range outside the source was requested.
    #[error("Byte range {start}..{end} is outside the source (size {size})")]
    SourceRange { start: u64, end: u64, size: u64 },

    /// A box payload ended before a field could be read.
    #[error("Truncated {box_type} box: need {need} bytes, have {have}")]
    Truncated {
        box_type: BoxType,
        need: usize,
        have: usize,
    },

    /// Structurally invalid box.
    #[error("Invalid {box_type} box: {message}")]
    InvalidBox { box_type: BoxType, message: String },

    /// The file contains no video track.
    #[error("No video track found")]
    NoVideoTrack,

    /// The video sample entry is present but its decoder configuration box is not.
    #[error("Video codec {codec} is missing its decoder configuration")]
    MissingCodecConfig { codec: String },

    /// Nothing was pushed to the muxer.
    #[error("No samples to serialize")]
    NoSamples,

    /// A sample was pushed to a track the muxer does not have.
    #[error("Muxer has no {kind} track at index {index}")]
    UnknownTrack { kind: &'static str, index: usize },

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create an invalid box error.
    pub fn invalid_box(box_type: BoxType, msg: impl Into<String>) -> Self {
        Self::InvalidBox {
            box_type,
            message: msg.into(),
        }
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether this error belongs to the demux phase (source access, box tree, track layout).
    pub fn is_demux(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::SourceRange { .. }
                | Self::Truncated { .. }
                | Self::InvalidBox { .. }
                | Self::NoVideoTrack
                | Self::MissingCodecConfig { .. }
        )
    }
}
