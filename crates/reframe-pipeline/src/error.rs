//! Error types for reframe-pipeline.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Category of a terminal pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// No demux or mux plugin for the requested container.
    FormatUnsupported,
    /// The codec provider cannot encode the requested configuration.
    CodecUnsupported,
    /// Malformed box tree, missing video track, or missing codec description.
    Demux,
    /// The decode engine reported a failure.
    Decode,
    /// The encode engine reported a failure.
    Encode,
    /// Nothing to serialize, or the container writer rejected a track.
    Mux,
    Unknown,
    /// The run was torn down through its cancellation token.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FormatUnsupported => "FormatUnsupported",
            Self::CodecUnsupported => "CodecUnsupported",
            Self::Demux => "DemuxError",
            Self::Decode => "DecodeError",
            Self::Encode => "EncodeError",
            Self::Mux => "MuxError",
            Self::Unknown => "UnknownError",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal pipeline failure: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TranscodeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TranscodeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn format_unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::FormatUnsupported, msg)
    }

    pub fn codec_unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::CodecUnsupported, msg)
    }

    /// Any failure while reading the source counts as a demux failure.
    pub fn demux(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Demux, err.to_string())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, msg)
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encode, msg)
    }

    pub fn mux(err: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Mux, err.to_string())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, msg)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "transcode was cancelled")
    }
}

impl From<reframe_media::Error> for TranscodeError {
    fn from(err: reframe_media::Error) -> Self {
        let kind = if err.is_demux() {
            ErrorKind::Demux
        } else {
            match err {
                reframe_media::Error::NoSamples | reframe_media::Error::UnknownTrack { .. } => {
                    ErrorKind::Mux
                }
                _ => ErrorKind::Unknown,
            }
        };
        Self::new(kind, err.to_string())
    }
}
