//! # reframe-pipeline
//!
//! Orchestration of the demux → decode → encode → mux pipeline.
//!
//! This crate provides:
//!
//! - **[`Transcoder`]** -- the controller state machine. Checks support,
//!   demuxes, drives decode and encode with a bounded lookahead, detects
//!   completion, and muxes the result.
//! - **[`CodecProvider`]** with [`DecodeEngine`] / [`EncodeEngine`] -- the
//!   interface to platform codecs. Output arrives on one ordered channel per
//!   engine.
//! - **[`PassthroughCodecs`]** -- engines that carry the compressed bitstream
//!   through untouched, for remuxing.
//! - **[`FormatRegistry`]** -- container plugins by name (`mp4` built in).
//! - **[`EventSender`]** -- progress, completion, error and teardown
//!   notifications.

pub mod engine;
pub mod error;
pub mod events;
pub mod options;
pub mod passthrough;
pub mod registry;
pub mod state;
pub mod transcoder;

// Re-export key types at the crate root.
pub use engine::{
    CodecProvider, DecodeEngine, DecoderConfig, DecoderEvent, EncodeEngine, EncodedChunk,
    EncodedOutput, EncoderConfig, EncoderEvent, FrameKind, RawFrame,
};
pub use error::{ErrorKind, Result, TranscodeError};
pub use events::{EventSender, TranscodeEvent};
pub use options::{OutputSettings, TranscodeOptions};
pub use passthrough::PassthroughCodecs;
pub use registry::{ContainerFormat, ContainerMuxer, FormatRegistry, Mp4Format};
pub use state::PipelineState;
pub use transcoder::Transcoder;
