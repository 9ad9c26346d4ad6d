//! Interfaces to the external decode and encode engines.
//!
//! Submission is a call on the engine; results come back on the unbounded
//! channel handed to the engine at creation, one channel per engine
//! instance, in submission order. Every submitted chunk carries its 1-based
//! sample number as `sequence`, and engines echo it on their output.

use async_trait::async_trait;
use bytes::Bytes;
use reframe_media::VideoDescription;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// Decode engine configuration, taken from the source video track.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// avcC or av1C payload.
    pub description: Option<Bytes>,
}

/// Encode engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
}

/// One compressed sample submitted for decoding.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub sequence: u32,
    pub is_key_frame: bool,
    pub duration: u32,
    pub data: Bytes,
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub sequence: u32,
    pub is_key_frame: bool,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum DecoderEvent {
    Frame(RawFrame),
    /// Every submitted chunk has produced its output.
    Flushed,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Key,
    Delta,
}

/// One compressed frame produced by the encoder.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub sequence: u32,
    pub kind: FrameKind,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// Encoded frame. `config` carries the encoder's decoder configuration,
    /// reported at most once.
    Output {
        output: EncodedOutput,
        config: Option<VideoDescription>,
    },
    Flushed,
    Error(String),
}

#[async_trait]
pub trait DecodeEngine: Send {
    async fn decode(&mut self, chunk: EncodedChunk) -> Result<()>;

    /// Request [`DecoderEvent::Flushed`] once pending work has drained.
    async fn flush(&mut self) -> Result<()>;

    /// Release the engine. Calling it again has no effect.
    fn close(&mut self);
}

#[async_trait]
pub trait EncodeEngine: Send {
    async fn encode(&mut self, frame: RawFrame, key_frame: bool) -> Result<()>;

    /// Request [`EncoderEvent::Flushed`] once pending work has drained.
    async fn flush(&mut self) -> Result<()>;

    /// Release the engine. Calling it again has no effect.
    fn close(&mut self);
}

/// Platform codec capability: support queries and engine construction.
#[async_trait]
pub trait CodecProvider: Send + Sync {
    async fn is_encode_supported(&self, config: &EncoderConfig) -> bool;

    async fn is_decode_supported(&self, _config: &DecoderConfig) -> bool {
        true
    }

    /// Whether frames from a `decoder` can be fed to an `encoder`.
    async fn is_transcode_supported(
        &self,
        _decoder: &DecoderConfig,
        _encoder: &EncoderConfig,
    ) -> bool {
        true
    }

    fn create_decoder(
        &self,
        config: DecoderConfig,
        events: UnboundedSender<DecoderEvent>,
    ) -> Result<Box<dyn DecodeEngine>>;

    fn create_encoder(
        &self,
        config: EncoderConfig,
        events: UnboundedSender<EncoderEvent>,
    ) -> Result<Box<dyn EncodeEngine>>;
}
