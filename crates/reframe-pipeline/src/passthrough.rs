//! Engines that hand compressed samples straight through.
//!
//! The decoder's "raw frame" is the compressed payload and the encoder emits
//! it unchanged, so a transcode with these engines is a remux that rebuilds
//! the container around the original bitstream.

use async_trait::async_trait;
use reframe_media::mux::SampleEntryKind;
use reframe_media::VideoDescription;
use tokio::sync::mpsc::UnboundedSender;

use crate::engine::{
    CodecProvider, DecodeEngine, DecoderConfig, DecoderEvent, EncodeEngine, EncodedChunk,
    EncodedOutput, EncoderConfig, EncoderEvent, FrameKind, RawFrame,
};
use crate::error::{Result, TranscodeError};

const SUPPORTED_PREFIXES: [&str; 2] = ["avc1.", "av01."];

fn is_supported(codec: &str) -> bool {
    SUPPORTED_PREFIXES.iter().any(|p| codec.starts_with(p))
}

fn same_family(a: &str, b: &str) -> bool {
    match (SampleEntryKind::from_codec(a), SampleEntryKind::from_codec(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// [`CodecProvider`] for `avc1.*` and `av01.*` passthrough.
///
/// The bitstream is never re-encoded, so the target codec must belong to the
/// same family as the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodecs;

impl PassthroughCodecs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CodecProvider for PassthroughCodecs {
    async fn is_encode_supported(&self, config: &EncoderConfig) -> bool {
        is_supported(&config.codec)
    }

    async fn is_decode_supported(&self, config: &DecoderConfig) -> bool {
        is_supported(&config.codec)
    }

    async fn is_transcode_supported(
        &self,
        decoder: &DecoderConfig,
        encoder: &EncoderConfig,
    ) -> bool {
        same_family(&decoder.codec, &encoder.codec)
    }

    fn create_decoder(
        &self,
        config: DecoderConfig,
        events: UnboundedSender<DecoderEvent>,
    ) -> Result<Box<dyn DecodeEngine>> {
        tracing::debug!("passthrough decoder for {}", config.codec);
        Ok(Box::new(PassthroughDecoder {
            config,
            events: Some(events),
        }))
    }

    fn create_encoder(
        &self,
        config: EncoderConfig,
        events: UnboundedSender<EncoderEvent>,
    ) -> Result<Box<dyn EncodeEngine>> {
        tracing::debug!("passthrough encoder for {}", config.codec);
        Ok(Box::new(PassthroughEncoder {
            config,
            events: Some(events),
            reported_config: false,
        }))
    }
}

struct PassthroughDecoder {
    config: DecoderConfig,
    events: Option<UnboundedSender<DecoderEvent>>,
}

impl PassthroughDecoder {
    fn send(&self, event: DecoderEvent) -> Result<()> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| TranscodeError::decode("decoder is closed"))?;
        events
            .send(event)
            .map_err(|_| TranscodeError::decode("decoder output receiver dropped"))
    }
}

#[async_trait]
impl DecodeEngine for PassthroughDecoder {
    async fn decode(&mut self, chunk: EncodedChunk) -> Result<()> {
        self.send(DecoderEvent::Frame(RawFrame {
            sequence: chunk.sequence,
            is_key_frame: chunk.is_key_frame,
            width: self.config.width,
            height: self.config.height,
            data: chunk.data,
        }))
    }

    async fn flush(&mut self) -> Result<()> {
        self.send(DecoderEvent::Flushed)
    }

    fn close(&mut self) {
        self.events = None;
    }
}

struct PassthroughEncoder {
    config: EncoderConfig,
    events: Option<UnboundedSender<EncoderEvent>>,
    reported_config: bool,
}

impl PassthroughEncoder {
    fn send(&self, event: EncoderEvent) -> Result<()> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| TranscodeError::encode("encoder is closed"))?;
        events
            .send(event)
            .map_err(|_| TranscodeError::encode("encoder output receiver dropped"))
    }
}

#[async_trait]
impl EncodeEngine for PassthroughEncoder {
    async fn encode(&mut self, frame: RawFrame, key_frame: bool) -> Result<()> {
        // The bitstream is untouched, so only the codec label and the coded
        // size are known here; the source description stays in place.
        let config = (!self.reported_config).then(|| VideoDescription {
            codec: self.config.codec.clone(),
            width: frame.width,
            height: frame.height,
            description: None,
        });
        self.reported_config = true;
        self.send(EncoderEvent::Output {
            output: EncodedOutput {
                sequence: frame.sequence,
                kind: if key_frame {
                    FrameKind::Key
                } else {
                    FrameKind::Delta
                },
                data: frame.data,
            },
            config,
        })
    }

    async fn flush(&mut self) -> Result<()> {
        self.send(EncoderEvent::Flushed)
    }

    fn close(&mut self) {
        self.events = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn encoder_config(codec: &str) -> EncoderConfig {
        EncoderConfig {
            codec: codec.into(),
            width: 0,
            height: 0,
            bitrate: 1_000_000,
        }
    }

    #[tokio::test]
    async fn supports_avc_and_av1_only() {
        let codecs = PassthroughCodecs::new();
        assert!(codecs.is_encode_supported(&encoder_config("avc1.64001f")).await);
        assert!(codecs.is_encode_supported(&encoder_config("av01.0.08M.08")).await);
        assert!(!codecs.is_encode_supported(&encoder_config("hvc1.1.6.L93")).await);
        assert!(!codecs.is_encode_supported(&encoder_config("vp09.00.10.08")).await);
    }

    #[tokio::test]
    async fn rejects_codec_family_change() {
        let codecs = PassthroughCodecs::new();
        let source = |codec: &str| DecoderConfig {
            codec: codec.into(),
            width: 640,
            height: 360,
            description: None,
        };
        assert!(
            codecs
                .is_transcode_supported(&source("avc1.64001f"), &encoder_config("avc1.640028"))
                .await
        );
        assert!(
            codecs
                .is_transcode_supported(&source("av01.0.08M.08"), &encoder_config("av01.0.04M.08"))
                .await
        );
        assert!(
            !codecs
                .is_transcode_supported(&source("av01.0.08M.08"), &encoder_config("avc1.640028"))
                .await
        );
        assert!(
            !codecs
                .is_transcode_supported(&source("avc1.64001f"), &encoder_config("av01.0.08M.08"))
                .await
        );
    }

    #[tokio::test]
    async fn decoder_echoes_payload_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut decoder = PassthroughCodecs
            .create_decoder(
                DecoderConfig {
                    codec: "avc1.64001f".into(),
                    width: 320,
                    height: 240,
                    description: None,
                },
                tx,
            )
            .unwrap();
        for sequence in 1..=3 {
            decoder
                .decode(EncodedChunk {
                    sequence,
                    is_key_frame: sequence == 1,
                    duration: 40,
                    data: Bytes::from(vec![sequence as u8; 4]),
                })
                .await
                .unwrap();
        }
        decoder.flush().await.unwrap();

        for expected in 1..=3u32 {
            match rx.recv().await.unwrap() {
                DecoderEvent::Frame(frame) => {
                    assert_eq!(frame.sequence, expected);
                    assert_eq!(frame.width, 320);
                    assert_eq!(&frame.data[..], &[expected as u8; 4]);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(matches!(rx.recv().await, Some(DecoderEvent::Flushed)));
    }

    #[tokio::test]
    async fn encoder_reports_config_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut encoder = PassthroughCodecs
            .create_encoder(encoder_config("avc1.64001f"), tx)
            .unwrap();
        for (sequence, key) in [(1, true), (2, false)] {
            let frame = RawFrame {
                sequence,
                is_key_frame: key,
                width: 64,
                height: 48,
                data: Bytes::from_static(b"nal"),
            };
            encoder.encode(frame, key).await.unwrap();
        }

        match rx.recv().await.unwrap() {
            EncoderEvent::Output { output, config } => {
                assert_eq!(output.kind, FrameKind::Key);
                let config = config.unwrap();
                assert_eq!(config.codec, "avc1.64001f");
                assert_eq!((config.width, config.height), (64, 48));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            EncoderEvent::Output { output, config } => {
                assert_eq!(output.kind, FrameKind::Delta);
                assert!(config.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_encoder_rejects_work() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut encoder = PassthroughCodecs
            .create_encoder(encoder_config("av01.0.08M.08"), tx)
            .unwrap();
        encoder.close();
        encoder.close();
        let err = encoder.flush().await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Encode);
    }
}
