//! The pipeline controller: demux, overlapped decode and encode, mux.
//!
//! One task owns the whole run. It submits samples to the decode engine up
//! to the lookahead window, feeds every decoded frame to the encode engine,
//! and reacts to engine output as it arrives on the engines' channels. The
//! next-sample cursor lives in that task alone, so there is no second
//! driver to race it.

use std::sync::Arc;

use bytes::Bytes;
use reframe_media::{ByteSource, DemuxedMedia, MuxSample, Sample, SampleIndex, VideoDescription};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    CodecProvider, DecodeEngine, DecoderConfig, DecoderEvent, EncodeEngine, EncodedChunk,
    EncodedOutput, EncoderConfig, EncoderEvent,
};
use crate::error::{ErrorKind, Result, TranscodeError};
use crate::events::{EventSender, TranscodeEvent};
use crate::options::TranscodeOptions;
use crate::registry::{ContainerFormat, FormatRegistry};
use crate::state::PipelineState;

/// Counters and buffers of one decode/encode pass.
#[derive(Debug, Default)]
struct Progress {
    total: u32,
    /// Next 1-based sample number to submit.
    next_sample: u32,
    submitted: u32,
    decoded: u32,
    encoded: u32,
    last_decoded: u32,
    input_done: bool,
    decode_complete: bool,
    finalized: bool,
    outputs: Vec<EncodedOutput>,
    encoder_config: Option<VideoDescription>,
}

impl Progress {
    fn in_flight(&self) -> u32 {
        self.submitted.saturating_sub(self.decoded)
    }

    /// Decoding has finished and every decoded frame has been encoded.
    /// Returns true only on the first call that sees this.
    fn try_finalize(&mut self) -> bool {
        if self.finalized || !self.decode_complete || self.encoded != self.decoded {
            return false;
        }
        self.finalized = true;
        true
    }
}

/// Runs one source through demux → decode → encode → mux.
pub struct Transcoder {
    options: TranscodeOptions,
    codecs: Arc<dyn CodecProvider>,
    formats: FormatRegistry,
    events: EventSender,
    state: PipelineState,
    cancel: CancellationToken,
    decoder: Option<Box<dyn DecodeEngine>>,
    encoder: Option<Box<dyn EncodeEngine>>,
}

impl Transcoder {
    pub fn new(options: TranscodeOptions, codecs: Arc<dyn CodecProvider>) -> Self {
        Self {
            options,
            codecs,
            formats: FormatRegistry::with_defaults(),
            events: EventSender::noop(),
            state: PipelineState::Idle,
            cancel: CancellationToken::new(),
            decoder: None,
            encoder: None,
        }
    }

    /// Builder: replace the container format registry.
    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    /// Builder: attach an event sender.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Token that tears the run down when cancelled, from any task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the pipeline to completion and return the output file.
    ///
    /// A transcoder runs once; calling this again fails without side effects.
    pub async fn run(&mut self, source: &dyn ByteSource) -> Result<Bytes> {
        if self.state != PipelineState::Idle {
            return Err(TranscodeError::unknown(format!(
                "transcoder is {}, not idle",
                self.state
            )));
        }

        let result = self.execute(source).await;
        match &result {
            Ok(bytes) => {
                self.close_engines();
                self.set_state(PipelineState::Complete);
                tracing::info!("Transcode complete: {} bytes", bytes.len());
                self.events.send(TranscodeEvent::TranscodeComplete {
                    bytes: bytes.clone(),
                });
            }
            Err(e) if e.kind == ErrorKind::Cancelled => {
                tracing::info!("Transcode cancelled");
                self.destroy();
            }
            Err(e) => {
                tracing::error!("Transcode failed: {e}");
                self.close_engines();
                self.set_state(PipelineState::Error);
                self.events.send(TranscodeEvent::Error {
                    kind: e.kind,
                    message: e.message.clone(),
                });
            }
        }
        result
    }

    /// Release both engines and stop further scheduling. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == PipelineState::Destroyed {
            return;
        }
        self.cancel.cancel();
        self.close_engines();
        self.set_state(PipelineState::Destroyed);
        self.events.send(TranscodeEvent::Destroyed);
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state == state {
            return;
        }
        tracing::info!("Pipeline {} -> {}", self.state, state);
        self.state = state;
        self.events.send(TranscodeEvent::StateChanged(state));
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(TranscodeError::cancelled())
        } else {
            Ok(())
        }
    }

    fn close_engines(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.close();
        }
    }

    fn decoder(&mut self) -> Result<&mut Box<dyn DecodeEngine>> {
        self.decoder
            .as_mut()
            .ok_or_else(|| TranscodeError::unknown("decode engine is not running"))
    }

    fn encoder(&mut self) -> Result<&mut Box<dyn EncodeEngine>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| TranscodeError::unknown("encode engine is not running"))
    }

    async fn execute(&mut self, source: &dyn ByteSource) -> Result<Bytes> {
        self.set_state(PipelineState::CheckingSupport);
        let input = self.formats.get(&self.options.input_format).ok_or_else(|| {
            TranscodeError::format_unsupported(format!(
                "no demuxer for {}",
                self.options.input_format
            ))
        })?;
        let output = self.formats.get(&self.options.output_format).ok_or_else(|| {
            TranscodeError::format_unsupported(format!(
                "no muxer for {}",
                self.options.output_format
            ))
        })?;
        let target = EncoderConfig {
            codec: self.options.output.codec.clone(),
            width: self.options.output.width,
            height: self.options.output.height,
            bitrate: self.options.output.bitrate,
        };
        if !self.codecs.is_encode_supported(&target).await {
            return Err(TranscodeError::codec_unsupported(format!(
                "cannot encode {} at {}x{}",
                target.codec, target.width, target.height
            )));
        }
        self.check_cancelled()?;

        self.set_state(PipelineState::Demuxing);
        let media = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TranscodeError::cancelled()),
            media = input.demux(source) => media.map_err(TranscodeError::demux)?,
        };
        let video = media
            .video_track()
            .ok_or_else(|| TranscodeError::demux("no video track"))?;
        let decoder_config = DecoderConfig {
            codec: video
                .codec
                .clone()
                .ok_or_else(|| TranscodeError::demux("video track has no codec"))?,
            width: video.width,
            height: video.height,
            description: video.description.clone(),
        };
        if !self.codecs.is_decode_supported(&decoder_config).await {
            return Err(TranscodeError::codec_unsupported(format!(
                "cannot decode {}",
                decoder_config.codec
            )));
        }
        let encoder_config = EncoderConfig {
            width: if target.width == 0 { video.width } else { target.width },
            height: if target.height == 0 { video.height } else { target.height },
            ..target
        };
        if !self
            .codecs
            .is_transcode_supported(&decoder_config, &encoder_config)
            .await
        {
            return Err(TranscodeError::codec_unsupported(format!(
                "cannot transcode {} to {}",
                decoder_config.codec, encoder_config.codec
            )));
        }
        tracing::info!(
            "Demuxed {} {}x{}: {} frames, {} audio tracks",
            decoder_config.codec,
            video.width,
            video.height,
            video.sample_count(),
            media.audio_tracks.len()
        );

        self.set_state(PipelineState::Transcoding);
        let progress = self
            .transcode(&media, source, decoder_config, encoder_config)
            .await?;

        self.set_state(PipelineState::Finalizing);
        self.finalize(&media, source, output.as_ref(), progress).await
    }

    async fn transcode(
        &mut self,
        media: &DemuxedMedia,
        source: &dyn ByteSource,
        decoder_config: DecoderConfig,
        encoder_config: EncoderConfig,
    ) -> Result<Progress> {
        let index = media
            .video_index()
            .ok_or_else(|| TranscodeError::demux("no video track"))?;

        let (decoder_tx, mut decoder_rx) = mpsc::unbounded_channel();
        let (encoder_tx, mut encoder_rx) = mpsc::unbounded_channel();
        let decoder = self
            .codecs
            .create_decoder(decoder_config, decoder_tx)
            .map_err(|e| TranscodeError::decode(e.message))?;
        self.decoder = Some(decoder);
        let encoder = self
            .codecs
            .create_encoder(encoder_config, encoder_tx)
            .map_err(|e| TranscodeError::encode(e.message))?;
        self.encoder = Some(encoder);

        let mut progress = Progress {
            total: index.len(),
            next_sample: 1,
            ..Default::default()
        };
        let cancel = self.cancel.clone();

        self.pump(index, source, &mut progress).await?;
        while !progress.finalized {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TranscodeError::cancelled()),
                event = decoder_rx.recv(), if !progress.decode_complete => {
                    self.on_decoder_event(event, index, source, &mut progress).await?;
                }
                event = encoder_rx.recv() => {
                    self.on_encoder_event(event, &mut progress)?;
                }
            }
        }
        tracing::info!(
            "Transcoded {} of {} frames",
            progress.encoded,
            progress.total
        );
        Ok(progress)
    }

    /// Submit samples until the lookahead window is full or input runs out.
    /// Running out flushes the decoder.
    async fn pump(
        &mut self,
        index: &SampleIndex,
        source: &dyn ByteSource,
        progress: &mut Progress,
    ) -> Result<()> {
        let lookahead = self.options.max_pending_frames.max(1) as u32;
        while !progress.input_done && progress.in_flight() < lookahead {
            self.check_cancelled()?;
            let Some(sample) = index.sample(progress.next_sample) else {
                if progress.next_sample <= progress.total {
                    tracing::warn!(
                        "sample {} of {} cannot be located; ending input early",
                        progress.next_sample,
                        progress.total
                    );
                }
                tracing::debug!("All {} samples submitted, flushing decoder", progress.submitted);
                progress.input_done = true;
                let decoder = self.decoder()?;
                if let Err(e) = decoder.flush().await {
                    decoder.close();
                    return Err(TranscodeError::decode(e.message));
                }
                break;
            };

            let data = read_sample(source, &sample).await?;
            let chunk = EncodedChunk {
                sequence: sample.number,
                is_key_frame: sample.is_key_frame,
                duration: sample.duration,
                data,
            };
            let decoder = self.decoder()?;
            if let Err(e) = decoder.decode(chunk).await {
                decoder.close();
                return Err(TranscodeError::decode(e.message));
            }
            progress.submitted += 1;
            progress.next_sample += 1;
        }
        Ok(())
    }

    async fn on_decoder_event(
        &mut self,
        event: Option<DecoderEvent>,
        index: &SampleIndex,
        source: &dyn ByteSource,
        progress: &mut Progress,
    ) -> Result<()> {
        match event {
            Some(DecoderEvent::Frame(frame)) => {
                progress.decoded += 1;
                if frame.sequence <= progress.last_decoded {
                    tracing::warn!(
                        "decoder returned frame {} after frame {}",
                        frame.sequence,
                        progress.last_decoded
                    );
                }
                progress.last_decoded = progress.last_decoded.max(frame.sequence);
                if self.options.debug {
                    tracing::debug!("Decoded frame {}", frame.sequence);
                }
                self.events.send(TranscodeEvent::DecodeProgress {
                    decoded: progress.decoded,
                    total: progress.total,
                });

                let key_frame = index.is_key_frame(frame.sequence);
                let encoder = self.encoder()?;
                if let Err(e) = encoder.encode(frame, key_frame).await {
                    encoder.close();
                    return Err(TranscodeError::encode(e.message));
                }
                self.pump(index, source, progress).await
            }
            Some(DecoderEvent::Flushed) => {
                progress.decode_complete = true;
                tracing::info!("Decode complete: {} frames", progress.decoded);
                self.events.send(TranscodeEvent::DecodeComplete);
                let encoder = self.encoder()?;
                if let Err(e) = encoder.flush().await {
                    encoder.close();
                    return Err(TranscodeError::encode(e.message));
                }
                progress.try_finalize();
                Ok(())
            }
            Some(DecoderEvent::Error(message)) => {
                if let Some(mut decoder) = self.decoder.take() {
                    decoder.close();
                }
                Err(TranscodeError::decode(message))
            }
            None => Err(TranscodeError::unknown(
                "decode engine stopped before flushing",
            )),
        }
    }

    fn on_encoder_event(
        &mut self,
        event: Option<EncoderEvent>,
        progress: &mut Progress,
    ) -> Result<()> {
        match event {
            Some(EncoderEvent::Output { output, config }) => {
                progress.encoded += 1;
                if let Some(config) = config {
                    if progress.encoder_config.is_none() {
                        tracing::debug!(
                            "Encoder configuration: {} {}x{}",
                            config.codec,
                            config.width,
                            config.height
                        );
                        progress.encoder_config = Some(config);
                    } else {
                        tracing::warn!("encoder reported its configuration again; keeping the first");
                    }
                }
                if self.options.debug {
                    tracing::debug!("Encoded frame {} ({:?})", output.sequence, output.kind);
                }
                progress.outputs.push(output);
                self.events.send(TranscodeEvent::EncodeProgress {
                    encoded: progress.encoded,
                    total: progress.total,
                });
                progress.try_finalize();
                Ok(())
            }
            Some(EncoderEvent::Flushed) => {
                if progress.try_finalize() || progress.finalized {
                    return Ok(());
                }
                Err(TranscodeError::encode(format!(
                    "encoder flushed after {} of {} frames",
                    progress.encoded, progress.decoded
                )))
            }
            Some(EncoderEvent::Error(message)) => {
                if let Some(mut encoder) = self.encoder.take() {
                    encoder.close();
                }
                Err(TranscodeError::encode(message))
            }
            None => Err(TranscodeError::unknown(
                "encode engine stopped before all frames were encoded",
            )),
        }
    }

    async fn finalize(
        &mut self,
        media: &DemuxedMedia,
        source: &dyn ByteSource,
        format: &dyn ContainerFormat,
        progress: Progress,
    ) -> Result<Bytes> {
        let index = media
            .video_index()
            .ok_or_else(|| TranscodeError::demux("no video track"))?;
        let Progress {
            mut outputs,
            encoder_config,
            ..
        } = progress;
        if !outputs.windows(2).all(|w| w[0].sequence < w[1].sequence) {
            tracing::warn!("encoder output arrived out of order; restoring sample order");
            outputs.sort_by_key(|o| o.sequence);
        }

        let mut muxer = format
            .create_muxer(media, encoder_config, self.options.chunk_duration_secs)
            .map_err(TranscodeError::mux)?;
        for output in outputs {
            muxer
                .push_video_sample(MuxSample {
                    duration: index.duration(output.sequence),
                    is_key_frame: index.is_key_frame(output.sequence),
                    data: output.data,
                })
                .map_err(TranscodeError::mux)?;
        }

        for (track_index, track) in media.audio_tracks.iter().enumerate() {
            self.check_cancelled()?;
            for n in 1..=track.sample_count() {
                let Some(sample) = media.audio_sample(n, track_index) else {
                    tracing::warn!("audio track {} ends early at sample {}", track.id, n);
                    break;
                };
                let data = read_sample(source, &sample).await?;
                muxer
                    .push_audio_sample(
                        track_index,
                        MuxSample {
                            data,
                            duration: sample.duration,
                            is_key_frame: sample.is_key_frame,
                        },
                    )
                    .map_err(TranscodeError::mux)?;
            }
        }

        muxer.finish().map_err(TranscodeError::mux)
    }
}

async fn read_sample(source: &dyn ByteSource, sample: &Sample) -> Result<Bytes> {
    if sample.size == 0 {
        return Ok(Bytes::new());
    }
    let end = sample.offset + sample.size as u64;
    source
        .read(sample.offset, end)
        .await
        .map_err(TranscodeError::demux)?
        .ok_or_else(|| {
            TranscodeError::demux(format!(
                "sample {} at {}..{} is past the end of the source",
                sample.number, sample.offset, end
            ))
        })
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        self.close_engines();
    }
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_fires_once() {
        let mut progress = Progress {
            decoded: 3,
            encoded: 3,
            ..Default::default()
        };
        assert!(!progress.try_finalize());
        progress.decode_complete = true;
        assert!(progress.try_finalize());
        assert!(!progress.try_finalize());
    }

    #[test]
    fn finalize_waits_for_encoder() {
        let mut progress = Progress {
            decoded: 3,
            encoded: 2,
            decode_complete: true,
            ..Default::default()
        };
        assert!(!progress.try_finalize());
        progress.encoded = 3;
        assert!(progress.try_finalize());
    }
}
