//! End-to-end runs of the transcoder over synthesized MP4 sources.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use reframe_media::{demux, ByteSource, MemorySource, Mp4Muxer, MuxSample, MuxTrack, VideoDescription};
use reframe_pipeline::{
    CodecProvider, ContainerFormat, DecodeEngine, DecoderConfig, DecoderEvent, EncodeEngine,
    EncodedChunk, EncodedOutput, EncoderConfig, EncoderEvent, ErrorKind, EventSender, FrameKind,
    Mp4Format, PassthroughCodecs, PipelineState, RawFrame, TranscodeEvent, TranscodeOptions,
    Transcoder,
};
use tokio::sync::mpsc::UnboundedSender;

// -- Fixtures -----------------------------------------------------------------

/// avcC for High profile, level 3.1.
const HIGH_AVCC: [u8; 18] = [
    0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x64, 0x00, 0x1F, 0x01, 0x00, 0x03,
    0x68, 0xEE, 0x3C,
];

/// avcC for Constrained Baseline, level 3.0.
const BASELINE_AVCC: [u8; 18] = [
    0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x03,
    0x68, 0xCE, 0x3C,
];

/// av1C for Main profile, level 4.0, 8-bit 4:2:0.
const AV1C: [u8; 4] = [0x81, 0x08, 0x0C, 0x00];

/// esds payload for AAC-LC, 44.1 kHz, stereo.
const AAC_ESDS: [u8; 27] = [
    0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4,
    0x00, 0x00, 0x01, 0xF4, 0x00, 0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
];

fn video_frame(i: u32) -> MuxSample {
    MuxSample {
        data: Bytes::from(vec![i as u8; 50 + i as usize]),
        duration: 40,
        is_key_frame: i % 5 == 0,
    }
}

fn source_file(frames: u32, audio_samples: u32, description: Option<&'static [u8]>) -> Bytes {
    let mut video = MuxTrack::video("avc1.64001f", 1000, 320, 240).unwrap();
    if let Some(description) = description {
        video = video.with_description(Bytes::from_static(description));
    }
    let mut tracks = vec![video];
    if audio_samples > 0 {
        tracks.push(
            MuxTrack::audio("mp4a.40.2", 44100, 2, 44100)
                .unwrap()
                .with_description(Bytes::from_static(&AAC_ESDS)),
        );
    }
    let mut muxer = Mp4Muxer::new(tracks);
    for i in 0..frames {
        muxer.push_video_sample(0, video_frame(i)).unwrap();
    }
    for i in 0..audio_samples {
        muxer
            .push_audio_sample(
                0,
                MuxSample {
                    data: Bytes::from(vec![0xA0 | (i % 16) as u8; 12]),
                    duration: 1024,
                    is_key_frame: true,
                },
            )
            .unwrap();
    }
    muxer.finish().unwrap()
}

fn av1_source_file(frames: u32) -> Bytes {
    let video = MuxTrack::video("av01.0.08M.08", 1000, 320, 240)
        .unwrap()
        .with_description(Bytes::from_static(&AV1C));
    let mut muxer = Mp4Muxer::new(vec![video]);
    for i in 0..frames {
        muxer.push_video_sample(0, video_frame(i)).unwrap();
    }
    muxer.finish().unwrap()
}

fn options() -> TranscodeOptions {
    let mut options = TranscodeOptions::default();
    options.output.codec = "avc1.64001f".into();
    options
}

/// Source that counts range reads.
struct CountingSource {
    inner: MemorySource,
    reads: AtomicUsize,
}

impl CountingSource {
    fn new(data: Bytes) -> Self {
        Self {
            inner: MemorySource::new(data),
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ByteSource for CountingSource {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    async fn read(&self, start: u64, end: u64) -> reframe_media::Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(start, end).await
    }
}

// -- Observation ----------------------------------------------------------------

#[derive(Default)]
struct Observer {
    events: Mutex<Vec<TranscodeEvent>>,
    decoded_seen: AtomicU32,
    encoded_seen: AtomicU32,
    decode_calls: AtomicU32,
    max_in_flight: AtomicU32,
    decoder_closed: AtomicBool,
    encoder_closed: AtomicBool,
}

impl Observer {
    fn sender(self: &Arc<Self>) -> EventSender {
        let observer = Arc::clone(self);
        EventSender::new(move |event| {
            match &event {
                TranscodeEvent::DecodeProgress { decoded, .. } => {
                    observer.decoded_seen.store(*decoded, Ordering::SeqCst)
                }
                TranscodeEvent::EncodeProgress { encoded, .. } => {
                    observer.encoded_seen.store(*encoded, Ordering::SeqCst)
                }
                _ => {}
            }
            observer.events.lock().unwrap().push(event);
        })
    }

    fn states(&self) -> Vec<PipelineState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                TranscodeEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&TranscodeEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

// -- Scripted engines -------------------------------------------------------------

#[derive(Clone, Default)]
struct Script {
    encode_supported: bool,
    /// Send decoder `Flushed` only after the controller has taken in this many
    /// encoded frames.
    flush_after_encoded: Option<u32>,
    /// Emit encoder output only when flushed.
    hold_encoder_output: bool,
    reverse_on_flush: bool,
    fail_decode_at: Option<u32>,
    encoder_config: Option<VideoDescription>,
    /// Drop the decoder's event sender right after sending `Flushed`.
    hang_up_after_flush: bool,
}

struct ScriptedCodecs {
    script: Script,
    observer: Arc<Observer>,
}

#[async_trait]
impl CodecProvider for ScriptedCodecs {
    async fn is_encode_supported(&self, _config: &EncoderConfig) -> bool {
        self.script.encode_supported
    }

    fn create_decoder(
        &self,
        _config: DecoderConfig,
        events: UnboundedSender<DecoderEvent>,
    ) -> reframe_pipeline::Result<Box<dyn DecodeEngine>> {
        Ok(Box::new(ScriptedDecoder {
            events: Some(events),
            script: self.script.clone(),
            observer: Arc::clone(&self.observer),
        }))
    }

    fn create_encoder(
        &self,
        _config: EncoderConfig,
        events: UnboundedSender<EncoderEvent>,
    ) -> reframe_pipeline::Result<Box<dyn EncodeEngine>> {
        Ok(Box::new(ScriptedEncoder {
            events,
            script: self.script.clone(),
            observer: Arc::clone(&self.observer),
            held: Vec::new(),
            reported_config: false,
        }))
    }
}

struct ScriptedDecoder {
    events: Option<UnboundedSender<DecoderEvent>>,
    script: Script,
    observer: Arc<Observer>,
}

#[async_trait]
impl DecodeEngine for ScriptedDecoder {
    async fn decode(&mut self, chunk: EncodedChunk) -> reframe_pipeline::Result<()> {
        let calls = self.observer.decode_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let in_flight = calls - self.observer.decoded_seen.load(Ordering::SeqCst);
        self.observer.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let event = if self.script.fail_decode_at == Some(chunk.sequence) {
            DecoderEvent::Error(format!("corrupt slice in frame {}", chunk.sequence))
        } else {
            DecoderEvent::Frame(RawFrame {
                sequence: chunk.sequence,
                is_key_frame: chunk.is_key_frame,
                width: 320,
                height: 240,
                data: chunk.data,
            })
        };
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
        Ok(())
    }

    async fn flush(&mut self) -> reframe_pipeline::Result<()> {
        let Some(events) = self.events.as_ref() else {
            return Ok(());
        };
        match self.script.flush_after_encoded {
            Some(target) => {
                let events = events.clone();
                let observer = Arc::clone(&self.observer);
                tokio::spawn(async move {
                    while observer.encoded_seen.load(Ordering::SeqCst) < target {
                        tokio::task::yield_now().await;
                    }
                    let _ = events.send(DecoderEvent::Flushed);
                });
            }
            None => {
                let _ = events.send(DecoderEvent::Flushed);
            }
        }
        if self.script.hang_up_after_flush {
            self.events = None;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.observer.decoder_closed.store(true, Ordering::SeqCst);
    }
}

struct ScriptedEncoder {
    events: UnboundedSender<EncoderEvent>,
    script: Script,
    observer: Arc<Observer>,
    held: Vec<EncoderEvent>,
    reported_config: bool,
}

#[async_trait]
impl EncodeEngine for ScriptedEncoder {
    async fn encode(&mut self, frame: RawFrame, key_frame: bool) -> reframe_pipeline::Result<()> {
        let config = if self.reported_config {
            None
        } else {
            self.reported_config = true;
            self.script.encoder_config.clone()
        };
        let event = EncoderEvent::Output {
            output: EncodedOutput {
                sequence: frame.sequence,
                kind: if key_frame { FrameKind::Key } else { FrameKind::Delta },
                data: frame.data,
            },
            config,
        };
        if self.script.hold_encoder_output {
            self.held.push(event);
        } else {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    async fn flush(&mut self) -> reframe_pipeline::Result<()> {
        let mut held = std::mem::take(&mut self.held);
        if self.script.reverse_on_flush {
            held.reverse();
        }
        for event in held {
            let _ = self.events.send(event);
        }
        let _ = self.events.send(EncoderEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) {
        self.observer.encoder_closed.store(true, Ordering::SeqCst);
    }
}

fn scripted(script: Script) -> (Transcoder, Arc<Observer>) {
    let observer = Arc::new(Observer::default());
    let codecs = Arc::new(ScriptedCodecs {
        script: Script {
            encode_supported: true,
            ..script
        },
        observer: Arc::clone(&observer),
    });
    let transcoder = Transcoder::new(options(), codecs).with_events(observer.sender());
    (transcoder, observer)
}

fn is_finalizing(e: &TranscodeEvent) -> bool {
    matches!(e, TranscodeEvent::StateChanged(PipelineState::Finalizing))
}

// -- Tests ------------------------------------------------------------------------

#[tokio::test]
async fn passthrough_remux_preserves_samples() {
    let input = source_file(12, 30, Some(&HIGH_AVCC));
    let observer = Arc::new(Observer::default());
    let mut transcoder =
        Transcoder::new(options(), Arc::new(PassthroughCodecs::new())).with_events(observer.sender());

    let output = transcoder.run(&MemorySource::new(input.clone())).await.unwrap();
    assert_eq!(transcoder.state(), PipelineState::Complete);
    assert_eq!(
        observer.states(),
        vec![
            PipelineState::CheckingSupport,
            PipelineState::Demuxing,
            PipelineState::Transcoding,
            PipelineState::Finalizing,
            PipelineState::Complete,
        ]
    );
    assert_eq!(observer.count(|e| matches!(e, TranscodeEvent::DecodeComplete)), 1);
    assert_eq!(observer.count(|e| matches!(e, TranscodeEvent::DecodeProgress { .. })), 12);
    assert_eq!(
        observer.count(|e| matches!(e, TranscodeEvent::TranscodeComplete { bytes } if *bytes == output)),
        1
    );

    let before = demux(&MemorySource::new(input.clone())).await.unwrap();
    let after = demux(&MemorySource::new(output.clone())).await.unwrap();
    assert_eq!(after.video_track().unwrap().codec.as_deref(), Some("avc1.64001f"));
    assert_eq!((after.width(), after.height()), (320, 240));
    for n in 1..=12 {
        let a = before.video_sample(n).unwrap();
        let b = after.video_sample(n).unwrap();
        assert_eq!(a.duration, b.duration);
        assert_eq!(a.is_key_frame, b.is_key_frame);
        assert_eq!(
            &input[a.offset as usize..][..a.size as usize],
            &output[b.offset as usize..][..b.size as usize]
        );
    }
    assert!(after.video_sample(13).is_none());

    assert_eq!(after.audio_tracks.len(), 1);
    assert_eq!(after.audio_tracks[0].sample_count(), 30);
    let last = after.audio_sample(30, 0).unwrap();
    assert_eq!(&output[last.offset as usize..][..last.size as usize], &[0xA0 | 13; 12]);
}

#[tokio::test]
async fn finalizes_once_when_decode_completes_first() {
    let (mut transcoder, observer) = scripted(Script {
        hold_encoder_output: true,
        ..Default::default()
    });
    let input = source_file(10, 0, Some(&HIGH_AVCC));
    transcoder.run(&MemorySource::new(input)).await.unwrap();

    let events = observer.events.lock().unwrap();
    let decode_complete = events
        .iter()
        .position(|e| matches!(e, TranscodeEvent::DecodeComplete))
        .unwrap();
    let first_encode = events
        .iter()
        .position(|e| matches!(e, TranscodeEvent::EncodeProgress { .. }))
        .unwrap();
    assert!(decode_complete < first_encode);
    drop(events);
    assert_eq!(observer.count(is_finalizing), 1);
}

#[tokio::test]
async fn finalizes_once_when_decode_completes_last() {
    let (mut transcoder, observer) = scripted(Script {
        flush_after_encoded: Some(10),
        ..Default::default()
    });
    let input = source_file(10, 0, Some(&HIGH_AVCC));
    transcoder.run(&MemorySource::new(input)).await.unwrap();

    let events = observer.events.lock().unwrap();
    let decode_complete = events
        .iter()
        .position(|e| matches!(e, TranscodeEvent::DecodeComplete))
        .unwrap();
    let tenth_encode = events
        .iter()
        .position(|e| matches!(e, TranscodeEvent::EncodeProgress { encoded: 10, .. }))
        .unwrap();
    assert!(tenth_encode < decode_complete);
    drop(events);
    assert_eq!(observer.count(is_finalizing), 1);
    assert_eq!(transcoder.state(), PipelineState::Complete);
}

#[tokio::test]
async fn decode_lookahead_is_bounded() {
    let (mut transcoder, observer) = scripted(Script::default());
    let input = source_file(20, 0, Some(&HIGH_AVCC));
    transcoder.run(&MemorySource::new(input)).await.unwrap();
    assert_eq!(observer.decode_calls.load(Ordering::SeqCst), 20);
    assert_eq!(observer.max_in_flight.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn reordered_encoder_output_is_muxed_in_sample_order() {
    let (mut transcoder, _observer) = scripted(Script {
        hold_encoder_output: true,
        reverse_on_flush: true,
        ..Default::default()
    });
    let input = source_file(8, 0, Some(&HIGH_AVCC));
    let output = transcoder.run(&MemorySource::new(input)).await.unwrap();

    let media = demux(&MemorySource::new(output.clone())).await.unwrap();
    for n in 1..=8u32 {
        let sample = media.video_sample(n).unwrap();
        let expected = video_frame(n - 1);
        assert_eq!(&output[sample.offset as usize..][..sample.size as usize], &expected.data[..]);
        assert_eq!(sample.is_key_frame, expected.is_key_frame);
    }
}

#[tokio::test]
async fn encoder_description_replaces_source_description() {
    let (mut transcoder, _observer) = scripted(Script {
        encoder_config: Some(VideoDescription {
            codec: "avc1.42c01e".into(),
            width: 640,
            height: 480,
            description: Some(Bytes::from_static(&BASELINE_AVCC)),
        }),
        ..Default::default()
    });
    let input = source_file(4, 0, Some(&HIGH_AVCC));
    let output = transcoder.run(&MemorySource::new(input)).await.unwrap();

    let media = demux(&MemorySource::new(output)).await.unwrap();
    let track = media.video_track().unwrap();
    assert_eq!(track.codec.as_deref(), Some("avc1.42c01e"));
    assert_eq!((track.width, track.height), (640, 480));
    assert_eq!(track.description.as_deref(), Some(&BASELINE_AVCC[..]));
}

#[tokio::test]
async fn missing_avcc_fails_before_transcoding() {
    let (mut transcoder, observer) = scripted(Script::default());
    let input = source_file(5, 0, None);
    let err = transcoder.run(&MemorySource::new(input)).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Demux);
    assert_eq!(transcoder.state(), PipelineState::Error);
    assert_eq!(
        observer.states(),
        vec![
            PipelineState::CheckingSupport,
            PipelineState::Demuxing,
            PipelineState::Error,
        ]
    );
    assert_eq!(observer.decode_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        observer.count(|e| matches!(e, TranscodeEvent::Error { kind: ErrorKind::Demux, .. })),
        1
    );
}

#[tokio::test]
async fn unsupported_codec_fails_without_demux() {
    let observer = Arc::new(Observer::default());
    let codecs = Arc::new(ScriptedCodecs {
        script: Script {
            encode_supported: false,
            ..Default::default()
        },
        observer: Arc::clone(&observer),
    });
    let mut transcoder = Transcoder::new(options(), codecs).with_events(observer.sender());
    let source = CountingSource::new(source_file(5, 0, Some(&HIGH_AVCC)));

    let err = transcoder.run(&source).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CodecUnsupported);
    assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    assert_eq!(
        observer.states(),
        vec![PipelineState::CheckingSupport, PipelineState::Error]
    );
}

#[tokio::test]
async fn unknown_container_is_format_unsupported() {
    let mut options = options();
    options.output_format = "webm".into();
    let mut transcoder = Transcoder::new(options, Arc::new(PassthroughCodecs::new()));
    let source = CountingSource::new(source_file(2, 0, Some(&HIGH_AVCC)));

    let err = transcoder.run(&source).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FormatUnsupported);
    assert!(err.message.contains("webm"), "got: {}", err.message);
    assert_eq!(source.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn decode_error_closes_engines_and_reports() {
    let (mut transcoder, observer) = scripted(Script {
        fail_decode_at: Some(3),
        ..Default::default()
    });
    let input = source_file(10, 0, Some(&HIGH_AVCC));
    let err = transcoder.run(&MemorySource::new(input)).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Decode);
    assert!(err.message.contains("frame 3"));
    assert_eq!(transcoder.state(), PipelineState::Error);
    assert!(observer.decoder_closed.load(Ordering::SeqCst));
    assert!(observer.encoder_closed.load(Ordering::SeqCst));
    assert_eq!(observer.count(is_finalizing), 0);
    assert_eq!(observer.count(|e| matches!(e, TranscodeEvent::Error { .. })), 1);
}

#[tokio::test]
async fn cancelled_run_is_destroyed() {
    let (mut transcoder, observer) = scripted(Script::default());
    transcoder.cancellation_token().cancel();
    let input = source_file(3, 0, Some(&HIGH_AVCC));

    let err = transcoder.run(&MemorySource::new(input)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(transcoder.state(), PipelineState::Destroyed);
    assert_eq!(observer.count(|e| matches!(e, TranscodeEvent::Destroyed)), 1);

    transcoder.destroy();
    assert_eq!(observer.count(|e| matches!(e, TranscodeEvent::Destroyed)), 1);
}

#[tokio::test]
async fn transcoder_runs_once() {
    let mut transcoder = Transcoder::new(options(), Arc::new(PassthroughCodecs::new()));
    let source = MemorySource::new(source_file(3, 0, Some(&HIGH_AVCC)));
    transcoder.run(&source).await.unwrap();
    let err = transcoder.run(&source).await.unwrap_err();
    assert_matches!(err.kind, ErrorKind::Unknown);
    assert_eq!(transcoder.state(), PipelineState::Complete);
}

#[tokio::test]
async fn decoder_hang_up_after_flush_still_completes() {
    let (mut transcoder, observer) = scripted(Script {
        hold_encoder_output: true,
        hang_up_after_flush: true,
        ..Default::default()
    });
    let input = source_file(6, 0, Some(&HIGH_AVCC));
    let output = transcoder.run(&MemorySource::new(input)).await.unwrap();

    assert_eq!(transcoder.state(), PipelineState::Complete);
    assert_eq!(observer.count(is_finalizing), 1);
    assert_eq!(observer.encoded_seen.load(Ordering::SeqCst), 6);
    let media = demux(&MemorySource::new(output)).await.unwrap();
    assert_eq!(media.video_track().unwrap().sample_count(), 6);
}

#[tokio::test]
async fn passthrough_rejects_codec_family_change() {
    let mut options = options();
    options.output.codec = "avc1.640028".into();
    let observer = Arc::new(Observer::default());
    let mut transcoder = Transcoder::new(options, Arc::new(PassthroughCodecs::new()))
        .with_events(observer.sender());

    let err = transcoder
        .run(&MemorySource::new(av1_source_file(4)))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CodecUnsupported);
    assert!(err.message.contains("av01.0.08M.08"), "got: {}", err.message);
    assert_eq!(
        observer.states(),
        vec![
            PipelineState::CheckingSupport,
            PipelineState::Demuxing,
            PipelineState::Error,
        ]
    );
}

#[tokio::test]
async fn muxer_drops_source_description_on_codec_family_change() {
    let media = demux(&MemorySource::new(av1_source_file(3))).await.unwrap();
    let mut muxer = Mp4Format
        .create_muxer(
            &media,
            Some(VideoDescription {
                codec: "avc1.640028".into(),
                width: 0,
                height: 0,
                description: None,
            }),
            0.0,
        )
        .unwrap();
    for i in 0..3 {
        muxer.push_video_sample(video_frame(i)).unwrap();
    }
    let output = muxer.finish().unwrap();

    assert!(output.windows(4).any(|w| w == b"avc1"));
    assert!(!output.windows(4).any(|w| w == b"av1C"));
    assert!(!output.windows(4).any(|w| w == b"av01"));
}
