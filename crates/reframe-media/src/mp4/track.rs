//! Track records and the visitor that assembles them from decoded boxes.

use bytes::Bytes;
#[cfg(feature = "serialize")]
use serde::Serialize;

use super::boxes::{BoxPayload, BoxVisitor, FileType, Mp4Box};
use super::sample_table::{
    annotate_chunk_ranges, Sample, SampleIndex, SampleToChunk, TimeToSample,
};
use super::{BoxType, HandlerType};
use crate::{Error, Result};

/// Kind of elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "lowercase"))]
pub enum TrackKind {
    Video,
    Audio,
}

/// One demuxed track with its sample tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u32,
    pub kind: TrackKind,
    pub timescale: u32,
    /// Duration in `timescale` units, as declared by mdhd.
    pub duration: u64,
    pub width: u32,
    pub height: u32,
    pub volume: f32,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub sample_size: u16,
    /// Codec string, e.g. `avc1.64001f`, `av01.0.08M.08` or `mp4a.40.2`.
    pub codec: Option<String>,
    /// Type of the first stsd entry (`avc1`, `av01`, `mp4a`, ...).
    pub sample_entry: Option<BoxType>,
    /// Out-of-band decoder configuration: the avcC or av1C record for video,
    /// the esds descriptor for audio.
    pub description: Option<Bytes>,
    pub audio_object_type: Option<u8>,
    pub sampling_frequency_index: Option<u8>,
    pub sample_sizes: Vec<u32>,
    pub time_to_samples: Vec<TimeToSample>,
    pub sample_to_chunks: Vec<SampleToChunk>,
    pub chunk_offsets: Vec<u64>,
    /// `None` when the track has no stss box.
    pub sync_samples: Option<Vec<u32>>,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: 0,
            kind,
            timescale: 0,
            duration: 0,
            width: 0,
            height: 0,
            volume: 0.0,
            channel_count: 0,
            sample_rate: 0,
            sample_size: 0,
            codec: None,
            sample_entry: None,
            description: None,
            audio_object_type: None,
            sampling_frequency_index: None,
            sample_sizes: Vec::new(),
            time_to_samples: Vec::new(),
            sample_to_chunks: Vec::new(),
            chunk_offsets: Vec::new(),
            sync_samples: None,
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_sizes.len() as u32
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// Build a lookup index over this track's tables.
    pub fn index(&self) -> SampleIndex {
        SampleIndex::new(self)
    }

    /// Human-oriented summary without the sample tables.
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id,
            kind: self.kind,
            codec: self.codec.clone(),
            timescale: self.timescale,
            duration_secs: self.duration_secs(),
            width: self.is_video().then_some(self.width),
            height: self.is_video().then_some(self.height),
            channel_count: (!self.is_video()).then_some(self.channel_count),
            sample_rate: (!self.is_video()).then_some(self.sample_rate),
            sample_count: self.sample_count(),
            chunk_count: self.chunk_offsets.len() as u32,
            sync_sample_count: self.sync_samples.as_ref().map(|s| s.len() as u32),
        }
    }
}

/// Track metadata for display.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize))]
pub struct TrackSummary {
    pub id: u32,
    pub kind: TrackKind,
    pub codec: Option<String>,
    pub timescale: u32,
    pub duration_secs: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channel_count: Option<u16>,
    pub sample_rate: Option<u32>,
    pub sample_count: u32,
    pub chunk_count: u32,
    pub sync_sample_count: Option<u32>,
}

/// Tracks recovered from one demux pass.
#[derive(Debug, Clone)]
pub struct DemuxedMedia {
    pub major_brand: Option<[u8; 4]>,
    /// Movie timescale and duration from mvhd.
    pub timescale: u32,
    pub duration: u64,
    pub video_tracks: Vec<Track>,
    pub audio_tracks: Vec<Track>,
    video_indexes: Vec<SampleIndex>,
    audio_indexes: Vec<SampleIndex>,
}

impl DemuxedMedia {
    /// The track the pipeline decodes.
    pub fn video_track(&self) -> Option<&Track> {
        self.video_tracks.first()
    }

    pub fn width(&self) -> u32 {
        self.video_track().map_or(0, |t| t.width)
    }

    pub fn height(&self) -> u32 {
        self.video_track().map_or(0, |t| t.height)
    }

    /// Video duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.video_track().map_or(0.0, Track::duration_secs)
    }

    /// Sample `n` (1-based) of the first video track.
    pub fn video_sample(&self, n: u32) -> Option<Sample> {
        self.video_indexes.first()?.sample(n)
    }

    /// Sample `n` (1-based) of the given audio track.
    pub fn audio_sample(&self, n: u32, track_index: usize) -> Option<Sample> {
        self.audio_indexes.get(track_index)?.sample(n)
    }

    /// Whether sample `n` of the first video track is a sync sample.
    pub fn is_key_frame(&self, n: u32) -> bool {
        self.video_indexes
            .first()
            .map_or(false, |index| index.is_key_frame(n))
    }

    pub fn video_index(&self) -> Option<&SampleIndex> {
        self.video_indexes.first()
    }

    pub fn audio_index(&self, track_index: usize) -> Option<&SampleIndex> {
        self.audio_indexes.get(track_index)
    }
}

/// Accumulates fields for the track currently being read.
#[derive(Debug)]
struct TrackBuilder {
    track: Track,
    tkhd_width: u32,
    tkhd_height: u32,
}

impl TrackBuilder {
    fn new() -> Self {
        Self {
            track: Track::new(TrackKind::Video),
            tkhd_width: 0,
            tkhd_height: 0,
        }
    }

    fn build(mut self, kind: TrackKind) -> Track {
        self.track.kind = kind;
        if self.track.width == 0 {
            self.track.width = self.tkhd_width;
        }
        if self.track.height == 0 {
            self.track.height = self.tkhd_height;
        }
        let sample_count = self.track.sample_count();
        annotate_chunk_ranges(&mut self.track.sample_to_chunks, sample_count);
        self.track
    }
}

/// Reduces the decoded box sequence into video and audio track lists.
///
/// Fields are gathered into a working track until its `trak` box closes; the
/// most recent `hdlr` decides whether it lands in the video or audio list.
/// Tracks with any other handler are dropped.
#[derive(Debug)]
pub struct TrackAssembler {
    current: TrackBuilder,
    handler: Option<HandlerType>,
    file_type: Option<FileType>,
    timescale: u32,
    duration: u64,
    video_tracks: Vec<Track>,
    audio_tracks: Vec<Track>,
}

impl TrackAssembler {
    pub fn new() -> Self {
        Self {
            current: TrackBuilder::new(),
            handler: None,
            file_type: None,
            timescale: 0,
            duration: 0,
            video_tracks: Vec::new(),
            audio_tracks: Vec::new(),
        }
    }

    fn close_track(&mut self) {
        let builder = std::mem::replace(&mut self.current, TrackBuilder::new());
        match self.handler.take() {
            Some(HandlerType::Video) => {
                let track = builder.build(TrackKind::Video);
                tracing::debug!(
                    "video track {} ({:?}, {} samples)",
                    track.id,
                    track.codec,
                    track.sample_count()
                );
                self.video_tracks.push(track);
            }
            Some(HandlerType::Audio) => {
                let track = builder.build(TrackKind::Audio);
                tracing::debug!(
                    "audio track {} ({:?}, {} samples)",
                    track.id,
                    track.codec,
                    track.sample_count()
                );
                self.audio_tracks.push(track);
            }
            other => {
                tracing::debug!("ignoring track {} with handler {:?}", builder.track.id, other);
            }
        }
    }

    /// Validate the collected tracks and build sample indexes.
    ///
    /// Fails when there is no video track, or when the first video track's
    /// sample entry lacks the configuration box decoders need.
    pub fn finish(self) -> Result<DemuxedMedia> {
        let video = self.video_tracks.first().ok_or(Error::NoVideoTrack)?;
        if video.codec.is_none() {
            return Err(match video.sample_entry {
                Some(entry) if entry == BoxType::AVC1 || entry == BoxType::AV01 => {
                    Error::MissingCodecConfig {
                        codec: entry.to_string(),
                    }
                }
                Some(entry) => Error::unsupported(format!("video sample entry {entry}")),
                None => Error::invalid_box(BoxType::STSD, "video track has no sample entry"),
            });
        }
        if video.sample_entry == Some(BoxType::AVC1) && video.description.is_none() {
            return Err(Error::MissingCodecConfig {
                codec: BoxType::AVC1.to_string(),
            });
        }

        let video_indexes = self.video_tracks.iter().map(SampleIndex::new).collect();
        let audio_indexes = self.audio_tracks.iter().map(SampleIndex::new).collect();
        Ok(DemuxedMedia {
            major_brand: self.file_type.map(|f| f.major_brand),
            timescale: self.timescale,
            duration: self.duration,
            video_tracks: self.video_tracks,
            audio_tracks: self.audio_tracks,
            video_indexes,
            audio_indexes,
        })
    }
}

impl Default for TrackAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxVisitor for TrackAssembler {
    fn visit(&mut self, parsed: &Mp4Box) -> Result<()> {
        let track = &mut self.current.track;
        match &parsed.payload {
            BoxPayload::FileType(ftyp) if parsed.box_type == BoxType::FTYP => {
                self.file_type = Some(ftyp.clone());
            }
            BoxPayload::MovieHeader(mvhd) => {
                self.timescale = mvhd.timescale;
                self.duration = mvhd.duration;
            }
            BoxPayload::Handler(hdlr) => match HandlerType::from_bytes(hdlr.handler_type) {
                h @ (HandlerType::Video | HandlerType::Audio) => self.handler = Some(h),
                HandlerType::Other(_) => {}
            },
            BoxPayload::MediaHeader(mdhd) => {
                track.timescale = mdhd.timescale;
                track.duration = mdhd.duration;
            }
            BoxPayload::TrackHeader(tkhd) => {
                track.id = tkhd.track_id;
                track.volume =
                    tkhd.volume.integer as f32 + tkhd.volume.fraction as f32 / 256.0;
                self.current.tkhd_width = tkhd.width.integer as u32;
                self.current.tkhd_height = tkhd.height.integer as u32;
            }
            BoxPayload::SampleSizes(stsz) => track.sample_sizes = stsz.sizes(),
            BoxPayload::ChunkOffsets(offsets) => track.chunk_offsets = offsets.clone(),
            BoxPayload::SampleToChunk(runs) => track.sample_to_chunks = runs.clone(),
            BoxPayload::SyncSamples(sync) => track.sync_samples = Some(sync.clone()),
            BoxPayload::TimeToSample(runs) => track.time_to_samples = runs.clone(),
            BoxPayload::SampleDescription(entries) => {
                track.sample_entry = entries.first().map(|e| e.box_type);
            }
            BoxPayload::VisualSampleEntry(entry) => {
                if entry.width != 0 {
                    track.width = entry.width as u32;
                }
                if entry.height != 0 {
                    track.height = entry.height as u32;
                }
            }
            BoxPayload::AudioSampleEntry(entry) => {
                track.channel_count = entry.channel_count;
                track.sample_size = entry.sample_size;
                track.sample_rate = entry.sample_rate.integer as u32;
            }
            BoxPayload::AvcConfig(avcc) => {
                track.codec = Some(avcc.codec_string());
                track.description = Some(avcc.raw.clone());
            }
            BoxPayload::Av1Config(av1c) => {
                track.codec = Some(av1c.codec_string());
                track.description = Some(av1c.raw.clone());
            }
            BoxPayload::EsDescriptor(esds) => {
                track.codec = Some(esds.codec_string());
                track.description = Some(esds.raw.clone());
                if let Some(asc) = esds.audio_config {
                    track.audio_object_type = Some(asc.audio_object_type);
                    track.sampling_frequency_index = Some(asc.sampling_frequency_index);
                }
            }
            BoxPayload::Container(_) if parsed.box_type == BoxType::TRAK => self.close_track(),
            _ => {}
        }
        Ok(())
    }
}
