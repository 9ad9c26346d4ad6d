//! Write-side track state: pushed samples and the tables rebuilt from them.

use bytes::{BufMut, Bytes, BytesMut};

use crate::mp4::{SampleToChunk, TimeToSample, Track, TrackKind};
use crate::{Error, Result};

/// Sample entry box written for a track, chosen from its codec string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEntryKind {
    /// `avc1` with `avcC`.
    Avc,
    /// `av01` with `av1C`.
    Av1,
    /// `mp4a` with `esds`.
    Aac,
}

impl SampleEntryKind {
    pub fn from_codec(codec: &str) -> Result<Self> {
        let fourcc = codec.split('.').next().unwrap_or_default();
        match fourcc {
            "avc1" | "avc3" => Ok(Self::Avc),
            "av01" => Ok(Self::Av1),
            "mp4a" => Ok(Self::Aac),
            _ => Err(Error::unsupported(format!("cannot mux codec {codec}"))),
        }
    }
}

/// One sample handed to the muxer.
#[derive(Debug, Clone)]
pub struct MuxSample {
    pub data: Bytes,
    /// Duration in the track's timescale.
    pub duration: u32,
    pub is_key_frame: bool,
}

/// Encoder-provided video configuration that replaces what the source declared.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDescription {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub description: Option<Bytes>,
}

/// Track being written.
///
/// Samples are only collected on push; the run-length tables are produced
/// when the data section is laid out.
#[derive(Debug, Clone)]
pub struct MuxTrack {
    pub(crate) id: u32,
    pub kind: TrackKind,
    pub timescale: u32,
    pub width: u32,
    pub height: u32,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub sample_size: u16,
    codec: String,
    pub(crate) sample_entry: SampleEntryKind,
    pub description: Option<Bytes>,
    samples: Vec<MuxSample>,
    total_byte_length: u64,

    pub(crate) sample_sizes: Vec<u32>,
    pub(crate) sync_samples: Vec<u32>,
    pub(crate) time_to_samples: Vec<TimeToSample>,
    pub(crate) sample_to_chunks: Vec<SampleToChunk>,
    pub(crate) chunk_offsets: Vec<u64>,

    cursor: usize,
    end_time: u64,
    last_end_time: u64,
}

impl MuxTrack {
    fn new(kind: TrackKind, codec: String, timescale: u32) -> Result<Self> {
        let sample_entry = SampleEntryKind::from_codec(&codec)?;
        Ok(Self {
            id: 0,
            kind,
            timescale,
            width: 0,
            height: 0,
            channel_count: 0,
            sample_rate: 0,
            sample_size: 0,
            codec,
            sample_entry,
            description: None,
            samples: Vec::new(),
            total_byte_length: 0,
            sample_sizes: Vec::new(),
            sync_samples: Vec::new(),
            time_to_samples: Vec::new(),
            sample_to_chunks: Vec::new(),
            chunk_offsets: Vec::new(),
            cursor: 0,
            end_time: 0,
            last_end_time: 0,
        })
    }

    pub fn video(codec: impl Into<String>, timescale: u32, width: u32, height: u32) -> Result<Self> {
        let mut track = Self::new(TrackKind::Video, codec.into(), timescale)?;
        track.width = width;
        track.height = height;
        Ok(track)
    }

    pub fn audio(
        codec: impl Into<String>,
        timescale: u32,
        channel_count: u16,
        sample_rate: u32,
    ) -> Result<Self> {
        let mut track = Self::new(TrackKind::Audio, codec.into(), timescale)?;
        track.channel_count = channel_count;
        track.sample_rate = sample_rate;
        track.sample_size = 16;
        Ok(track)
    }

    /// Attach the decoder configuration written inside the sample entry.
    pub fn with_description(mut self, description: Bytes) -> Self {
        self.description = Some(description);
        self
    }

    /// Mirror a demuxed track: codec, geometry or audio format, description.
    pub fn from_track(track: &Track) -> Result<Self> {
        let codec = track
            .codec
            .clone()
            .or_else(|| track.sample_entry.map(|e| e.to_string()))
            .ok_or_else(|| Error::unsupported(format!("track {} has no codec", track.id)))?;
        let mut mux = Self::new(track.kind, codec, track.timescale)?;
        mux.width = track.width;
        mux.height = track.height;
        mux.channel_count = track.channel_count;
        mux.sample_rate = track.sample_rate;
        mux.sample_size = if track.sample_size == 0 { 16 } else { track.sample_size };
        mux.description = track.description.clone();
        Ok(mux)
    }

    /// Replace codec, dimensions and description with an encoder's output config.
    ///
    /// The source description survives only while the sample entry kind is
    /// unchanged; a new codec family drops it unless the encoder supplies one.
    pub fn set_video_description(&mut self, config: VideoDescription) -> Result<()> {
        let sample_entry = SampleEntryKind::from_codec(&config.codec)?;
        if sample_entry != self.sample_entry || config.description.is_some() {
            self.description = config.description;
        }
        self.sample_entry = sample_entry;
        self.codec = config.codec;
        if config.width != 0 {
            self.width = config.width;
        }
        if config.height != 0 {
            self.height = config.height;
        }
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn push(&mut self, sample: MuxSample) {
        self.total_byte_length += sample.data.len() as u64;
        self.samples.push(sample);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn total_byte_length(&self) -> u64 {
        self.total_byte_length
    }

    /// Sum of pushed sample durations, in the track's timescale.
    pub fn total_duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    pub(crate) fn all_key_frames(&self) -> bool {
        self.samples.iter().all(|s| s.is_key_frame)
    }

    pub fn sample_sizes(&self) -> &[u32] {
        &self.sample_sizes
    }

    /// 1-based numbers of the key frames written so far.
    pub fn sync_samples(&self) -> &[u32] {
        &self.sync_samples
    }

    pub fn time_to_samples(&self) -> &[TimeToSample] {
        &self.time_to_samples
    }

    pub fn sample_to_chunks(&self) -> &[SampleToChunk] {
        &self.sample_to_chunks
    }

    pub fn chunk_offsets(&self) -> &[u64] {
        &self.chunk_offsets
    }

    pub(crate) fn reset_layout(&mut self) {
        self.sample_sizes.clear();
        self.sync_samples.clear();
        self.time_to_samples.clear();
        self.sample_to_chunks.clear();
        self.chunk_offsets.clear();
        self.cursor = 0;
        self.end_time = 0;
        self.last_end_time = 0;
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.cursor >= self.samples.len()
    }

    /// Write the next chunk of samples to `out`.
    ///
    /// A chunk holds every sample that ends inside the current time window,
    /// and always at least one. The window boundary never lags the time
    /// already consumed, so long samples do not leave every later chunk
    /// holding a single sample.
    pub(crate) fn write_chunk(&mut self, out: &mut BytesMut, window: u64) {
        if self.is_drained() {
            return;
        }
        self.end_time = self.end_time.max(self.last_end_time) + window.max(1);
        self.chunk_offsets.push(out.len() as u64);
        let chunk_number = self.chunk_offsets.len() as u32;
        self.sample_to_chunks.push(SampleToChunk::new(chunk_number, 0, 1));

        let mut in_chunk = 0u32;
        while let Some(sample) = self.samples.get(self.cursor) {
            let sample_end = self.last_end_time + sample.duration as u64;
            if in_chunk > 0 && sample_end > self.end_time {
                break;
            }
            out.put_slice(&sample.data);
            self.last_end_time = sample_end;
            self.cursor += 1;
            in_chunk += 1;

            let number = self.cursor as u32;
            self.sample_sizes.push(sample.data.len() as u32);
            if sample.is_key_frame {
                self.sync_samples.push(number);
            }
            match self.time_to_samples.last_mut() {
                Some(run) if run.sample_delta == sample.duration => run.sample_count += 1,
                _ => self.time_to_samples.push(TimeToSample {
                    sample_count: 1,
                    sample_delta: sample.duration,
                }),
            }
        }
        if let Some(run) = self.sample_to_chunks.last_mut() {
            run.samples_per_chunk = in_chunk;
        }
    }

    /// Merge adjacent stsc runs that share a samples-per-chunk count.
    pub(crate) fn compact_chunk_runs(&mut self) {
        self.sample_to_chunks.dedup_by(|next, prev| {
            next.samples_per_chunk == prev.samples_per_chunk
                && next.sample_description_index == prev.sample_description_index
        });
    }

    /// Shift every chunk offset by `delta` bytes.
    pub(crate) fn rebase(&mut self, delta: u64) {
        for offset in &mut self.chunk_offsets {
            *offset += delta;
        }
    }
}
