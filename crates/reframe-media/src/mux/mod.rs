//! Progressive MP4 writer.
//!
//! Samples are pushed per track and held until [`Mp4Muxer::finish`], which
//! interleaves them into a single `mdat` and writes `ftyp` + `moov` in front
//! of it. Chunk offsets are only known once `moov` has been sized, so `moov`
//! is serialized twice: once to measure it, once more after every chunk
//! offset has been moved past the header boxes.

mod boxes;
mod table_builder;

pub use table_builder::{MuxSample, MuxTrack, SampleEntryKind, VideoDescription};

use bytes::{Bytes, BytesMut};

use crate::mp4::TrackKind;
use crate::{Error, Result};

/// Default interleave window in seconds.
pub const DEFAULT_CHUNK_DURATION: f64 = 1.0;

/// Builds one MP4 file from pushed samples.
#[derive(Debug)]
pub struct Mp4Muxer {
    tracks: Vec<MuxTrack>,
    /// Maps a video index to its position in `tracks`.
    video: Vec<usize>,
    audio: Vec<usize>,
    chunk_duration: f64,
}

impl Mp4Muxer {
    /// Create a muxer over `tracks`. Track ids are assigned in order from 1.
    pub fn new(mut tracks: Vec<MuxTrack>) -> Self {
        let mut video = Vec::new();
        let mut audio = Vec::new();
        for (i, track) in tracks.iter_mut().enumerate() {
            track.id = i as u32 + 1;
            match track.kind {
                TrackKind::Video => video.push(i),
                TrackKind::Audio => audio.push(i),
            }
        }
        Self {
            tracks,
            video,
            audio,
            chunk_duration: DEFAULT_CHUNK_DURATION,
        }
    }

    /// Interleave window in seconds of each track's own timescale.
    pub fn with_chunk_duration(mut self, secs: f64) -> Self {
        self.chunk_duration = secs;
        self
    }

    pub fn tracks(&self) -> &[MuxTrack] {
        &self.tracks
    }

    pub fn video_track_mut(&mut self, index: usize) -> Option<&mut MuxTrack> {
        let pos = *self.video.get(index)?;
        self.tracks.get_mut(pos)
    }

    pub fn push_video_sample(&mut self, index: usize, sample: MuxSample) -> Result<()> {
        let pos = *self.video.get(index).ok_or(Error::UnknownTrack {
            kind: "video",
            index,
        })?;
        self.tracks[pos].push(sample);
        Ok(())
    }

    pub fn push_audio_sample(&mut self, index: usize, sample: MuxSample) -> Result<()> {
        let pos = *self.audio.get(index).ok_or(Error::UnknownTrack {
            kind: "audio",
            index,
        })?;
        self.tracks[pos].push(sample);
        Ok(())
    }

    fn window(&self, track: &MuxTrack) -> u64 {
        (track.timescale as f64 * self.chunk_duration).round().max(1.0) as u64
    }

    /// Lay out every pushed sample into one data section.
    ///
    /// Tracks take turns writing one chunk each until all are drained. Chunk
    /// offsets are relative to the start of the returned buffer and the stsc
    /// tables hold one entry per chunk.
    pub fn build_data_section(&mut self) -> Bytes {
        let total: u64 = self.tracks.iter().map(MuxTrack::total_byte_length).sum();
        let mut out = BytesMut::with_capacity(total as usize);
        let windows: Vec<u64> = self.tracks.iter().map(|t| self.window(t)).collect();
        for track in &mut self.tracks {
            track.reset_layout();
        }
        while self.tracks.iter().any(|t| !t.is_drained()) {
            for (track, window) in self.tracks.iter_mut().zip(&windows) {
                track.write_chunk(&mut out, *window);
            }
        }
        out.freeze()
    }

    /// Serialize the complete file.
    ///
    /// Tracks without samples are left out. Fails with [`Error::NoSamples`]
    /// when no track has any.
    pub fn finish(mut self) -> Result<Bytes> {
        self.tracks.retain(|t| t.sample_count() > 0);
        if self.tracks.is_empty() {
            return Err(Error::NoSamples);
        }
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.id = i as u32 + 1;
        }

        let data = self.build_data_section();
        for track in &mut self.tracks {
            track.compact_chunk_runs();
        }

        let mut ftyp = BytesMut::new();
        boxes::write_ftyp(&mut ftyp);
        let mdat_header = boxes::mdat_header(data.len() as u64);

        let mut moov = BytesMut::new();
        boxes::write_moov(&mut moov, &self.tracks)?;
        let mut applied = 0u64;
        loop {
            let base = (ftyp.len() + moov.len() + mdat_header.len()) as u64;
            for track in &mut self.tracks {
                track.rebase(base - applied);
            }
            applied = base;

            let mut rebased = BytesMut::new();
            boxes::write_moov(&mut rebased, &self.tracks)?;
            // Only grows when an offset crossed into co64 territory.
            let stable = rebased.len() == moov.len();
            moov = rebased;
            if stable {
                break;
            }
        }

        tracing::debug!(
            "muxed {} tracks: moov {} bytes, mdat {} bytes",
            self.tracks.len(),
            moov.len(),
            data.len()
        );

        let mut out =
            BytesMut::with_capacity(ftyp.len() + moov.len() + mdat_header.len() + data.len());
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        out.extend_from_slice(&mdat_header);
        out.extend_from_slice(&data);
        Ok(out.freeze())
    }
}
