//! Reframe-Media: MP4 demuxing, sample tables and progressive MP4 muxing
//!
//! This crate is the container layer of reframe. It reads an ISO-BMFF file
//! into tracks with random-access sample lookup, and writes pushed samples
//! back out as a single progressive MP4.
//!
//! # Modules
//!
//! - `source` - Byte-range access to the input (file or memory)
//! - `mp4` - Box reader, box parser registry, track assembly, sample index
//! - `mux` - Sample table rebuilding, chunk interleaving, two-pass finalization
//!
//! # Reading
//!
//! Only top-level boxes are read from the source, one range each. `mdat` is
//! skipped by offset; sample payloads are fetched later by the caller using
//! the offsets from [`mp4::SampleIndex`].
//!
//! # Writing
//!
//! [`mux::Mp4Muxer`] keeps pushed samples until `finish`, then:
//! 1. Interleaves tracks into one data section, one time window per chunk
//! 2. Serializes `moov` to learn its size
//! 3. Moves every chunk offset past `ftyp` + `moov` + the `mdat` header
//! 4. Serializes `moov` again with the final offsets

pub mod error;
pub mod mp4;
pub mod mux;
pub mod source;

pub use error::{Error, Result};
pub use mp4::{demux, DemuxedMedia, Sample, SampleIndex, Track, TrackKind};
pub use mux::{Mp4Muxer, MuxSample, MuxTrack, VideoDescription};
pub use source::{ByteSource, FileSource, MemorySource};
