//! MP4 (ISO-BMFF) demuxing.
//!
//! Reading is split in three layers:
//! - [`BoxReader`] walks top-level boxes over a [`ByteSource`], never fetching `mdat`
//! - [`BoxParser`] decodes payloads through a [`BoxRegistry`] and reports every
//!   finished box, children first
//! - [`TrackAssembler`] folds those boxes into [`Track`] records
//!
//! [`SampleIndex`] then answers per-sample offset, size, duration and sync
//! queries against the assembled tables.

mod atoms;
pub mod boxes;
pub mod codec_config;
pub(crate) mod fields;
mod reader;
mod sample_table;
mod track;

pub use atoms::{BoxHeader, BoxSize, BoxType, HandlerType, HEADER_SIZE, LARGE_HEADER_SIZE};
pub use boxes::{BoxParser, BoxPayload, BoxRegistry, BoxVisitor, DecodeFn, Mp4Box};
pub use codec_config::{AudioSpecificConfig, Av1Config, AvcConfig, EsDescriptor};
pub use reader::{BoxReader, TopLevelBox};
pub use sample_table::{annotate_chunk_ranges, Sample, SampleIndex, SampleToChunk, TimeToSample};
pub use track::{DemuxedMedia, Track, TrackAssembler, TrackKind, TrackSummary};

use crate::source::ByteSource;
use crate::Result;

/// Demux `source` with the default box registry.
pub async fn demux(source: &dyn ByteSource) -> Result<DemuxedMedia> {
    demux_with_registry(source, &BoxRegistry::with_defaults()).await
}

/// Demux `source`, decoding boxes through `registry`.
pub async fn demux_with_registry(
    source: &dyn ByteSource,
    registry: &BoxRegistry,
) -> Result<DemuxedMedia> {
    let mut assembler = TrackAssembler::new();
    walk_boxes(source, registry, &mut assembler).await?;
    assembler.finish()
}

/// Decode every top-level box of `source` and report each decoded box,
/// nested ones included, to `visitor`.
pub async fn walk_boxes(
    source: &dyn ByteSource,
    registry: &BoxRegistry,
    visitor: &mut (dyn BoxVisitor + Send),
) -> Result<()> {
    let mut reader = BoxReader::new(source);
    while let Some(top) = reader.next_box().await? {
        let mut parser = BoxParser::new(registry, visitor).with_media_size(source.size());
        match top.payload {
            Some(payload) => parser.parse_box(top.box_type, top.size, payload)?,
            None => parser.skip_box(top.box_type, top.size)?,
        };
    }
    Ok(())
}
