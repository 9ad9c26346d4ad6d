//! Box tree decoding.
//!
//! A [`BoxRegistry`] maps box types to decode functions. [`BoxParser`] walks a
//! byte range, dispatches each box through the registry and hands every
//! decoded box to a [`BoxVisitor`] as soon as it is complete. Children are
//! delivered before their parent, so a visitor sees `trak` only after
//! everything inside it.

use std::collections::HashMap;

use bytes::Bytes;

use super::codec_config::{Av1Config, AvcConfig, EsDescriptor};
use super::fields::FieldReader;
use super::sample_table::{SampleToChunk, TimeToSample};
use super::{BoxHeader, BoxType, HEADER_SIZE};
use crate::{Error, Result};

/// Nesting limit for container boxes.
const MAX_DEPTH: usize = 32;

/// Samples a `trun` may declare without per-sample fields.
const MAX_IMPLICIT_RUN_SAMPLES: u64 = 1 << 20;

/// Unsigned 16.16 fixed-point value split into its halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed16 {
    pub integer: u16,
    pub fraction: u16,
}

impl Fixed16 {
    fn from_bits(v: u32) -> Self {
        Self {
            integer: (v >> 16) as u16,
            fraction: (v & 0xffff) as u16,
        }
    }

    pub fn to_f64(self) -> f64 {
        self.integer as f64 + self.fraction as f64 / 65536.0
    }
}

/// Unsigned 8.8 fixed-point value (volume).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed8 {
    pub integer: u8,
    pub fraction: u8,
}

impl Fixed8 {
    fn from_bits(v: u16) -> Self {
        Self {
            integer: (v >> 8) as u8,
            fraction: (v & 0xff) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieHeader {
    pub version: u8,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: Fixed16,
    pub volume: Fixed8,
    pub matrix: [Fixed16; 9],
    pub next_track_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHeader {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub duration: u64,
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: Fixed8,
    pub matrix: [Fixed16; 9],
    pub width: Fixed16,
    pub height: Fixed16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHeader {
    pub version: u8,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// ISO-639-2/T code, e.g. `und`.
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    pub handler_type: [u8; 4],
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualSampleEntry {
    pub data_reference_index: u16,
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: Fixed16,
    pub vert_resolution: Fixed16,
    pub frame_count: u16,
    pub compressor_name: String,
    pub depth: u16,
    pub children: Vec<Mp4Box>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleEntry {
    pub data_reference_index: u16,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: Fixed16,
    pub children: Vec<Mp4Box>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRate {
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSizes {
    /// Non-zero when every sample has this size and `entries` is empty.
    pub sample_size: u32,
    pub sample_count: u32,
    pub entries: Vec<u32>,
}

impl SampleSizes {
    /// Per-sample sizes, expanding the uniform form.
    pub fn sizes(&self) -> Vec<u32> {
        if self.sample_size != 0 {
            vec![self.sample_size; self.sample_count as usize]
        } else {
            self.entries.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDependency {
    pub is_leading: u8,
    pub depends_on: u8,
    pub is_depended_on: u8,
    pub has_redundancy: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentReference {
    pub reference_type: u8,
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIndex {
    pub version: u8,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub references: Vec<SegmentReference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackExtends {
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackFragmentHeader {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackRunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<u32>,
    pub composition_time_offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRun {
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub samples: Vec<TrackRunSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressiveDownloadEntry {
    pub rate: u32,
    pub initial_delay: u32,
}

/// Decoded box contents.
#[derive(Debug, Clone, PartialEq)]
pub enum BoxPayload {
    Container(Vec<Mp4Box>),
    FileType(FileType),
    MovieHeader(MovieHeader),
    TrackHeader(TrackHeader),
    MediaHeader(MediaHeader),
    Handler(Handler),
    VideoMediaHeader { graphics_mode: u16, opcolor: [u16; 3] },
    SoundMediaHeader { balance: u16 },
    DataReference(Vec<Mp4Box>),
    DataEntryUrl { flags: u32 },
    SampleDescription(Vec<Mp4Box>),
    VisualSampleEntry(VisualSampleEntry),
    AudioSampleEntry(AudioSampleEntry),
    AvcConfig(AvcConfig),
    Av1Config(Av1Config),
    EsDescriptor(EsDescriptor),
    BitRate(BitRate),
    TimeToSample(Vec<TimeToSample>),
    SampleToChunk(Vec<SampleToChunk>),
    SampleSizes(SampleSizes),
    ChunkOffsets(Vec<u64>),
    SyncSamples(Vec<u32>),
    SampleDependencies(Vec<SampleDependency>),
    SegmentIndex(SegmentIndex),
    TrackExtends(TrackExtends),
    MovieFragmentHeader { sequence_number: u32 },
    TrackFragmentHeader(TrackFragmentHeader),
    TrackFragmentDecodeTime { base_media_decode_time: u64 },
    TrackRun(TrackRun),
    ProgressiveDownload(Vec<ProgressiveDownloadEntry>),
    /// Media data whose payload was never read.
    Skipped,
    /// Any type without a registered decoder.
    Raw(Bytes),
}

/// A decoded box.
#[derive(Debug, Clone, PartialEq)]
pub struct Mp4Box {
    pub box_type: BoxType,
    /// Total size including the header.
    pub size: u64,
    pub payload: BoxPayload,
}

impl Mp4Box {
    /// Direct children, for boxes that have any.
    pub fn children(&self) -> &[Mp4Box] {
        match &self.payload {
            BoxPayload::Container(c)
            | BoxPayload::DataReference(c)
            | BoxPayload::SampleDescription(c) => c,
            BoxPayload::VisualSampleEntry(e) => &e.children,
            BoxPayload::AudioSampleEntry(e) => &e.children,
            _ => &[],
        }
    }

    /// First direct child of the given type.
    pub fn child(&self, box_type: BoxType) -> Option<&Mp4Box> {
        self.children().iter().find(|b| b.box_type == box_type)
    }
}

/// Receives boxes as they finish decoding.
pub trait BoxVisitor {
    fn visit(&mut self, parsed: &Mp4Box) -> Result<()>;
}

impl<F> BoxVisitor for F
where
    F: FnMut(&Mp4Box) -> Result<()>,
{
    fn visit(&mut self, parsed: &Mp4Box) -> Result<()> {
        self(parsed)
    }
}

/// Decode function for one box type. Receives the payload after the header.
pub type DecodeFn = fn(&mut BoxParser<'_>, BoxType, Bytes) -> Result<BoxPayload>;

/// Mapping from box type to decoder. Unregistered types decode to
/// [`BoxPayload::Raw`].
#[derive(Clone)]
pub struct BoxRegistry {
    decoders: HashMap<BoxType, DecodeFn>,
}

impl BoxRegistry {
    /// A registry with no decoders; every box decodes as raw bytes.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry covering the boxes needed to demux progressive and
    /// fragmented MP4.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        for t in [
            BoxType::MOOV,
            BoxType::TRAK,
            BoxType::EDTS,
            BoxType::MDIA,
            BoxType::MINF,
            BoxType::DINF,
            BoxType::STBL,
            BoxType::UDTA,
            BoxType::MVEX,
            BoxType::MOOF,
            BoxType::TRAF,
        ] {
            reg.register(t, decode_container);
        }
        reg.register(BoxType::FTYP, decode_ftyp);
        reg.register(BoxType::STYP, decode_ftyp);
        reg.register(BoxType::PDIN, decode_pdin);
        reg.register(BoxType::MVHD, decode_mvhd);
        reg.register(BoxType::TKHD, decode_tkhd);
        reg.register(BoxType::MDHD, decode_mdhd);
        reg.register(BoxType::HDLR, decode_hdlr);
        reg.register(BoxType::VMHD, decode_vmhd);
        reg.register(BoxType::SMHD, decode_smhd);
        reg.register(BoxType::DREF, decode_dref);
        reg.register(BoxType::URL, decode_url);
        reg.register(BoxType::STSD, decode_stsd);
        reg.register(BoxType::AVC1, decode_visual_sample_entry);
        reg.register(BoxType::AV01, decode_visual_sample_entry);
        reg.register(BoxType::MP4A, decode_audio_sample_entry);
        reg.register(BoxType::AVCC, decode_avcc);
        reg.register(BoxType::AV1C, decode_av1c);
        reg.register(BoxType::ESDS, decode_esds);
        reg.register(BoxType::BTRT, decode_btrt);
        reg.register(BoxType::STTS, decode_stts);
        reg.register(BoxType::STSC, decode_stsc);
        reg.register(BoxType::STSZ, decode_stsz);
        reg.register(BoxType::STCO, decode_stco);
        reg.register(BoxType::CO64, decode_co64);
        reg.register(BoxType::STSS, decode_stss);
        reg.register(BoxType::SDTP, decode_sdtp);
        reg.register(BoxType::SIDX, decode_sidx);
        reg.register(BoxType::TREX, decode_trex);
        reg.register(BoxType::MFHD, decode_mfhd);
        reg.register(BoxType::TFHD, decode_tfhd);
        reg.register(BoxType::TFDT, decode_tfdt);
        reg.register(BoxType::TRUN, decode_trun);
        reg
    }

    /// Register or replace the decoder for a box type.
    pub fn register(&mut self, box_type: BoxType, decoder: DecodeFn) -> Option<DecodeFn> {
        self.decoders.insert(box_type, decoder)
    }

    pub fn get(&self, box_type: BoxType) -> Option<DecodeFn> {
        self.decoders.get(&box_type).copied()
    }

    pub fn contains(&self, box_type: BoxType) -> bool {
        self.decoders.contains_key(&box_type)
    }
}

impl Default for BoxRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for BoxRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().map(|t| t.to_string()).collect();
        types.sort();
        f.debug_struct("BoxRegistry").field("types", &types).finish()
    }
}

/// Recursive box decoder that reports each finished box to a visitor.
pub struct BoxParser<'a> {
    registry: &'a BoxRegistry,
    visitor: &'a mut dyn BoxVisitor,
    depth: usize,
    media_size: u64,
}

impl<'a> BoxParser<'a> {
    pub fn new(registry: &'a BoxRegistry, visitor: &'a mut dyn BoxVisitor) -> Self {
        Self {
            registry,
            visitor,
            depth: 0,
            media_size: u64::MAX,
        }
    }

    /// Bound sample counts that tables declare without listing by the size
    /// of the file they describe.
    pub fn with_media_size(mut self, media_size: u64) -> Self {
        self.media_size = media_size;
        self
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    /// Decode one box whose payload has already been read.
    pub fn parse_box(&mut self, box_type: BoxType, size: u64, payload: Bytes) -> Result<Mp4Box> {
        let payload = match self.registry.get(box_type) {
            Some(decode) => decode(self, box_type, payload)?,
            None => BoxPayload::Raw(payload),
        };
        self.emit(Mp4Box {
            box_type,
            size,
            payload,
        })
    }

    /// Report a box whose payload was skipped (media data).
    pub fn skip_box(&mut self, box_type: BoxType, size: u64) -> Result<Mp4Box> {
        self.emit(Mp4Box {
            box_type,
            size,
            payload: BoxPayload::Skipped,
        })
    }

    fn emit(&mut self, parsed: Mp4Box) -> Result<Mp4Box> {
        tracing::trace!("decoded {} ({} bytes)", parsed.box_type, parsed.size);
        self.visitor.visit(&parsed)?;
        Ok(parsed)
    }

    /// Decode a sequence of sibling boxes filling `data`.
    pub fn parse_children(&mut self, parent: BoxType, data: Bytes) -> Result<Vec<Mp4Box>> {
        if self.depth >= MAX_DEPTH {
            return Err(Error::invalid_box(parent, "boxes nested too deeply"));
        }
        self.depth += 1;
        let result = self.parse_sequence(parent, data);
        self.depth -= 1;
        result
    }

    fn parse_sequence(&mut self, parent: BoxType, data: Bytes) -> Result<Vec<Mp4Box>> {
        let mut boxes = Vec::new();
        let mut pos = 0usize;

        while data.len() - pos >= HEADER_SIZE {
            let Some(header) = BoxHeader::parse(&data[pos..]) else {
                return Err(Error::invalid_box(parent, "truncated 64-bit child header"));
            };
            let available = (data.len() - pos) as u64;
            let size = header.resolved_size(available);
            if size < header.header_size as u64 {
                tracing::warn!(
                    "{} child {} declares size {} smaller than its header",
                    parent,
                    header.box_type,
                    size
                );
                break;
            }
            if size > available {
                return Err(Error::invalid_box(
                    parent,
                    format!(
                        "child {} of {} bytes overruns {} remaining",
                        header.box_type, size, available
                    ),
                ));
            }
            let start = pos + header.header_size as usize;
            let end = pos + size as usize;
            boxes.push(self.parse_box(header.box_type, size, data.slice(start..end))?);
            pos = end;
        }

        Ok(boxes)
    }
}

fn decode_container(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    Ok(BoxPayload::Container(p.parse_children(t, data)?))
}

fn decode_ftyp(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let major_brand = r.fourcc()?;
    let minor_version = r.u32()?;
    let mut compatible_brands = Vec::with_capacity(r.remaining() / 4);
    while r.remaining() >= 4 {
        compatible_brands.push(r.fourcc()?);
    }
    Ok(BoxPayload::FileType(FileType {
        major_brand,
        minor_version,
        compatible_brands,
    }))
}

fn decode_pdin(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let mut entries = Vec::with_capacity(r.remaining() / 8);
    while r.remaining() >= 8 {
        entries.push(ProgressiveDownloadEntry {
            rate: r.u32()?,
            initial_delay: r.u32()?,
        });
    }
    Ok(BoxPayload::ProgressiveDownload(entries))
}

fn read_matrix(r: &mut FieldReader) -> Result<[Fixed16; 9]> {
    let mut matrix = [Fixed16::default(); 9];
    for m in matrix.iter_mut() {
        *m = Fixed16::from_bits(r.u32()?);
    }
    Ok(matrix)
}

fn decode_mvhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (version, _) = r.full_header()?;
    let creation_time = r.versioned(version)?;
    let modification_time = r.versioned(version)?;
    let timescale = r.u32()?;
    let duration = r.versioned(version)?;
    let rate = Fixed16::from_bits(r.u32()?);
    let volume = Fixed8::from_bits(r.u16()?);
    // reserved
    r.skip(10)?;
    let matrix = read_matrix(&mut r)?;
    // pre_defined
    r.skip(24)?;
    let next_track_id = r.u32()?;
    Ok(BoxPayload::MovieHeader(MovieHeader {
        version,
        creation_time,
        modification_time,
        timescale,
        duration,
        rate,
        volume,
        matrix,
        next_track_id,
    }))
}

fn decode_tkhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (version, flags) = r.full_header()?;
    let creation_time = r.versioned(version)?;
    let modification_time = r.versioned(version)?;
    let track_id = r.u32()?;
    r.skip(4)?;
    let duration = r.versioned(version)?;
    r.skip(8)?;
    let layer = r.u16()?;
    let alternate_group = r.u16()?;
    let volume = Fixed8::from_bits(r.u16()?);
    r.skip(2)?;
    let matrix = read_matrix(&mut r)?;
    let width = Fixed16::from_bits(r.u32()?);
    let height = Fixed16::from_bits(r.u32()?);
    Ok(BoxPayload::TrackHeader(TrackHeader {
        version,
        flags,
        creation_time,
        modification_time,
        track_id,
        duration,
        layer,
        alternate_group,
        volume,
        matrix,
        width,
        height,
    }))
}

fn decode_mdhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (version, _) = r.full_header()?;
    let creation_time = r.versioned(version)?;
    let modification_time = r.versioned(version)?;
    let timescale = r.u32()?;
    let duration = r.versioned(version)?;
    let packed = r.u16()?;
    let language = [(packed >> 10) & 0x1f, (packed >> 5) & 0x1f, packed & 0x1f]
        .iter()
        .map(|c| char::from((*c as u8).wrapping_add(0x60)))
        .collect();
    Ok(BoxPayload::MediaHeader(MediaHeader {
        version,
        creation_time,
        modification_time,
        timescale,
        duration,
        language,
    }))
}

fn decode_hdlr(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    // pre_defined
    r.skip(4)?;
    let handler_type = r.fourcc()?;
    r.skip(12)?;
    let rest = r.rest();
    let name_bytes = rest.split(|b| *b == 0).next().unwrap_or(&[]);
    Ok(BoxPayload::Handler(Handler {
        handler_type,
        name: String::from_utf8_lossy(name_bytes).into_owned(),
    }))
}

fn decode_vmhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    Ok(BoxPayload::VideoMediaHeader {
        graphics_mode: r.u16()?,
        opcolor: [r.u16()?, r.u16()?, r.u16()?],
    })
}

fn decode_smhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    Ok(BoxPayload::SoundMediaHeader { balance: r.u16()? })
}

fn decode_dref(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    // entry_count; the entries themselves are boxes
    r.skip(4)?;
    Ok(BoxPayload::DataReference(p.parse_children(t, r.rest())?))
}

fn decode_url(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (_, flags) = r.full_header()?;
    Ok(BoxPayload::DataEntryUrl { flags })
}

fn decode_stsd(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    r.skip(4)?;
    Ok(BoxPayload::SampleDescription(p.parse_children(t, r.rest())?))
}

fn decode_visual_sample_entry(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.skip(6)?;
    let data_reference_index = r.u16()?;
    r.skip(16)?;
    let width = r.u16()?;
    let height = r.u16()?;
    let horiz_resolution = Fixed16::from_bits(r.u32()?);
    let vert_resolution = Fixed16::from_bits(r.u32()?);
    r.skip(4)?;
    let frame_count = r.u16()?;
    let name = r.take(32)?;
    let name_len = (name[0] as usize).min(31);
    let compressor_name = String::from_utf8_lossy(&name[1..1 + name_len]).into_owned();
    let depth = r.u16()?;
    r.skip(2)?;
    let children = p.parse_children(t, r.rest())?;
    Ok(BoxPayload::VisualSampleEntry(VisualSampleEntry {
        data_reference_index,
        width,
        height,
        horiz_resolution,
        vert_resolution,
        frame_count,
        compressor_name,
        depth,
        children,
    }))
}

fn decode_audio_sample_entry(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.skip(6)?;
    let data_reference_index = r.u16()?;
    r.skip(8)?;
    let channel_count = r.u16()?;
    let sample_size = r.u16()?;
    r.skip(4)?;
    let sample_rate = Fixed16::from_bits(r.u32()?);
    let children = p.parse_children(t, r.rest())?;
    Ok(BoxPayload::AudioSampleEntry(AudioSampleEntry {
        data_reference_index,
        channel_count,
        sample_size,
        sample_rate,
        children,
    }))
}

fn decode_avcc(_: &mut BoxParser<'_>, _: BoxType, data: Bytes) -> Result<BoxPayload> {
    Ok(BoxPayload::AvcConfig(AvcConfig::parse(data)?))
}

fn decode_av1c(_: &mut BoxParser<'_>, _: BoxType, data: Bytes) -> Result<BoxPayload> {
    Ok(BoxPayload::Av1Config(Av1Config::parse(data)?))
}

fn decode_esds(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    Ok(BoxPayload::EsDescriptor(EsDescriptor::parse(r.rest())?))
}

fn decode_btrt(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    Ok(BoxPayload::BitRate(BitRate {
        buffer_size_db: r.u32()?,
        max_bitrate: r.u32()?,
        avg_bitrate: r.u32()?,
    }))
}

fn decode_stts(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let count = r.entry_count(8)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(TimeToSample {
            sample_count: r.u32()?,
            sample_delta: r.u32()?,
        });
    }
    Ok(BoxPayload::TimeToSample(entries))
}

fn decode_stsc(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let count = r.entry_count(12)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(SampleToChunk::new(r.u32()?, r.u32()?, r.u32()?));
    }
    Ok(BoxPayload::SampleToChunk(entries))
}

fn decode_stsz(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let sample_size = r.u32()?;
    let sample_count;
    let mut entries = Vec::new();
    if sample_size == 0 {
        let count = r.entry_count(4)?;
        sample_count = count as u32;
        entries.reserve(count);
        for _ in 0..count {
            entries.push(r.u32()?);
        }
    } else {
        sample_count = r.u32()?;
        let total = sample_count as u64 * sample_size as u64;
        if total > p.media_size() {
            return Err(Error::invalid_box(
                t,
                format!(
                    "{sample_count} samples of {sample_size} bytes exceed the {}-byte file",
                    p.media_size()
                ),
            ));
        }
    }
    Ok(BoxPayload::SampleSizes(SampleSizes {
        sample_size,
        sample_count,
        entries,
    }))
}

fn decode_stco(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let count = r.entry_count(4)?;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.u32()? as u64);
    }
    Ok(BoxPayload::ChunkOffsets(offsets))
}

fn decode_co64(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let count = r.entry_count(8)?;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.u64()?);
    }
    Ok(BoxPayload::ChunkOffsets(offsets))
}

fn decode_stss(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let count = r.entry_count(4)?;
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        samples.push(r.u32()?);
    }
    Ok(BoxPayload::SyncSamples(samples))
}

fn decode_sdtp(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    let mut entries = Vec::with_capacity(r.remaining());
    while r.remaining() > 0 {
        let b = r.u8()?;
        entries.push(SampleDependency {
            is_leading: b >> 6,
            depends_on: (b >> 4) & 0x03,
            is_depended_on: (b >> 2) & 0x03,
            has_redundancy: b & 0x03,
        });
    }
    Ok(BoxPayload::SampleDependencies(entries))
}

fn decode_sidx(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (version, _) = r.full_header()?;
    let reference_id = r.u32()?;
    let timescale = r.u32()?;
    let earliest_presentation_time = r.versioned(version)?;
    let first_offset = r.versioned(version)?;
    r.skip(2)?;
    let declared = r.u16()? as usize;
    let count = declared.min(r.remaining() / 12);
    let mut references = Vec::with_capacity(count);
    for _ in 0..count {
        let a = r.u32()?;
        let subsegment_duration = r.u32()?;
        let c = r.u32()?;
        references.push(SegmentReference {
            reference_type: (a >> 31) as u8,
            referenced_size: a & 0x7fff_ffff,
            subsegment_duration,
            starts_with_sap: c >> 31 == 1,
            sap_type: ((c >> 28) & 0x07) as u8,
            sap_delta_time: c & 0x0fff_ffff,
        });
    }
    Ok(BoxPayload::SegmentIndex(SegmentIndex {
        version,
        reference_id,
        timescale,
        earliest_presentation_time,
        first_offset,
        references,
    }))
}

fn decode_trex(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    Ok(BoxPayload::TrackExtends(TrackExtends {
        track_id: r.u32()?,
        default_sample_description_index: r.u32()?,
        default_sample_duration: r.u32()?,
        default_sample_size: r.u32()?,
        default_sample_flags: r.u32()?,
    }))
}

fn decode_mfhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    r.full_header()?;
    Ok(BoxPayload::MovieFragmentHeader {
        sequence_number: r.u32()?,
    })
}

fn decode_tfhd(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (_, flags) = r.full_header()?;
    let track_id = r.u32()?;
    let base_data_offset = (flags & 0x01 != 0).then(|| r.u64()).transpose()?;
    let sample_description_index = (flags & 0x02 != 0).then(|| r.u32()).transpose()?;
    let default_sample_duration = (flags & 0x08 != 0).then(|| r.u32()).transpose()?;
    let default_sample_size = (flags & 0x10 != 0).then(|| r.u32()).transpose()?;
    let default_sample_flags = (flags & 0x20 != 0).then(|| r.u32()).transpose()?;
    Ok(BoxPayload::TrackFragmentHeader(TrackFragmentHeader {
        track_id,
        base_data_offset,
        sample_description_index,
        default_sample_duration,
        default_sample_size,
        default_sample_flags,
    }))
}

fn decode_tfdt(_: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (version, _) = r.full_header()?;
    Ok(BoxPayload::TrackFragmentDecodeTime {
        base_media_decode_time: r.versioned(version)?,
    })
}

fn decode_trun(p: &mut BoxParser<'_>, t: BoxType, data: Bytes) -> Result<BoxPayload> {
    let mut r = FieldReader::new(t, data);
    let (_, flags) = r.full_header()?;
    let declared = r.u32()? as usize;
    let data_offset = (flags & 0x001 != 0)
        .then(|| r.u32().map(|v| v as i32))
        .transpose()?;
    let first_sample_flags = (flags & 0x004 != 0).then(|| r.u32()).transpose()?;

    let has_duration = flags & 0x100 != 0;
    let has_size = flags & 0x200 != 0;
    let has_flags = flags & 0x400 != 0;
    let has_cto = flags & 0x800 != 0;
    let per_sample = 4 * [has_duration, has_size, has_flags, has_cto]
        .iter()
        .filter(|f| **f)
        .count();
    let count = if per_sample == 0 {
        let limit = p.media_size().min(MAX_IMPLICIT_RUN_SAMPLES);
        if declared as u64 > limit {
            return Err(Error::invalid_box(
                t,
                format!("{declared} samples without per-sample fields, limit is {limit}"),
            ));
        }
        declared
    } else {
        declared.min(r.remaining() / per_sample)
    };

    let mut samples = Vec::with_capacity(count.min(r.remaining()));
    for _ in 0..count {
        samples.push(TrackRunSample {
            duration: has_duration.then(|| r.u32()).transpose()?,
            size: has_size.then(|| r.u32()).transpose()?,
            flags: has_flags.then(|| r.u32()).transpose()?,
            composition_time_offset: has_cto.then(|| r.u32()).transpose()?,
        });
    }
    Ok(BoxPayload::TrackRun(TrackRun {
        data_offset,
        first_sample_flags,
        samples,
    }))
}
