//! Box serialization for progressive MP4 output.
//!
//! Every box is written with a placeholder size that is patched once its
//! children are in place.

use bytes::{BufMut, BytesMut};

use super::table_builder::{MuxTrack, SampleEntryKind};
use crate::error::{Error, Result};
use crate::mp4::TrackKind;

const IDENTITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Start a box and return its offset for [`end_box`].
fn begin_box(buf: &mut BytesMut, box_type: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(box_type);
    start
}

fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn put_full_header(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
}

fn put_matrix(buf: &mut BytesMut) {
    for v in IDENTITY_MATRIX {
        buf.put_u32(v);
    }
}

fn needs_64_bit(values: &[u64]) -> bool {
    values.iter().any(|v| *v > u32::MAX as u64)
}

/// Narrow a sample entry field to its 16-bit slot.
fn entry_u16(track: &MuxTrack, field: &str, value: u32) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        Error::unsupported(format!(
            "track {} {field} {value} does not fit a sample entry",
            track.id
        ))
    })
}

pub(crate) fn write_ftyp(buf: &mut BytesMut) {
    let start = begin_box(buf, b"ftyp");
    buf.put_slice(b"isom"); // major brand
    buf.put_u32(0x200); // minor version
    for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
        buf.put_slice(brand);
    }
    end_box(buf, start);
}

/// mdat header for a payload of `len` bytes. Uses a 64-bit largesize when
/// the box would not fit a 32-bit size field.
pub(crate) fn mdat_header(len: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(16);
    if len + 8 > u32::MAX as u64 {
        buf.put_u32(1);
        buf.put_slice(b"mdat");
        buf.put_u64(len + 16);
    } else {
        buf.put_u32((len + 8) as u32);
        buf.put_slice(b"mdat");
    }
    buf
}

/// Movie timescale and duration across all tracks. The first track sets the
/// timescale.
fn movie_timing(tracks: &[MuxTrack]) -> (u32, u64) {
    let timescale = tracks.first().map_or(1000, |t| t.timescale.max(1));
    let duration = tracks
        .iter()
        .map(|t| t.total_duration() * timescale as u64 / t.timescale.max(1) as u64)
        .max()
        .unwrap_or(0);
    (timescale, duration)
}

pub(crate) fn write_moov(buf: &mut BytesMut, tracks: &[MuxTrack]) -> Result<()> {
    let start = begin_box(buf, b"moov");
    let (timescale, duration) = movie_timing(tracks);
    write_mvhd(buf, timescale, duration, tracks.len() as u32 + 1);
    for track in tracks {
        let track_duration = track.total_duration() * timescale as u64 / track.timescale.max(1) as u64;
        write_trak(buf, track, track_duration)?;
    }
    end_box(buf, start);
    Ok(())
}

fn write_mvhd(buf: &mut BytesMut, timescale: u32, duration: u64, next_track_id: u32) {
    let start = begin_box(buf, b"mvhd");
    if duration > u32::MAX as u64 {
        put_full_header(buf, 1, 0);
        buf.put_u64(0); // creation time
        buf.put_u64(0); // modification time
        buf.put_u32(timescale);
        buf.put_u64(duration);
    } else {
        put_full_header(buf, 0, 0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(timescale);
        buf.put_u32(duration as u32);
    }
    buf.put_u32(0x0001_0000); // rate = 1.0
    buf.put_u16(0x0100); // volume = 1.0
    buf.put_u16(0); // reserved
    buf.put_u64(0); // reserved
    put_matrix(buf);
    for _ in 0..6 {
        buf.put_u32(0); // pre_defined
    }
    buf.put_u32(next_track_id);
    end_box(buf, start);
}

fn write_trak(buf: &mut BytesMut, track: &MuxTrack, movie_duration: u64) -> Result<()> {
    let start = begin_box(buf, b"trak");
    write_tkhd(buf, track, movie_duration);
    write_mdia(buf, track)?;
    end_box(buf, start);
    Ok(())
}

fn write_tkhd(buf: &mut BytesMut, track: &MuxTrack, duration: u64) {
    let start = begin_box(buf, b"tkhd");
    // flags: enabled, in_movie
    if duration > u32::MAX as u64 {
        put_full_header(buf, 1, 3);
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(track.id);
        buf.put_u32(0); // reserved
        buf.put_u64(duration);
    } else {
        put_full_header(buf, 0, 3);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(track.id);
        buf.put_u32(0);
        buf.put_u32(duration as u32);
    }
    buf.put_u64(0); // reserved
    buf.put_u16(0); // layer
    buf.put_u16(0); // alternate group
    let is_video = track.kind == TrackKind::Video;
    buf.put_u16(if is_video { 0 } else { 0x0100 }); // volume
    buf.put_u16(0); // reserved
    put_matrix(buf);
    if is_video {
        buf.put_u32(track.width << 16);
        buf.put_u32(track.height << 16);
    } else {
        buf.put_u32(0);
        buf.put_u32(0);
    }
    end_box(buf, start);
}

fn write_mdia(buf: &mut BytesMut, track: &MuxTrack) -> Result<()> {
    let start = begin_box(buf, b"mdia");
    write_mdhd(buf, track.timescale, track.total_duration());
    match track.kind {
        TrackKind::Video => write_hdlr(buf, b"vide", b"VideoHandler"),
        TrackKind::Audio => write_hdlr(buf, b"soun", b"SoundHandler"),
    }
    write_minf(buf, track)?;
    end_box(buf, start);
    Ok(())
}

fn write_mdhd(buf: &mut BytesMut, timescale: u32, duration: u64) {
    let start = begin_box(buf, b"mdhd");
    if duration > u32::MAX as u64 {
        put_full_header(buf, 1, 0);
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(timescale);
        buf.put_u64(duration);
    } else {
        put_full_header(buf, 0, 0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(timescale);
        buf.put_u32(duration as u32);
    }
    buf.put_u16(0x55C4); // language: und
    buf.put_u16(0); // pre_defined
    end_box(buf, start);
}

fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
    let start = begin_box(buf, b"hdlr");
    put_full_header(buf, 0, 0);
    buf.put_u32(0); // pre_defined
    buf.put_slice(handler);
    buf.put_u32(0); // reserved
    buf.put_u32(0);
    buf.put_u32(0);
    buf.put_slice(name);
    buf.put_u8(0); // null terminator
    end_box(buf, start);
}

fn write_minf(buf: &mut BytesMut, track: &MuxTrack) -> Result<()> {
    let start = begin_box(buf, b"minf");
    match track.kind {
        TrackKind::Video => {
            let vmhd = begin_box(buf, b"vmhd");
            put_full_header(buf, 0, 1);
            buf.put_u16(0); // graphics mode
            buf.put_u16(0);
            buf.put_u16(0);
            buf.put_u16(0); // opcolor
            end_box(buf, vmhd);
        }
        TrackKind::Audio => {
            let smhd = begin_box(buf, b"smhd");
            put_full_header(buf, 0, 0);
            buf.put_u16(0); // balance
            buf.put_u16(0); // reserved
            end_box(buf, smhd);
        }
    }
    write_dinf(buf);
    write_stbl(buf, track)?;
    end_box(buf, start);
    Ok(())
}

fn write_dinf(buf: &mut BytesMut) {
    let dinf = begin_box(buf, b"dinf");
    let dref = begin_box(buf, b"dref");
    put_full_header(buf, 0, 0);
    buf.put_u32(1); // entry count
    let url = begin_box(buf, b"url ");
    put_full_header(buf, 0, 1); // self-contained
    end_box(buf, url);
    end_box(buf, dref);
    end_box(buf, dinf);
}

fn write_stbl(buf: &mut BytesMut, track: &MuxTrack) -> Result<()> {
    let start = begin_box(buf, b"stbl");
    write_stsd(buf, track)?;
    write_stts(buf, track);
    if !track.all_key_frames() {
        write_stss(buf, track);
    }
    write_stsc(buf, track);
    write_stsz(buf, track);
    write_chunk_offsets(buf, track);
    end_box(buf, start);
    Ok(())
}

fn write_stsd(buf: &mut BytesMut, track: &MuxTrack) -> Result<()> {
    let start = begin_box(buf, b"stsd");
    put_full_header(buf, 0, 0);
    buf.put_u32(1); // entry count
    match track.sample_entry {
        SampleEntryKind::Avc => write_visual_entry(buf, track, b"avc1", b"avcC")?,
        SampleEntryKind::Av1 => write_visual_entry(buf, track, b"av01", b"av1C")?,
        SampleEntryKind::Aac => write_mp4a(buf, track)?,
    }
    end_box(buf, start);
    Ok(())
}

fn write_visual_entry(
    buf: &mut BytesMut,
    track: &MuxTrack,
    entry: &[u8; 4],
    config: &[u8; 4],
) -> Result<()> {
    let width = entry_u16(track, "width", track.width)?;
    let height = entry_u16(track, "height", track.height)?;
    let start = begin_box(buf, entry);
    buf.put_slice(&[0; 6]); // reserved
    buf.put_u16(1); // data reference index
    buf.put_u16(0); // pre_defined
    buf.put_u16(0); // reserved
    buf.put_slice(&[0; 12]); // pre_defined
    buf.put_u16(width);
    buf.put_u16(height);
    buf.put_u32(0x0048_0000); // horiz resolution 72 dpi
    buf.put_u32(0x0048_0000); // vert resolution 72 dpi
    buf.put_u32(0); // reserved
    buf.put_u16(1); // frame count
    buf.put_slice(&[0; 32]); // compressor name
    buf.put_u16(0x0018); // depth
    buf.put_i16(-1); // pre_defined

    if let Some(description) = &track.description {
        let cfg = begin_box(buf, config);
        buf.put_slice(description);
        end_box(buf, cfg);
    }
    end_box(buf, start);
    Ok(())
}

fn write_mp4a(buf: &mut BytesMut, track: &MuxTrack) -> Result<()> {
    // 16.16 fixed point; higher rates need an mp4a v1 entry.
    let sample_rate = entry_u16(track, "sample rate", track.sample_rate)?;
    let start = begin_box(buf, b"mp4a");
    buf.put_slice(&[0; 6]); // reserved
    buf.put_u16(1); // data reference index
    buf.put_u32(0); // reserved
    buf.put_u32(0); // reserved
    buf.put_u16(track.channel_count);
    buf.put_u16(track.sample_size);
    buf.put_u16(0); // pre_defined
    buf.put_u16(0); // reserved
    buf.put_u32((sample_rate as u32) << 16);

    if let Some(description) = &track.description {
        let esds = begin_box(buf, b"esds");
        put_full_header(buf, 0, 0);
        buf.put_slice(description);
        end_box(buf, esds);
    }
    end_box(buf, start);
    Ok(())
}

fn write_stts(buf: &mut BytesMut, track: &MuxTrack) {
    let start = begin_box(buf, b"stts");
    put_full_header(buf, 0, 0);
    buf.put_u32(track.time_to_samples.len() as u32);
    for run in &track.time_to_samples {
        buf.put_u32(run.sample_count);
        buf.put_u32(run.sample_delta);
    }
    end_box(buf, start);
}

/// Sync sample table. Only written when some sample is not a key frame: a
/// track without `stss` is read as all sync samples, so the box is omitted
/// for all-intra tracks.
fn write_stss(buf: &mut BytesMut, track: &MuxTrack) {
    let start = begin_box(buf, b"stss");
    put_full_header(buf, 0, 0);
    buf.put_u32(track.sync_samples.len() as u32);
    for n in &track.sync_samples {
        buf.put_u32(*n);
    }
    end_box(buf, start);
}

fn write_stsc(buf: &mut BytesMut, track: &MuxTrack) {
    let start = begin_box(buf, b"stsc");
    put_full_header(buf, 0, 0);
    buf.put_u32(track.sample_to_chunks.len() as u32);
    for run in &track.sample_to_chunks {
        buf.put_u32(run.first_chunk);
        buf.put_u32(run.samples_per_chunk);
        buf.put_u32(run.sample_description_index);
    }
    end_box(buf, start);
}

fn write_stsz(buf: &mut BytesMut, track: &MuxTrack) {
    let start = begin_box(buf, b"stsz");
    put_full_header(buf, 0, 0);
    buf.put_u32(0); // sample size: per-sample table follows
    buf.put_u32(track.sample_sizes.len() as u32);
    for size in &track.sample_sizes {
        buf.put_u32(*size);
    }
    end_box(buf, start);
}

fn write_chunk_offsets(buf: &mut BytesMut, track: &MuxTrack) {
    if needs_64_bit(&track.chunk_offsets) {
        let start = begin_box(buf, b"co64");
        put_full_header(buf, 0, 0);
        buf.put_u32(track.chunk_offsets.len() as u32);
        for offset in &track.chunk_offsets {
            buf.put_u64(*offset);
        }
        end_box(buf, start);
    } else {
        let start = begin_box(buf, b"stco");
        put_full_header(buf, 0, 0);
        buf.put_u32(track.chunk_offsets.len() as u32);
        for offset in &track.chunk_offsets {
            buf.put_u32(*offset as u32);
        }
        end_box(buf, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mdat_header_sizes() {
        let small = mdat_header(100);
        assert_eq!(&small[..], &[0, 0, 0, 108, b'm', b'd', b'a', b't']);

        let large = mdat_header(u32::MAX as u64);
        assert_eq!(large.len(), 16);
        assert_eq!(&large[..4], &[0, 0, 0, 1]);
        assert_eq!(&large[8..], &(u32::MAX as u64 + 16).to_be_bytes());
    }

    #[test]
    fn ftyp_layout() {
        let mut buf = BytesMut::new();
        write_ftyp(&mut buf);
        assert_eq!(buf.len(), 32);
        assert_eq!(&buf[4..8], b"ftyp");
        assert_eq!(&buf[8..12], b"isom");
    }

    #[test]
    fn chunk_offset_width() {
        assert!(!needs_64_bit(&[0, u32::MAX as u64]));
        assert!(needs_64_bit(&[0, u32::MAX as u64 + 1]));
    }
}
