//! Decoder configuration records carried in sample entries: avcC, av1C and
//! the MPEG-4 elementary stream descriptor inside esds.

use bytes::Bytes;

use super::fields::FieldReader;
use super::BoxType;
use crate::{Error, Result};

/// AVCDecoderConfigurationRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub length_size_minus_one: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// The full record as stored in the box, handed to decoders verbatim.
    pub raw: Bytes,
}

impl AvcConfig {
    pub fn parse(data: Bytes) -> Result<Self> {
        let raw = data.clone();
        let mut r = FieldReader::new(BoxType::AVCC, data);
        let configuration_version = r.u8()?;
        let profile_indication = r.u8()?;
        let profile_compatibility = r.u8()?;
        let level_indication = r.u8()?;
        let length_size_minus_one = r.u8()? & 0x03;

        let sps_count = r.u8()? & 0x1f;
        let mut sps = Vec::with_capacity(sps_count as usize);
        for _ in 0..sps_count {
            let len = r.u16()? as usize;
            sps.push(r.take(len)?);
        }

        let pps_count = r.u8()?;
        let mut pps = Vec::with_capacity(pps_count as usize);
        for _ in 0..pps_count {
            let len = r.u16()? as usize;
            pps.push(r.take(len)?);
        }

        Ok(Self {
            configuration_version,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_minus_one,
            sps,
            pps,
            raw,
        })
    }

    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }
}

/// AV1CodecConfigurationRecord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Config {
    pub marker: u8,
    pub version: u8,
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: u8,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub config_obus: Bytes,
    pub raw: Bytes,
}

impl Av1Config {
    pub fn parse(data: Bytes) -> Result<Self> {
        let raw = data.clone();
        let mut r = FieldReader::new(BoxType::AV1C, data);
        let b0 = r.u8()?;
        let b1 = r.u8()?;
        let b2 = r.u8()?;
        // initial_presentation_delay
        r.skip(1)?;
        Ok(Self {
            marker: b0 >> 7,
            version: b0 & 0x7f,
            seq_profile: b1 >> 5,
            seq_level_idx_0: b1 & 0x1f,
            seq_tier_0: b2 >> 7,
            high_bitdepth: (b2 >> 6) & 1 == 1,
            twelve_bit: (b2 >> 5) & 1 == 1,
            monochrome: (b2 >> 4) & 1 == 1,
            chroma_subsampling_x: (b2 >> 3) & 1 == 1,
            chroma_subsampling_y: (b2 >> 2) & 1 == 1,
            chroma_sample_position: b2 & 0x03,
            config_obus: r.rest(),
            raw,
        })
    }

    pub fn bit_depth(&self) -> u8 {
        if self.twelve_bit {
            12
        } else if self.high_bitdepth {
            10
        } else {
            8
        }
    }

    /// Codec string of the form `av01.P.LLT.DD`, e.g. `av01.0.08M.10`.
    pub fn codec_string(&self) -> String {
        format!(
            "av01.{}.{:02}{}.{:02}",
            self.seq_profile,
            self.seq_level_idx_0,
            if self.seq_tier_0 == 1 { 'H' } else { 'M' },
            self.bit_depth()
        )
    }
}

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_DESCRIPTOR_TAG: u8 = 0x04;
const DECODER_SPECIFIC_INFO_TAG: u8 = 0x05;

/// Fields of the ES_Descriptor chain inside an esds box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub object_type_indication: u8,
    pub stream_type: u8,
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub audio_config: Option<AudioSpecificConfig>,
    /// The esds payload after version and flags, written back unchanged on mux.
    pub raw: Bytes,
}

/// Leading fields of an AudioSpecificConfig.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
}

impl AudioSpecificConfig {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 2 {
            return None;
        }
        Some(Self {
            audio_object_type: data[0] >> 3,
            sampling_frequency_index: ((data[0] & 0x07) << 1) | (data[1] >> 7),
            channel_configuration: (data[1] >> 3) & 0x0f,
        })
    }
}

/// Read a descriptor tag and its variable-length size (7 bits per byte).
fn read_tag_and_size(r: &mut FieldReader) -> Result<(u8, usize)> {
    let tag = r.u8()?;
    let mut size = 0usize;
    for _ in 0..4 {
        let b = r.u8()?;
        size = (size << 7) | (b & 0x7f) as usize;
        if b & 0x80 == 0 {
            return Ok((tag, size));
        }
    }
    Err(Error::invalid_box(
        BoxType::ESDS,
        "descriptor size longer than four bytes",
    ))
}

fn expect_tag(r: &mut FieldReader, expected: u8) -> Result<usize> {
    let (tag, size) = read_tag_and_size(r)?;
    if tag != expected {
        return Err(Error::invalid_box(
            BoxType::ESDS,
            format!("unexpected descriptor tag {tag:#04x}, expected {expected:#04x}"),
        ));
    }
    Ok(size)
}

impl EsDescriptor {
    /// Parse the esds payload that follows the full-box header.
    pub fn parse(data: Bytes) -> Result<Self> {
        let raw = data.clone();
        let mut r = FieldReader::new(BoxType::ESDS, data);

        expect_tag(&mut r, ES_DESCRIPTOR_TAG)?;
        let es_id = r.u16()?;
        let flags = r.u8()?;
        if flags & 0x80 != 0 {
            // dependsOn_ES_ID
            r.skip(2)?;
        }
        if flags & 0x40 != 0 {
            let url_len = r.u8()? as usize;
            r.skip(url_len)?;
        }
        if flags & 0x20 != 0 {
            // OCR_ES_Id
            r.skip(2)?;
        }

        let dcd_size = expect_tag(&mut r, DECODER_CONFIG_DESCRIPTOR_TAG)?;
        let object_type_indication = r.u8()?;
        let stream_type = r.u8()? >> 2;
        let buffer_size_db = r.u24()?;
        let max_bitrate = r.u32()?;
        let avg_bitrate = r.u32()?;

        let mut audio_config = None;
        if dcd_size > 13 && r.remaining() > 0 {
            let dsi_size = expect_tag(&mut r, DECODER_SPECIFIC_INFO_TAG)?;
            let dsi = r.take(dsi_size.min(r.remaining()))?;
            audio_config = AudioSpecificConfig::parse(&dsi);
        }

        Ok(Self {
            es_id,
            object_type_indication,
            stream_type,
            buffer_size_db,
            max_bitrate,
            avg_bitrate,
            audio_config,
            raw,
        })
    }

    /// Codec string, `mp4a.40.<aot>` for MPEG-4 audio.
    pub fn codec_string(&self) -> String {
        match self.audio_config {
            Some(asc) => format!(
                "mp4a.{:02x}.{}",
                self.object_type_indication, asc.audio_object_type
            ),
            None => format!("mp4a.{:02x}", self.object_type_indication),
        }
    }
}
