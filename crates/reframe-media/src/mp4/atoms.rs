//! Box type codes and header decoding.

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const PDIN: Self = Self(*b"pdin");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const SMHD: Self = Self(*b"smhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVCC: Self = Self(*b"avcC");
    pub const AV01: Self = Self(*b"av01");
    pub const AV1C: Self = Self(*b"av1C");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ESDS: Self = Self(*b"esds");
    pub const BTRT: Self = Self(*b"btrt");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STSS: Self = Self(*b"stss");
    pub const SDTP: Self = Self(*b"sdtp");
    pub const UDTA: Self = Self(*b"udta");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const SIDX: Self = Self(*b"sidx");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }

    /// Whether boxes of this type hold nothing but child boxes.
    pub fn is_container(&self) -> bool {
        matches!(
            *self,
            Self::MOOV
                | Self::TRAK
                | Self::EDTS
                | Self::MDIA
                | Self::MINF
                | Self::DINF
                | Self::STBL
                | Self::UDTA
                | Self::MVEX
                | Self::MOOF
                | Self::TRAF
        )
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Size of a compact box header.
pub const HEADER_SIZE: usize = 8;
/// Size of a box header carrying a 64-bit largesize.
pub const LARGE_HEADER_SIZE: usize = 16;

/// Declared length of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxSize {
    /// Total size including the header.
    Known(u64),
    /// Size field was zero: the box runs to the end of its enclosing range.
    ToEnd,
}

/// Decoded box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: BoxType,
    pub size: BoxSize,
    /// 8 or 16 bytes.
    pub header_size: u8,
}

impl BoxHeader {
    /// Decode a header from the start of `data`.
    ///
    /// Returns `None` when `data` is too short to hold the full header; for a
    /// 64-bit header that means fewer than 16 bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let box_type = BoxType::from_bytes([data[4], data[5], data[6], data[7]]);
        match size {
            0 => Some(Self {
                box_type,
                size: BoxSize::ToEnd,
                header_size: HEADER_SIZE as u8,
            }),
            1 => {
                if data.len() < LARGE_HEADER_SIZE {
                    return None;
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&data[8..16]);
                Some(Self {
                    box_type,
                    size: BoxSize::Known(u64::from_be_bytes(large)),
                    header_size: LARGE_HEADER_SIZE as u8,
                })
            }
            n => Some(Self {
                box_type,
                size: BoxSize::Known(n as u64),
                header_size: HEADER_SIZE as u8,
            }),
        }
    }

    /// Whether the compact header announced a 64-bit size.
    pub fn needs_large_size(data: &[u8]) -> bool {
        data.len() >= 4 && data[..4] == [0, 0, 0, 1]
    }

    /// Resolve the total box size given the bytes left in the enclosing range.
    pub fn resolved_size(&self, available: u64) -> u64 {
        match self.size {
            BoxSize::Known(n) => n,
            BoxSize::ToEnd => available,
        }
    }
}

/// Handler type for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Other([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Other(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compact_header() {
        let data = [0, 0, 0, 24, b'f', b't', b'y', b'p'];
        let header = BoxHeader::parse(&data).unwrap();
        assert_eq!(header.box_type, BoxType::FTYP);
        assert_eq!(header.size, BoxSize::Known(24));
        assert_eq!(header.header_size, 8);
    }

    #[test]
    fn parse_large_header() {
        let mut data = vec![0, 0, 0, 1, b'm', b'd', b'a', b't'];
        data.extend_from_slice(&(5_000_000_000u64).to_be_bytes());
        assert!(BoxHeader::needs_large_size(&data));
        assert!(BoxHeader::parse(&data[..8]).is_none());
        let header = BoxHeader::parse(&data).unwrap();
        assert_eq!(header.size, BoxSize::Known(5_000_000_000));
        assert_eq!(header.header_size, 16);
    }

    #[test]
    fn parse_to_end_header() {
        let data = [0, 0, 0, 0, b'm', b'd', b'a', b't'];
        let header = BoxHeader::parse(&data).unwrap();
        assert_eq!(header.size, BoxSize::ToEnd);
        assert_eq!(header.resolved_size(100), 100);
    }

    #[test]
    fn containers() {
        assert!(BoxType::MOOV.is_container());
        assert!(BoxType::TRAF.is_container());
        assert!(!BoxType::STSD.is_container());
        assert_eq!(BoxType::URL.to_string(), "url ");
    }
}
