//! Bounds-checked big-endian field reader over a box payload.

use bytes::Bytes;

use super::BoxType;
use crate::{Error, Result};

/// Sequential reader over one box payload. Every accessor fails with
/// [`Error::Truncated`] instead of panicking when the payload runs out.
pub(crate) struct FieldReader {
    box_type: BoxType,
    data: Bytes,
    pos: usize,
}

impl FieldReader {
    pub fn new(box_type: BoxType, data: Bytes) -> Self {
        Self {
            box_type,
            data,
            pos: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::Truncated {
                box_type: self.box_type,
                need: n,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn take(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        let out = self.data.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(out)
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> Bytes {
        let out = self.data.slice(self.pos..);
        self.pos = self.data.len();
        out
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        let d = &self.data[self.pos..];
        let v = u16::from_be_bytes([d[0], d[1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn u24(&mut self) -> Result<u32> {
        self.need(3)?;
        let d = &self.data[self.pos..];
        let v = u32::from_be_bytes([0, d[0], d[1], d[2]]);
        self.pos += 3;
        Ok(v)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        let d = &self.data[self.pos..];
        let v = u32::from_be_bytes([d[0], d[1], d[2], d[3]]);
        self.pos += 4;
        Ok(v)
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(u64::from_be_bytes(b))
    }

    pub fn fourcc(&mut self) -> Result<[u8; 4]> {
        self.need(4)?;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(b)
    }

    /// Version byte and 24-bit flags of a full box.
    pub fn full_header(&mut self) -> Result<(u8, u32)> {
        let version = self.u8()?;
        let flags = self.u24()?;
        Ok((version, flags))
    }

    /// A u32 or u64 depending on the full-box version.
    pub fn versioned(&mut self, version: u8) -> Result<u64> {
        if version == 1 {
            self.u64()
        } else {
            self.u32().map(u64::from)
        }
    }

    /// Read a declared entry count, trimmed to what the payload can hold.
    pub fn entry_count(&mut self, entry_size: usize) -> Result<usize> {
        let declared = self.u32()? as usize;
        let fits = self.remaining() / entry_size;
        if declared > fits {
            tracing::warn!(
                "{} declares {} entries but payload holds {}",
                self.box_type,
                declared,
                fits
            );
            return Ok(fits);
        }
        Ok(declared)
    }
}
