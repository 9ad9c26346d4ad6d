//! Sequential top-level box reader over a [`ByteSource`].

use bytes::Bytes;

use super::{BoxHeader, BoxSize, BoxType, HEADER_SIZE, LARGE_HEADER_SIZE};
use crate::source::ByteSource;
use crate::{Error, Result};

/// A top-level box as read from the source.
#[derive(Debug, Clone)]
pub struct TopLevelBox {
    pub box_type: BoxType,
    /// Absolute offset of the box header.
    pub offset: u64,
    /// Total size including the header.
    pub size: u64,
    pub header_size: u8,
    /// Payload bytes; `None` for media data, which is never fetched.
    pub payload: Option<Bytes>,
}

/// Walks the top-level boxes of a file, fetching each payload with one range
/// read and skipping `mdat` without touching its bytes.
pub struct BoxReader<'a> {
    source: &'a dyn ByteSource,
    offset: u64,
    finished: bool,
}

impl<'a> BoxReader<'a> {
    pub fn new(source: &'a dyn ByteSource) -> Self {
        Self {
            source,
            offset: 0,
            finished: false,
        }
    }

    /// Current read position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next top-level box, or `None` at end of stream.
    pub async fn next_box(&mut self) -> Result<Option<TopLevelBox>> {
        if self.finished {
            return Ok(None);
        }
        let file_size = self.source.size();
        let offset = self.offset;
        if offset >= file_size {
            self.finished = true;
            return Ok(None);
        }
        let available = file_size - offset;
        if available < HEADER_SIZE as u64 {
            tracing::warn!("ignoring {} trailing bytes at offset {}", available, offset);
            self.finished = true;
            return Ok(None);
        }

        let Some(mut head) = self.source.read(offset, offset + HEADER_SIZE as u64).await? else {
            self.finished = true;
            return Ok(None);
        };
        if BoxHeader::needs_large_size(&head) {
            if available < LARGE_HEADER_SIZE as u64 {
                return Err(Error::invalid_box(
                    BoxType::from_bytes([head[4], head[5], head[6], head[7]]),
                    "truncated 64-bit size",
                ));
            }
            head = self
                .source
                .read(offset, offset + LARGE_HEADER_SIZE as u64)
                .await?
                .unwrap_or_default();
        }
        let header = BoxHeader::parse(&head)
            .ok_or_else(|| Error::invalid_box(BoxType::from_bytes(*b"????"), "short header"))?;

        let size = header.resolved_size(available);
        if size < header.header_size as u64 {
            return Err(Error::invalid_box(
                header.box_type,
                format!("size {size} is smaller than its header"),
            ));
        }
        if header.size == BoxSize::ToEnd {
            self.finished = true;
        }
        self.offset = offset.saturating_add(size);

        let payload = if header.box_type == BoxType::MDAT {
            if size > available {
                tracing::warn!(
                    "mdat at {} declares {} bytes but only {} remain",
                    offset,
                    size,
                    available
                );
            }
            None
        } else {
            let start = offset + header.header_size as u64;
            let end = offset + size;
            if start == end {
                Some(Bytes::new())
            } else {
                let data = self.source.read(start, end).await?;
                Some(data.ok_or(Error::SourceRange {
                    start,
                    end,
                    size: file_size,
                })?)
            }
        };

        tracing::debug!("top-level {} at {} ({} bytes)", header.box_type, offset, size);
        Ok(Some(TopLevelBox {
            box_type: header.box_type,
            offset,
            size,
            header_size: header.header_size,
            payload,
        }))
    }
}
