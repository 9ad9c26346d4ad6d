//! Random-access byte sources the demuxer reads from.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

use crate::{Error, Result};

/// A sized source that can serve arbitrary byte ranges.
///
/// `read(start, end)` returns `Ok(None)` when `start` is at or past the end of
/// the source; that is the end-of-stream signal. A range that begins inside
/// the source but extends beyond it is an error.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Read bytes `[start, end)`.
    async fn read(&self, start: u64, end: u64) -> Result<Option<Bytes>>;
}

fn check_range(start: u64, end: u64, size: u64) -> Result<bool> {
    if start >= size {
        return Ok(false);
    }
    if end < start || end > size {
        return Err(Error::SourceRange { start, end, size });
    }
    Ok(true)
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read(&self, start: u64, end: u64) -> Result<Option<Bytes>> {
        if !check_range(start, end, self.size())? {
            return Ok(None);
        }
        Ok(Some(self.data.slice(start as usize..end as usize)))
    }
}

/// File-backed source. Reads are serialized through one handle.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// Open a file for range reads.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, start: u64, end: u64) -> Result<Option<Bytes>> {
        if !check_range(start, end, self.size)? {
            return Ok(None);
        }
        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;
        Ok(Some(Bytes::from(buf)))
    }
}
