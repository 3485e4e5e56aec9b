//! Byte sources for an upload.
//!
//! Multipart bodies are streamed into a temporary file first. That gives the pipeline a
//! known size before any network call, and a source that can be read again from the start
//! for every transfer attempt.

use std::io::{self, SeekFrom};

use bytes::Bytes;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::error::UploadError;
use super::size::SizePolicy;

/// A readable, rewindable upload body of known length.
#[derive(Debug)]
pub enum UploadContent {
    /// Spooled to disk; the file is removed when this value is dropped
    Spooled { path: TempPath, len: u64 },
    /// Held in memory
    Memory(Bytes),
}

impl UploadContent {
    pub fn len(&self) -> u64 {
        match self {
            UploadContent::Spooled { len, .. } => *len,
            UploadContent::Memory(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A request body positioned at the first byte.
    ///
    /// Each call opens an independent reader, so an attempt that died half way through does
    /// not affect the next one.
    pub async fn body(&self) -> io::Result<reqwest::Body> {
        match self {
            UploadContent::Spooled { path, .. } => {
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(0)).await?;
                Ok(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
            UploadContent::Memory(bytes) => Ok(reqwest::Body::from(bytes.clone())),
        }
    }
}

impl From<Bytes> for UploadContent {
    fn from(bytes: Bytes) -> Self {
        UploadContent::Memory(bytes)
    }
}

/// Writes incoming chunks to a temporary file, enforcing the size ceiling as it goes.
pub struct Spool {
    file: File,
    path: TempPath,
    len: u64,
    policy: SizePolicy,
}

impl Spool {
    pub async fn create(policy: SizePolicy) -> Result<Self, UploadError> {
        let named = tokio::task::spawn_blocking(tempfile::NamedTempFile::new)
            .await
            .map_err(|e| anyhow::anyhow!("spool creation task failed: {e}"))?
            .map_err(|e| anyhow::anyhow!("failed to create spool file: {e}"))?;
        let (file, path) = named.into_parts();

        Ok(Self {
            file: File::from_std(file),
            path,
            len: 0,
            policy,
        })
    }

    /// Append a chunk. Fails with `PayloadTooLarge` as soon as the running total passes
    /// the ceiling, before the chunk is written.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        let len = self.len + chunk.len() as u64;
        self.policy.check(len)?;

        self.file
            .write_all(chunk)
            .await
            .map_err(|e| anyhow::anyhow!("failed to write to spool file: {e}"))?;
        self.len = len;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub async fn finish(mut self) -> Result<UploadContent, UploadError> {
        self.file
            .flush()
            .await
            .map_err(|e| anyhow::anyhow!("failed to flush spool file: {e}"))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| anyhow::anyhow!("failed to sync spool file: {e}"))?;

        Ok(UploadContent::Spooled {
            path: self.path,
            len: self.len,
        })
    }
}
