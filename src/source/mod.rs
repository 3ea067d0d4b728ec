//! Resolving a file's origin into bytes that can be sent over the wire.

mod local;
mod remote;

pub use local::LocalSource;
pub use remote::RemoteSource;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::files::FileOrigin;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Failed to fetch file: {0}")]
    Fetch(String),
    #[error("Unsupported origin: {0}")]
    Unsupported(String),
}

/// The bytes of one file, ready to be read chunk by chunk.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Fully buffered, e.g. after downloading a remote file.
    Memory(Bytes),
    /// Read lazily from disk.
    File { path: PathBuf, len: u64 },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Memory(data) => data.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `max` bytes starting at `offset`.
    pub async fn chunk(&self, offset: u64, max: u64) -> Result<Bytes, SourceError> {
        let end = self.len().min(offset.saturating_add(max));
        if offset >= end {
            return Ok(Bytes::new());
        }

        match self {
            Payload::Memory(data) => Ok(data.slice(offset as usize..end as usize)),
            Payload::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; (end - offset) as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// Turns a [`FileOrigin`] into a [`Payload`].
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn resolve(&self, origin: &FileOrigin) -> Result<Payload, SourceError>;
}

/// Dispatches local paths and remote URLs to their backends.
pub struct OriginResolver {
    local: LocalSource,
    remote: RemoteSource,
}

impl OriginResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            local: LocalSource,
            remote: RemoteSource::new(client),
        }
    }
}

#[async_trait]
impl ByteSource for OriginResolver {
    async fn resolve(&self, origin: &FileOrigin) -> Result<Payload, SourceError> {
        match origin {
            FileOrigin::Local(_) => self.local.resolve(origin).await,
            FileOrigin::Remote(_) => self.remote.resolve(origin).await,
        }
    }
}
