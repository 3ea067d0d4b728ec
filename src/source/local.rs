use async_trait::async_trait;

use super::{ByteSource, Payload, SourceError};
use crate::files::FileOrigin;

/// Files on the local filesystem, read chunk by chunk.
pub struct LocalSource;

#[async_trait]
impl ByteSource for LocalSource {
    async fn resolve(&self, origin: &FileOrigin) -> Result<Payload, SourceError> {
        let FileOrigin::Local(path) = origin else {
            return Err(SourceError::Unsupported(format!("{origin:?}")));
        };

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_file() {
            return Err(SourceError::NotFound(path.display().to_string()));
        }

        Ok(Payload::File {
            path: path.clone(),
            len: metadata.len(),
        })
    }
}
