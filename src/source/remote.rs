use async_trait::async_trait;
use reqwest::Client;

use super::{ByteSource, Payload, SourceError};
use crate::files::FileOrigin;

/// Files referenced by URL. Downloaded in full before the upload starts.
pub struct RemoteSource {
    client: Client,
}

impl RemoteSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ByteSource for RemoteSource {
    async fn resolve(&self, origin: &FileOrigin) -> Result<Payload, SourceError> {
        let FileOrigin::Remote(url) = origin else {
            return Err(SourceError::Unsupported(format!("{origin:?}")));
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.clone()));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(SourceError::Fetch(format!("{url} returned {status}")));
        }

        let data = resp
            .bytes()
            .await
            .map_err(|e| SourceError::Fetch(e.to_string()))?;

        Ok(Payload::Memory(data))
    }
}
