use std::time::Duration;

use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, Url};

use super::TusError;

pub const TUS_VERSION: &str = "1.0.0";
const TUS_RESUMABLE: &str = "Tus-Resumable";
const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_METADATA: &str = "Upload-Metadata";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Thin HTTP wrapper over the tus 1.0 core protocol plus the ingest
/// service's finalize call. Knows nothing about descriptors or retries.
#[derive(Clone)]
pub struct TusClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl TusClient {
    pub fn new(client: Client, base_url: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    /// Creation endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/files", self.base_url)
    }

    fn finalize_url(&self, upload_id: &str) -> String {
        format!("{}/inbox/files/{}", self.base_url, upload_id)
    }

    /// Create an upload of `length` bytes and return its absolute URL.
    pub async fn create(
        &self,
        headers: &HeaderMap,
        length: u64,
        file_name: &str,
    ) -> Result<String, TusError> {
        let endpoint = self.endpoint();
        let metadata = format!(
            "fileName {}",
            base64::engine::general_purpose::STANDARD.encode(file_name)
        );

        let resp = self
            .client
            .post(&endpoint)
            .headers(headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_LENGTH, length)
            .header(UPLOAD_METADATA, metadata)
            .timeout(self.request_timeout)
            .body(Bytes::new())
            .send()
            .await?;

        if resp.status() != StatusCode::CREATED {
            return Err(TusError::from_response(resp).await);
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| TusError::Protocol("upload created without a Location header".into()))?;

        let url = Url::parse(&endpoint)
            .and_then(|base| base.join(location))
            .map_err(|e| TusError::Protocol(format!("invalid Location {location}: {e}")))?;

        tracing::debug!(upload_url = %url, length, "Created upload");
        Ok(url.to_string())
    }

    /// Ask the server how many bytes of `upload_url` it already holds.
    ///
    /// `Ok(None)` means the server no longer knows the upload and a new one
    /// has to be created.
    pub async fn offset(
        &self,
        headers: &HeaderMap,
        upload_url: &str,
    ) -> Result<Option<u64>, TusError> {
        let resp = self
            .client
            .head(upload_url)
            .headers(headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::LOCKED {
            return Err(TusError::from_response(resp).await);
        }
        if status.is_client_error() {
            tracing::debug!(%upload_url, %status, "Previous upload is gone");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TusError::from_response(resp).await);
        }

        // A 2xx without an offset is as good as no upload at all.
        Ok(read_offset(resp.headers()))
    }

    /// Append `chunk` at `offset` and return the server's new offset.
    pub async fn patch(
        &self,
        headers: &HeaderMap,
        upload_url: &str,
        offset: u64,
        chunk: Bytes,
    ) -> Result<u64, TusError> {
        let len = chunk.len() as u64;
        let resp = self
            .client
            .patch(upload_url)
            .headers(headers.clone())
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(UPLOAD_OFFSET, offset)
            .header(CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(TusError::from_response(resp).await);
        }

        let new_offset = read_offset(resp.headers())
            .ok_or_else(|| TusError::Protocol("PATCH response without Upload-Offset".into()))?;
        if new_offset <= offset && len > 0 {
            return Err(TusError::Protocol(format!(
                "server did not advance past offset {offset}"
            )));
        }
        Ok(new_offset)
    }

    /// Tell the ingest service that the transfer of `upload_id` is complete.
    /// Only a 200 counts as accepted.
    pub async fn finalize(&self, headers: &HeaderMap, upload_id: &str) -> Result<(), TusError> {
        let resp = self
            .client
            .patch(self.finalize_url(upload_id))
            .headers(headers.clone())
            .timeout(self.request_timeout)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(TusError::from_response(resp).await);
        }
        Ok(())
    }
}

fn read_offset(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Server-assigned identifier: the last path segment of the upload URL.
pub fn upload_id(upload_url: &str) -> Option<&str> {
    let path = upload_url.split(['?', '#']).next().unwrap_or(upload_url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}
