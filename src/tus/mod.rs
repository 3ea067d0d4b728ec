//! Resumable upload client for the ingest service.
//!
//! [`TusClient`] speaks the wire protocol, [`TusUploader`] drives one file
//! through resolve, resume discovery, chunked transfer with retries and the
//! finalize call, writing status and progress into the store as it goes.

mod client;
mod credentials;
mod retry;
mod upload;

pub use client::{upload_id, TusClient, TUS_VERSION};
pub use credentials::{
    Credentials, UploadAuth, AUTH_ENV_HEADER, CONFIG_NAME_HEADER, CREDENTIALS_HEADER,
};
pub use retry::RetryPolicy;
pub use upload::{percent, TusUploader, UploadError};

use reqwest::StatusCode;
use thiserror::Error;

use crate::source::SourceError;

#[derive(Debug, Error)]
pub enum TusError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server responded {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Failed to read chunk: {0}")]
    Source(#[from] SourceError),
}

impl TusError {
    /// HTTP status of the failed response, if the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TusError::Status { status, .. } => Some(*status),
            TusError::Http(e) => e.status(),
            _ => None,
        }
    }

    pub(crate) async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        TusError::Status { status, body }
    }
}
