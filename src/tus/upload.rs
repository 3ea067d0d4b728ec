use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use thiserror::Error;

use super::client::{upload_id, TusClient};
use super::credentials::{Credentials, UploadAuth};
use super::retry::RetryPolicy;
use super::TusError;
use crate::config::{Config, TargetConfig};
use crate::files::{FileDescriptor, FileKey, FileStore, StoreError};
use crate::resume::{fingerprint, ResumeRecord, ResumeStore};
use crate::scheduler::UploadTask;
use crate::source::{ByteSource, Payload, SourceError};
use crate::state_machine::LifecycleStatus;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to fetch file: {0}")]
    Source(#[from] SourceError),
    #[error("Transfer failed after {attempts} attempt(s): {source}")]
    Transfer { attempts: u32, source: TusError },
    /// The bytes reached the server but ingest did not confirm them.
    #[error("Finalize failed: {0}")]
    Finalize(TusError),
    #[error("Invalid credentials: {0}")]
    Credentials(TusError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// `round(uploaded / total * 100)`, 0 for an empty total.
pub fn percent(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (uploaded as f64 / total as f64 * 100.0).round();
    if pct.is_nan() {
        0
    } else {
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Drives one file through the whole resumable upload.
pub struct TusUploader {
    store: Arc<FileStore>,
    client: TusClient,
    source: Arc<dyn ByteSource>,
    resume: Arc<dyn ResumeStore>,
    target: TargetConfig,
    chunk_size: u64,
    retry: RetryPolicy,
}

impl TusUploader {
    pub fn new(
        config: &Config,
        http: reqwest::Client,
        store: Arc<FileStore>,
        source: Arc<dyn ByteSource>,
        resume: Arc<dyn ResumeStore>,
    ) -> Self {
        Self {
            store,
            client: TusClient::new(http, &config.target.base_url, config.request_timeout()),
            source,
            resume,
            target: config.target.clone(),
            chunk_size: config.upload.chunk_size.max(1),
            retry: config.retry_policy(),
        }
    }

    fn report_progress(&self, key: FileKey, uploaded: u64, total: u64) {
        self.store.set_progress(key, percent(uploaded, total));
    }

    fn forget(&self, fingerprint: &str) {
        if let Err(e) = self.resume.remove(fingerprint) {
            tracing::warn!(error = %e, "Failed to remove resume record");
        }
    }

    /// Upload URL of an earlier, interrupted attempt at this file.
    fn previous_upload(&self, fingerprint: &str) -> Option<String> {
        match self.resume.find(fingerprint) {
            Ok(record) => record.map(|r| r.upload_url),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read resume record");
                None
            }
        }
    }

    /// One attempt: resume or create, then PATCH until the server has it all.
    /// `upload_url` carries the server's upload across attempts.
    async fn transfer(
        &self,
        file: &FileDescriptor,
        payload: &Payload,
        headers: &HeaderMap,
        fingerprint: &str,
        upload_url: &mut Option<String>,
    ) -> Result<(), TusError> {
        let total = payload.len();

        let mut offset = None;
        if let Some(url) = upload_url.as_deref() {
            match self.client.offset(headers, url).await? {
                Some(o) if o <= total => {
                    tracing::info!(upload_url = %url, offset = o, total, "Resuming upload");
                    offset = Some(o);
                }
                _ => {
                    self.forget(fingerprint);
                    *upload_url = None;
                }
            }
        }

        let (url, mut offset) = match (upload_url.clone(), offset) {
            (Some(url), Some(offset)) => (url, offset),
            _ => {
                let url = self.client.create(headers, total, &file.name).await?;
                let record = ResumeRecord {
                    fingerprint: fingerprint.to_string(),
                    upload_url: url.clone(),
                    file_name: file.name.clone(),
                    size: total,
                    created_at: Utc::now(),
                };
                if let Err(e) = self.resume.save(&record) {
                    tracing::warn!(error = %e, "Failed to save resume record");
                }
                *upload_url = Some(url.clone());
                (url, 0)
            }
        };

        self.report_progress(file.key, offset, total);
        while offset < total {
            let chunk = payload.chunk(offset, self.chunk_size).await?;
            offset = self.client.patch(headers, &url, offset, chunk).await?;
            tracing::debug!(offset, total, "Chunk acknowledged");
            self.report_progress(file.key, offset, total);
        }

        Ok(())
    }

    /// Transfer with the retry policy applied. Returns the upload URL.
    async fn transfer_with_retry(
        &self,
        file: &FileDescriptor,
        payload: &Payload,
        headers: &HeaderMap,
        fingerprint: &str,
    ) -> Result<String, UploadError> {
        let mut upload_url = self.previous_upload(fingerprint);
        let mut attempt = 0u32;

        loop {
            match self
                .transfer(file, payload, headers, fingerprint, &mut upload_url)
                .await
            {
                Ok(()) => {
                    return upload_url.ok_or_else(|| UploadError::Transfer {
                        attempts: attempt + 1,
                        source: TusError::Protocol("transfer finished without an upload".into()),
                    });
                }
                Err(e) => {
                    if !self.retry.should_retry(&e, attempt) {
                        return Err(UploadError::Transfer {
                            attempts: attempt + 1,
                            source: e,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transfer attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl UploadTask for TusUploader {
    async fn upload(
        &self,
        file: FileDescriptor,
        credentials: Credentials,
    ) -> Result<(), UploadError> {
        let headers = UploadAuth::new(credentials, &self.target)
            .headers()
            .map_err(UploadError::Credentials)?;

        let payload = self.source.resolve(&file.origin).await?;
        tracing::info!(size = payload.len(), "Starting upload");

        let fingerprint = fingerprint(&file, &self.client.endpoint());
        let upload_url = self
            .transfer_with_retry(&file, &payload, &headers, &fingerprint)
            .await?;
        self.forget(&fingerprint);

        if !self.store.transition(file.key, LifecycleStatus::Finalizing)? {
            tracing::debug!("File left the store during transfer, skipping finalize");
            return Ok(());
        }

        let id = upload_id(&upload_url).ok_or_else(|| {
            UploadError::Finalize(TusError::Protocol(format!(
                "no upload id in {upload_url}"
            )))
        })?;
        self.client
            .finalize(&headers, id)
            .await
            .map_err(UploadError::Finalize)?;

        self.store.mark_submitted(file.key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileField;
    use crate::resume::MemoryResumeStore;
    use crate::source::OriginResolver;
    use crate::testutil::{local_file, spawn_mock_ingest, test_config};

    fn credentials() -> Credentials {
        Credentials::new(Some("token".into()), Some("doi:10.5072/TEST".into())).unwrap()
    }

    struct Harness {
        dir: tempfile::TempDir,
        store: Arc<FileStore>,
        resume: Arc<MemoryResumeStore>,
        uploader: TusUploader,
        file: FileDescriptor,
    }

    async fn harness(base_url: &str, content: &[u8]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new());
        let resume = Arc::new(MemoryResumeStore::new());
        let config = test_config(base_url);
        let http = reqwest::Client::new();
        let uploader = TusUploader::new(
            &config,
            http.clone(),
            Arc::clone(&store),
            Arc::new(OriginResolver::new(http)),
            resume.clone(),
        );

        let file = local_file(&dir, "data.csv", content);
        store.add_files(vec![file.clone()]);
        store.queue_all();
        let promoted = store.promote_queued(1);
        assert_eq!(promoted.len(), 1);

        Harness {
            dir,
            store,
            resume,
            uploader,
            file: promoted[0].clone(),
        }
    }

    #[test]
    fn test_percent_rounds_and_guards_zero() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(20, 10), 100);
    }

    #[tokio::test]
    async fn test_upload_succeeds_and_finalizes() {
        let mock = spawn_mock_ingest().await;
        let content = b"a,b,c\n1,2,3\n4,5,6\n7,8,9\n";
        let h = harness(&mock.base_url, content).await;

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        let file = h.store.get("data.csv").unwrap();
        assert_eq!(file.status, LifecycleStatus::Success);
        assert!(file.submitted);
        assert_eq!(mock.state.finalized(), 1);
        assert_eq!(mock.state.stored_bytes(), vec![content.to_vec()]);
        assert_eq!(mock.state.file_names(), vec!["data.csv".to_string()]);
        // chunk size 8 in tests
        assert_eq!(mock.state.patches(), content.len().div_ceil(8));
        let fp = fingerprint(&h.file, &h.uploader.client.endpoint());
        assert!(h.resume.find(&fp).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_reach_every_request() {
        let mock = spawn_mock_ingest().await;
        let h = harness(&mock.base_url, b"0123456789").await;

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        let seen = mock.state.credential_headers();
        assert!(!seen.is_empty());
        for header in seen {
            let bundle: serde_json::Value = serde_json::from_str(&header).unwrap();
            assert_eq!(bundle["dataverse_api_key"], "token");
            assert_eq!(bundle["doi"], "doi:10.5072/TEST");
        }
    }

    #[tokio::test]
    async fn test_forbidden_is_not_retried() {
        let mock = spawn_mock_ingest().await;
        mock.state.fail_patches_with(403);
        let h = harness(&mock.base_url, b"0123456789").await;

        let err = h
            .uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Transfer { attempts: 1, .. }));
        assert_eq!(mock.state.patches(), 1);
        assert_eq!(mock.state.finalized(), 0);
    }

    #[tokio::test]
    async fn test_server_error_retries_twice() {
        let mock = spawn_mock_ingest().await;
        mock.state.fail_patches_with(500);
        let h = harness(&mock.base_url, b"0123456789").await;

        let err = h
            .uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Transfer { attempts: 3, .. }));
        assert_eq!(mock.state.patches(), 3);
        // retries resume the same upload instead of creating new ones
        assert_eq!(mock.state.creates(), 1);
        assert_eq!(h.store.get("data.csv").unwrap().status, LifecycleStatus::Submitting);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let mock = spawn_mock_ingest().await;
        mock.state.fail_next_patches(&[503]);
        let content = b"0123456789abcdef";
        let h = harness(&mock.base_url, content).await;

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        assert_eq!(mock.state.stored_bytes(), vec![content.to_vec()]);
        assert_eq!(h.store.get("data.csv").unwrap().status, LifecycleStatus::Success);
    }

    #[tokio::test]
    async fn test_resumes_from_previous_upload() {
        let mock = spawn_mock_ingest().await;
        let content = b"0123456789abcdefghij";
        let h = harness(&mock.base_url, content).await;

        // An earlier session got the first 8 bytes across.
        let upload_url = mock.state.seed_upload(content.len() as u64, &content[..8]);
        let fp = fingerprint(&h.file, &h.uploader.client.endpoint());
        h.resume
            .save(&ResumeRecord {
                fingerprint: fp.clone(),
                upload_url: format!("{}{}", mock.base_url, upload_url),
                file_name: "data.csv".into(),
                size: content.len() as u64,
                created_at: Utc::now(),
            })
            .unwrap();

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        assert_eq!(mock.state.creates(), 0);
        assert_eq!(mock.state.heads(), 1);
        // 12 remaining bytes in chunks of 8
        assert_eq!(mock.state.patches(), 2);
        assert_eq!(mock.state.stored_bytes(), vec![content.to_vec()]);
        assert!(h.resume.find(&fp).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_resume_record_creates_new_upload() {
        let mock = spawn_mock_ingest().await;
        let h = harness(&mock.base_url, b"0123456789").await;
        let fp = fingerprint(&h.file, &h.uploader.client.endpoint());
        h.resume
            .save(&ResumeRecord {
                fingerprint: fp,
                upload_url: format!("{}/files/does-not-exist", mock.base_url),
                file_name: "data.csv".into(),
                size: 10,
                created_at: Utc::now(),
            })
            .unwrap();

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        assert_eq!(mock.state.heads(), 1);
        assert_eq!(mock.state.creates(), 1);
        assert_eq!(h.store.get("data.csv").unwrap().status, LifecycleStatus::Success);
    }

    #[tokio::test]
    async fn test_finalize_failure_is_not_retried() {
        let mock = spawn_mock_ingest().await;
        mock.state.set_finalize_status(502);
        let h = harness(&mock.base_url, b"0123456789").await;

        let err = h
            .uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Finalize(_)));
        assert_eq!(mock.state.finalized(), 1);
        let file = h.store.get("data.csv").unwrap();
        assert_eq!(file.status, LifecycleStatus::Finalizing);
        assert!(!file.submitted);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_transfer() {
        let mock = spawn_mock_ingest().await;
        let h = harness(&mock.base_url, b"0123456789").await;
        let mut file = h.file.clone();
        file.origin = crate::files::FileOrigin::Local(h.dir.path().join("gone.csv"));

        let err = h.uploader.upload(file, credentials()).await.unwrap_err();

        assert!(matches!(err, UploadError::Source(SourceError::NotFound(_))));
        assert_eq!(mock.state.creates(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_alongside_user_edits() {
        let mock = spawn_mock_ingest().await;
        let h = harness(&mock.base_url, b"0123456789abcdef").await;
        h.store
            .set_file_field("data.csv", FileField::Private(true))
            .unwrap();

        let mut changes = h.store.subscribe();
        let store = Arc::clone(&h.store);
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while changes.changed().await.is_ok() {
                let Some(file) = store.get("data.csv") else { break };
                if file.status == LifecycleStatus::Submitting {
                    seen.push(file.progress);
                }
                if file.status != LifecycleStatus::Submitting {
                    break;
                }
            }
            seen
        });

        h.uploader
            .upload(h.file.clone(), credentials())
            .await
            .unwrap();

        let seen = watcher.await.unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(h.store.get("data.csv").unwrap().private);
    }
}
