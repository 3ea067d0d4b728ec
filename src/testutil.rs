//! Shared test helpers: fixture files, a test config and an in-process mock
//! of the tus endpoint and the ingest finalize call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::Router;
use base64::Engine;
use bytes::Bytes;

use crate::config::{Config, TargetConfig, UploadConfig};
use crate::files::validation::{accept, Constraints};
use crate::files::{DroppedFile, FileDescriptor};

/// Config pointing at `base_url` with tiny chunks and no retry waits.
pub fn test_config(base_url: &str) -> Config {
    Config {
        target: TargetConfig {
            base_url: base_url.to_string(),
            env_name: "test".to_string(),
            config_name: "test-config".to_string(),
        },
        upload: UploadConfig {
            chunk_size: 8,
            retry_delays_ms: vec![5],
            request_timeout_secs: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Write `content` to `name` inside `dir` and build its descriptor.
pub fn local_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> FileDescriptor {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("Failed to write fixture file");
    let dropped = DroppedFile::from_path(&path).expect("Failed to stat fixture file");
    accept(dropped, &[], &Constraints::default()).expect("Fixture file rejected")
}

#[derive(Debug, Default)]
struct MockUpload {
    length: u64,
    data: Vec<u8>,
    file_name: Option<String>,
}

/// Recorded traffic and failure injection for the mock server.
#[derive(Default)]
pub struct MockState {
    uploads: Mutex<HashMap<String, MockUpload>>,
    order: Mutex<Vec<String>>,
    patch_failures: Mutex<VecDeque<u16>>,
    fail_all_patches: Mutex<Option<u16>>,
    finalize_status: Mutex<Option<u16>>,
    credentials: Mutex<Vec<String>>,
    creates: AtomicUsize,
    heads: AtomicUsize,
    patches: AtomicUsize,
    finalized: AtomicUsize,
}

impl MockState {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Answer every upload PATCH with `status`.
    pub fn fail_patches_with(&self, status: u16) {
        *self.fail_all_patches.lock().unwrap() = Some(status);
    }

    /// Answer the next upload PATCHes with these statuses, then behave.
    pub fn fail_next_patches(&self, statuses: &[u16]) {
        self.patch_failures.lock().unwrap().extend(statuses);
    }

    pub fn set_finalize_status(&self, status: u16) {
        *self.finalize_status.lock().unwrap() = Some(status);
    }

    /// Pretend an earlier session already sent `data`. Returns the upload path.
    pub fn seed_upload(&self, length: u64, data: &[u8]) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.lock().unwrap().insert(
            id.clone(),
            MockUpload {
                length,
                data: data.to_vec(),
                file_name: None,
            },
        );
        self.order.lock().unwrap().push(id.clone());
        format!("/files/{id}")
    }

    /// Bytes received per upload, in creation order.
    pub fn stored_bytes(&self) -> Vec<Vec<u8>> {
        let uploads = self.uploads.lock().unwrap();
        self.order
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| uploads.get(id).map(|u| u.data.clone()))
            .collect()
    }

    /// File names announced in upload metadata, in creation order.
    pub fn file_names(&self) -> Vec<String> {
        let uploads = self.uploads.lock().unwrap();
        self.order
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| uploads.get(id).and_then(|u| u.file_name.clone()))
            .collect()
    }

    /// Every `targets-credentials` header value received.
    pub fn credential_headers(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }

    fn record_credentials(&self, headers: &HeaderMap) {
        if let Some(value) = headers
            .get(crate::tus::CREDENTIALS_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.credentials.lock().unwrap().push(value.to_string());
        }
    }
}

pub struct MockIngest {
    pub base_url: String,
    pub state: Arc<MockState>,
}

/// Start the mock on an ephemeral local port.
pub async fn spawn_mock_ingest() -> MockIngest {
    let state = Arc::new(MockState::default());
    let app = Router::new()
        .route("/files", post(create_upload))
        .route("/files/:id", patch(append_upload).head(upload_offset))
        .route("/inbox/files/:id", patch(finalize_upload))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock ingest");
    let addr = listener.local_addr().expect("Mock ingest has no address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockIngest {
        base_url: format!("http://{addr}"),
        state,
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

async fn create_upload(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.creates.fetch_add(1, Ordering::SeqCst);
    state.record_credentials(&headers);

    let Some(length) = header_u64(&headers, "upload-length") else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let file_name = headers
        .get("upload-metadata")
        .and_then(|v| v.to_str().ok())
        .and_then(|meta| {
            meta.split(',').find_map(|pair| {
                let (key, value) = pair.trim().split_once(' ')?;
                (key == "fileName").then(|| value.to_string())
            })
        })
        .and_then(|encoded| base64::engine::general_purpose::STANDARD.decode(encoded).ok())
        .and_then(|raw| String::from_utf8(raw).ok());

    let id = uuid::Uuid::new_v4().simple().to_string();
    state.uploads.lock().unwrap().insert(
        id.clone(),
        MockUpload {
            length,
            data: Vec::new(),
            file_name,
        },
    );
    state.order.lock().unwrap().push(id.clone());

    (
        StatusCode::CREATED,
        [("location", format!("/files/{id}")), ("tus-resumable", "1.0.0".to_string())],
    )
        .into_response()
}

async fn upload_offset(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.heads.fetch_add(1, Ordering::SeqCst);
    state.record_credentials(&headers);

    let uploads = state.uploads.lock().unwrap();
    match uploads.get(&id) {
        Some(upload) => (
            StatusCode::OK,
            [
                ("upload-offset", upload.data.len().to_string()),
                ("upload-length", upload.length.to_string()),
            ],
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn append_upload(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.patches.fetch_add(1, Ordering::SeqCst);
    state.record_credentials(&headers);

    let injected = state
        .patch_failures
        .lock()
        .unwrap()
        .pop_front()
        .or(*state.fail_all_patches.lock().unwrap());
    if let Some(status) = injected {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    let mut uploads = state.uploads.lock().unwrap();
    let Some(upload) = uploads.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if header_u64(&headers, "upload-offset") != Some(upload.data.len() as u64) {
        return StatusCode::CONFLICT.into_response();
    }
    if upload.data.len() as u64 + body.len() as u64 > upload.length {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }
    upload.data.extend_from_slice(&body);

    (
        StatusCode::NO_CONTENT,
        [("upload-offset", upload.data.len().to_string())],
    )
        .into_response()
}

async fn finalize_upload(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.finalized.fetch_add(1, Ordering::SeqCst);
    state.record_credentials(&headers);

    if let Some(status) = *state.finalize_status.lock().unwrap() {
        return StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    let uploads = state.uploads.lock().unwrap();
    match uploads.get(&id) {
        Some(upload) if upload.data.len() as u64 == upload.length => StatusCode::OK.into_response(),
        Some(_) => StatusCode::CONFLICT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
