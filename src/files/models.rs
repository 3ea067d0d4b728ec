use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state_machine::LifecycleStatus;

/// Identity of one insertion into the store.
///
/// Names can be reused after a removal or reset, keys never are, so upload
/// tasks address their descriptor by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey(Uuid);

impl FileKey {
    pub fn new() -> Self {
        FileKey(Uuid::new_v4())
    }
}

impl Default for FileKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", content = "reference", rename_all = "lowercase")]
pub enum FileOrigin {
    Local(PathBuf),
    Remote(String),
}

/// A file as handed over by the selection UI, before validation.
#[derive(Debug, Clone)]
pub struct DroppedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub origin: FileOrigin,
    pub last_modified: DateTime<Utc>,
}

impl DroppedFile {
    /// Describe a local file from its filesystem metadata.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::UNIX_EPOCH);

        Ok(Self {
            mime_type: guess_mime(&name),
            name,
            size: metadata.len(),
            origin: FileOrigin::Local(path.to_path_buf()),
            last_modified,
        })
    }

    /// Describe a remote file. Size is supplied by the caller (e.g. from a
    /// listing), since it is not fetched here.
    ///
    /// The modification time defaults to the Unix epoch so the same URL keeps
    /// the same resume fingerprint; see [`DroppedFile::with_last_modified`].
    pub fn from_url(url: &str, size: u64) -> Self {
        let name = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        Self {
            mime_type: guess_mime(&name),
            name,
            size,
            origin: FileOrigin::Remote(url.to_string()),
            last_modified: DateTime::UNIX_EPOCH,
        }
    }

    /// Use a server-reported modification time, e.g. `Last-Modified`.
    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// One user-selected file and its upload lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub key: FileKey,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub origin: FileOrigin,
    pub last_modified: DateTime<Utc>,

    // User-editable
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub processing: Vec<String>,
    #[serde(default)]
    pub valid: Option<bool>,

    // Upload lifecycle
    #[serde(default)]
    pub status: LifecycleStatus,
    /// Percent uploaded. Only meaningful while submitting.
    #[serde(default)]
    pub progress: u8,
    /// Set once the ingest service confirmed the file.
    #[serde(default)]
    pub submitted: bool,
}

impl FileDescriptor {
    pub fn new(dropped: DroppedFile, name: String) -> Self {
        Self {
            key: FileKey::new(),
            name,
            size: dropped.size,
            mime_type: dropped.mime_type,
            origin: dropped.origin,
            last_modified: dropped.last_modified,
            private: false,
            role: None,
            processing: Vec::new(),
            valid: None,
            status: LifecycleStatus::Unqueued,
            progress: 0,
            submitted: false,
        }
    }

    /// Removing this file must go through an explicit confirmation step.
    pub fn requires_delete_confirmation(&self) -> bool {
        self.submitted
            || !matches!(
                self.status,
                LifecycleStatus::Unqueued | LifecycleStatus::Error
            )
    }

    /// File extension without the dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// A partial update to one of the user-editable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "lowercase")]
pub enum FileField {
    Private(bool),
    Role(Option<String>),
    Processing(Vec<String>),
    Valid(bool),
}

impl FileField {
    pub(crate) fn apply(self, file: &mut FileDescriptor) {
        match self {
            FileField::Private(private) => file.private = private,
            FileField::Role(role) => file.role = role,
            FileField::Processing(options) => {
                let mut deduped: Vec<String> = Vec::with_capacity(options.len());
                for option in options {
                    if !deduped.contains(&option) {
                        deduped.push(option);
                    }
                }
                file.processing = deduped;
            }
            FileField::Valid(valid) => file.valid = Some(valid),
        }
    }
}
