//! Bookkeeping that lets an interrupted upload continue where it stopped.
//!
//! A record maps a file fingerprint to the upload URL the server assigned.
//! The protocol client looks it up before creating a new upload and drops it
//! once the bytes are all on the server.

mod db;
mod tables;

pub use db::{ResumeDb, ResumeError};

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::files::FileDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub fingerprint: String,
    pub upload_url: String,
    pub file_name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

pub trait ResumeStore: Send + Sync {
    fn find(&self, fingerprint: &str) -> Result<Option<ResumeRecord>, ResumeError>;
    fn save(&self, record: &ResumeRecord) -> Result<(), ResumeError>;
    fn remove(&self, fingerprint: &str) -> Result<bool, ResumeError>;
}

/// Fingerprint of a file for a given upload endpoint.
///
/// Derived from name, size and modification time, so an edited file with the
/// same name does not resume into stale bytes.
pub fn fingerprint(file: &FileDescriptor, endpoint: &str) -> String {
    let source = format!(
        "tus-br-{}-{}-{}-{}",
        file.name,
        file.size,
        file.last_modified.timestamp_millis(),
        endpoint
    );
    let digest = ring::digest::digest(&ring::digest::SHA256, source.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_ref())
}

/// Process-local records, lost on exit.
#[derive(Default)]
pub struct MemoryResumeStore {
    records: Mutex<HashMap<String, ResumeRecord>>,
}

impl MemoryResumeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResumeStore for MemoryResumeStore {
    fn find(&self, fingerprint: &str) -> Result<Option<ResumeRecord>, ResumeError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(fingerprint).cloned())
    }

    fn save(&self, record: &ResumeRecord) -> Result<(), ResumeError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> Result<bool, ResumeError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.remove(fingerprint).is_some())
    }
}
