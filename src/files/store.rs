use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

use super::models::{FileDescriptor, FileField, FileKey};
use crate::state_machine::{check_transition, LifecycleStatus, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("File {0} was already submitted and can no longer be changed")]
    Submitted(String),
    #[error("Removing {0} needs confirmation")]
    ConfirmationRequired(String),
}

/// Ordered collection of file descriptors, keyed by name.
///
/// Each operation takes the lock once and releases it before returning, so
/// whole-collection operations (`queue_all`, `reset`) are atomic with respect
/// to per-file writes from upload tasks. Every mutation bumps the version
/// published on [`FileStore::subscribe`].
pub struct FileStore {
    files: Mutex<Vec<FileDescriptor>>,
    changes: watch::Sender<u64>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            files: Mutex::new(Vec::new()),
            changes,
        }
    }

    /// Receive a notification after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current mutation counter.
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FileDescriptor>> {
        // A panicked writer leaves rows whole, so keep serving them.
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    // ========================================================================
    // Read operations
    // ========================================================================

    pub fn snapshot(&self) -> Vec<FileDescriptor> {
        self.lock().clone()
    }

    pub fn get(&self, name: &str) -> Option<FileDescriptor> {
        self.lock().iter().find(|f| f.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // ========================================================================
    // User operations
    // ========================================================================

    /// Append descriptors. Names are expected to be resolved by validation.
    pub fn add_files(&self, files: Vec<FileDescriptor>) {
        if files.is_empty() {
            return;
        }
        {
            let mut guard = self.lock();
            debug_assert!(
                files
                    .iter()
                    .all(|f| guard.iter().all(|existing| existing.name != f.name)),
                "file names must be unique within the store"
            );
            guard.extend(files);
        }
        self.notify();
    }

    /// Remove a file unconditionally. [`FileStore::remove_confirmed`] is the
    /// guarded variant.
    pub fn remove_file(&self, name: &str) -> Option<FileDescriptor> {
        let removed = {
            let mut guard = self.lock();
            let idx = guard.iter().position(|f| f.name == name)?;
            guard.remove(idx)
        };
        tracing::debug!(file = %name, status = %removed.status, "Removed file");
        self.notify();
        Some(removed)
    }

    /// Remove a file, refusing submitted or in-flight files unless
    /// `confirmed`. The check and the removal happen under one lock.
    pub fn remove_confirmed(
        &self,
        name: &str,
        confirmed: bool,
    ) -> Result<Option<FileDescriptor>, StoreError> {
        let removed = {
            let mut guard = self.lock();
            let Some(idx) = guard.iter().position(|f| f.name == name) else {
                return Ok(None);
            };
            if !confirmed && guard[idx].requires_delete_confirmation() {
                return Err(StoreError::ConfirmationRequired(name.to_string()));
            }
            guard.remove(idx)
        };
        tracing::debug!(file = %name, status = %removed.status, "Removed file");
        self.notify();
        Ok(Some(removed))
    }

    /// Update one user-editable field. Returns `Ok(false)` if the file is gone.
    pub fn set_file_field(&self, name: &str, field: FileField) -> Result<bool, StoreError> {
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.name == name) else {
                return Ok(false);
            };
            if file.submitted {
                return Err(StoreError::Submitted(name.to_string()));
            }
            field.apply(file);
        }
        self.notify();
        Ok(true)
    }

    /// Queue every file that is waiting or failed. Returns how many moved.
    ///
    /// Files that already succeeded stay put, as do files owned by a running
    /// upload.
    pub fn queue_all(&self) -> usize {
        let queued = {
            let mut guard = self.lock();
            let mut queued = 0;
            for file in guard.iter_mut() {
                if file.status.can_transition_to(LifecycleStatus::Queued) {
                    file.status = LifecycleStatus::Queued;
                    file.progress = 0;
                    queued += 1;
                }
            }
            queued
        };
        if queued > 0 {
            tracing::debug!(count = queued, "Queued files");
            self.notify();
        }
        queued
    }

    /// Queue a single file, e.g. a manual retry after an error.
    pub fn queue_file(&self, name: &str) -> Result<bool, StoreError> {
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.name == name) else {
                return Ok(false);
            };
            check_transition(file.status, LifecycleStatus::Queued)?;
            file.status = LifecycleStatus::Queued;
            file.progress = 0;
        }
        self.notify();
        Ok(true)
    }

    /// Drop every descriptor.
    pub fn reset(&self) {
        self.lock().clear();
        self.notify();
    }

    // ========================================================================
    // Upload-task operations (keyed by FileKey)
    // ========================================================================

    /// Move a file to `to`. `Ok(false)` when the key is no longer present.
    pub fn transition(&self, key: FileKey, to: LifecycleStatus) -> Result<bool, StoreError> {
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.key == key) else {
                return Ok(false);
            };
            check_transition(file.status, to)?;
            tracing::debug!(file = %file.name, from = %file.status, to = %to, "Status change");
            file.status = to;
            if to == LifecycleStatus::Queued {
                file.progress = 0;
            }
        }
        self.notify();
        Ok(true)
    }

    /// Record upload progress. Ignored unless the file is submitting, and
    /// never moves backwards.
    pub fn set_progress(&self, key: FileKey, percent: u8) -> bool {
        let percent = percent.min(100);
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.key == key) else {
                return false;
            };
            if file.status != LifecycleStatus::Submitting || percent <= file.progress {
                return false;
            }
            file.progress = percent;
        }
        self.notify();
        true
    }

    /// Ingest confirmed the file: flag it submitted and move it to success.
    pub fn mark_submitted(&self, key: FileKey) -> Result<bool, StoreError> {
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.key == key) else {
                return Ok(false);
            };
            check_transition(file.status, LifecycleStatus::Success)?;
            file.submitted = true;
            file.status = LifecycleStatus::Success;
            tracing::info!(file = %file.name, "Upload complete");
        }
        self.notify();
        Ok(true)
    }

    /// The single way a file ends up needing a manual retry.
    pub fn mark_errored(&self, key: FileKey, reason: &str) -> bool {
        {
            let mut guard = self.lock();
            let Some(file) = guard.iter_mut().find(|f| f.key == key) else {
                return false;
            };
            if let Err(e) = check_transition(file.status, LifecycleStatus::Error) {
                tracing::warn!(
                    file = %file.name,
                    error = %e,
                    reason,
                    "Cannot mark file as errored"
                );
                return false;
            }
            file.status = LifecycleStatus::Error;
            tracing::error!(file = %file.name, reason, "Upload failed, manual retry required");
        }
        self.notify();
        true
    }

    /// Promote queued files to submitting, in store order, until at most
    /// `limit` files are in flight. The check and the promotion happen under
    /// one lock, so repeated calls never promote the same file twice.
    pub fn promote_queued(&self, limit: usize) -> Vec<FileDescriptor> {
        let promoted = {
            let mut guard = self.lock();
            let in_flight = guard.iter().filter(|f| f.status.is_in_flight()).count();
            let free = limit.saturating_sub(in_flight);

            let mut promoted = Vec::new();
            for file in guard
                .iter_mut()
                .filter(|f| f.status == LifecycleStatus::Queued)
                .take(free)
            {
                file.status = LifecycleStatus::Submitting;
                file.progress = 0;
                promoted.push(file.clone());
            }
            promoted
        };
        if !promoted.is_empty() {
            self.notify();
        }
        promoted
    }
}
