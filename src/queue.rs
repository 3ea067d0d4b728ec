//! User-facing operations on top of the store: dropping files in, editing
//! per-file options, bulk and single retries, and removal behind a
//! confirmation step.

use std::sync::Arc;

use crate::files::{
    accept_files, Constraints, DropOutcome, DroppedFile, FileField, FileStore, StoreError,
};
use crate::formats::{FormatRegistry, ProcessingOption};
use crate::status::{project_all, summarize, FileStatusView, QueueSummary};

#[derive(Debug, Clone, PartialEq)]
pub enum RemoveOutcome {
    Removed,
    /// Submitted or in flight; call again with `confirmed = true`.
    NeedsConfirmation,
    NotFound,
}

pub struct UploadQueue {
    store: Arc<FileStore>,
    constraints: Constraints,
    registry: FormatRegistry,
    catalogue: Vec<ProcessingOption>,
}

impl UploadQueue {
    pub fn new(store: Arc<FileStore>, constraints: Constraints) -> Self {
        Self {
            store,
            constraints,
            registry: FormatRegistry::default(),
            catalogue: Vec::new(),
        }
    }

    /// Restrict drops to the registry's extensions and offer processing
    /// options from `catalogue` by type group.
    pub fn with_formats(
        mut self,
        registry: FormatRegistry,
        catalogue: Vec<ProcessingOption>,
    ) -> Self {
        self.constraints = self
            .constraints
            .with_accepted_extensions(registry.accepted_extensions().to_vec());
        self.registry = registry;
        self.catalogue = catalogue;
        self
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Validate a drop against the store and add what passes, unqueued.
    pub fn drop_files(&self, dropped: Vec<DroppedFile>) -> DropOutcome {
        let outcome = accept_files(dropped, &self.store.snapshot(), &self.constraints);
        self.store.add_files(outcome.accepted.clone());
        tracing::info!(
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "Files dropped"
        );
        outcome
    }

    /// Processing options offered for the file called `name`.
    pub fn processing_options(&self, name: &str) -> Vec<ProcessingOption> {
        self.store
            .get(name)
            .map(|file| {
                self.registry
                    .processing_options_for(&file, &self.catalogue)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Edit a user field. Processing options not offered for the file's
    /// type are dropped before the write.
    pub fn set_file_field(&self, name: &str, field: FileField) -> Result<bool, StoreError> {
        let field = match field {
            FileField::Processing(requested) => {
                let Some(file) = self.store.get(name) else {
                    return Ok(false);
                };
                let count = requested.len();
                let allowed = self
                    .registry
                    .allowed_processing(&file, requested, &self.catalogue);
                if allowed.len() < count {
                    tracing::warn!(
                        file = %name,
                        dropped = count - allowed.len(),
                        "Ignoring processing options not offered for this file type"
                    );
                }
                FileField::Processing(allowed)
            }
            other => other,
        };
        self.store.set_file_field(name, field)
    }

    pub fn queue_all(&self) -> usize {
        self.store.queue_all()
    }

    /// Manual retry of one errored file.
    pub fn retry(&self, name: &str) -> Result<bool, StoreError> {
        self.store.queue_file(name)
    }

    pub fn remove(&self, name: &str, confirmed: bool) -> RemoveOutcome {
        match self.store.remove_confirmed(name, confirmed) {
            Ok(Some(_)) => RemoveOutcome::Removed,
            Ok(None) => RemoveOutcome::NotFound,
            Err(err) => {
                tracing::debug!(file = %name, error = %err, "Removal held back");
                RemoveOutcome::NeedsConfirmation
            }
        }
    }

    pub fn views(&self) -> Vec<FileStatusView> {
        project_all(&self.store.snapshot())
    }

    pub fn summary(&self) -> QueueSummary {
        summarize(&self.store.snapshot())
    }
}
