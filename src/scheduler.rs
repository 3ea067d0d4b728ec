//! Keeps up to N uploads in flight by promoting queued files as slots free up.
//!
//! The scheduler is level-triggered: after every store change (and every
//! credential change) it re-runs [`Scheduler::fill_slots`], which looks at the
//! whole store and promotes as many queued files as there are free slots.
//! Running it twice in a row is harmless.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::files::{FileDescriptor, FileStore};
use crate::status::summarize;
use crate::tus::{Credentials, UploadError};

/// One complete upload of one file.
///
/// Implementations write progress and intermediate statuses into the store
/// themselves; a returned error is recorded by the scheduler.
#[async_trait]
pub trait UploadTask: Send + Sync {
    async fn upload(
        &self,
        file: FileDescriptor,
        credentials: Credentials,
    ) -> Result<(), UploadError>;
}

pub struct Scheduler {
    store: Arc<FileStore>,
    uploader: Arc<dyn UploadTask>,
    credentials: watch::Receiver<Option<Credentials>>,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<FileStore>,
        uploader: Arc<dyn UploadTask>,
        credentials: watch::Receiver<Option<Credentials>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            uploader,
            credentials,
            max_concurrent,
        }
    }

    fn current_credentials(&self) -> Option<Credentials> {
        self.credentials.borrow().clone()
    }

    /// Promote queued files into free slots and return them.
    ///
    /// Without credentials nothing is promoted; files simply stay queued.
    pub fn fill_slots(&self) -> Vec<FileDescriptor> {
        if self.current_credentials().is_none() {
            return Vec::new();
        }
        self.store.promote_queued(self.max_concurrent)
    }

    fn spawn_uploads(&self, tasks: &mut JoinSet<()>) {
        let Some(credentials) = self.current_credentials() else {
            return;
        };

        for file in self.fill_slots() {
            let store = Arc::clone(&self.store);
            let uploader = Arc::clone(&self.uploader);
            let credentials = credentials.clone();
            let span = tracing::info_span!("upload", file = %file.name, key = %file.key);
            let key = file.key;

            tasks.spawn(
                async move {
                    if let Err(e) = uploader.upload(file, credentials).await {
                        store.mark_errored(key, &e.to_string());
                    }
                }
                .instrument(span),
            );
        }
    }

    /// Run until the task is dropped.
    pub async fn run(&self) {
        self.drive(false).await;
    }

    /// Run until nothing is queued or in flight.
    pub async fn run_until_settled(&self) {
        self.drive(true).await;
    }

    async fn drive(&self, stop_when_settled: bool) {
        let mut changes = self.store.subscribe();
        let mut credentials = self.credentials.clone();
        let mut credentials_open = true;
        let mut tasks = JoinSet::new();

        loop {
            let _ = changes.borrow_and_update();
            self.spawn_uploads(&mut tasks);

            if stop_when_settled
                && tasks.is_empty()
                && summarize(&self.store.snapshot()).is_settled()
            {
                break;
            }

            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = credentials.changed(), if credentials_open => {
                    if changed.is_err() {
                        // Keep the last credentials we saw.
                        credentials_open = false;
                    } else {
                        tracing::debug!("Credentials changed");
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Upload task panicked");
                    }
                }
            }
        }
    }
}
