//! Read-only projection of the store for presentation.

use serde::Serialize;

use crate::files::FileDescriptor;
use crate::state_machine::LifecycleStatus;
use crate::tus::percent;

/// What a UI needs to render one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatusView {
    pub name: String,
    pub status: LifecycleStatus,
    pub progress: u8,
    pub label: String,
    pub can_retry: bool,
    pub requires_delete_confirmation: bool,
    pub submitted: bool,
}

impl FileStatusView {
    pub fn project(file: &FileDescriptor) -> Self {
        Self {
            name: file.name.clone(),
            status: file.status,
            progress: file.progress,
            label: label(file),
            can_retry: file.status == LifecycleStatus::Error,
            requires_delete_confirmation: file.requires_delete_confirmation(),
            submitted: file.submitted,
        }
    }
}

fn label(file: &FileDescriptor) -> String {
    match file.status {
        LifecycleStatus::Unqueued => "Ready".to_string(),
        LifecycleStatus::Queued => "Waiting to upload".to_string(),
        LifecycleStatus::Submitting => format!("{}% uploaded", file.progress),
        LifecycleStatus::Finalizing => "Finalizing upload".to_string(),
        LifecycleStatus::Success => "Upload complete".to_string(),
        LifecycleStatus::Error => "Error uploading, please retry".to_string(),
    }
}

pub fn project_all(files: &[FileDescriptor]) -> Vec<FileStatusView> {
    files.iter().map(FileStatusView::project).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub unqueued: usize,
    pub queued: usize,
    pub submitting: usize,
    pub finalizing: usize,
    pub success: usize,
    pub error: usize,
    pub bytes_total: u64,
    pub bytes_uploaded: u64,
    /// Byte-weighted progress over every file in the store
    pub percent: u8,
}

impl QueueSummary {
    /// Nothing queued and nothing in flight.
    pub fn is_settled(&self) -> bool {
        self.queued == 0 && self.submitting == 0 && self.finalizing == 0
    }

    pub fn has_errors(&self) -> bool {
        self.error > 0
    }
}

/// Bytes behind `progress`, never more than `size`.
fn uploaded_bytes(file: &FileDescriptor) -> u64 {
    let bytes = u128::from(file.size) * u128::from(file.progress.min(100)) / 100;
    u64::try_from(bytes).unwrap_or(file.size)
}

pub fn summarize(files: &[FileDescriptor]) -> QueueSummary {
    let mut summary = QueueSummary {
        total: files.len(),
        ..Default::default()
    };

    for file in files {
        summary.bytes_total = summary.bytes_total.saturating_add(file.size);
        match file.status {
            LifecycleStatus::Unqueued => summary.unqueued += 1,
            LifecycleStatus::Queued => summary.queued += 1,
            LifecycleStatus::Submitting => {
                summary.submitting += 1;
                let uploaded = uploaded_bytes(file);
                summary.bytes_uploaded = summary.bytes_uploaded.saturating_add(uploaded);
            }
            LifecycleStatus::Finalizing => {
                summary.finalizing += 1;
                summary.bytes_uploaded = summary.bytes_uploaded.saturating_add(file.size);
            }
            LifecycleStatus::Success => {
                summary.success += 1;
                summary.bytes_uploaded = summary.bytes_uploaded.saturating_add(file.size);
            }
            LifecycleStatus::Error => summary.error += 1,
        }
    }

    summary.percent = percent(summary.bytes_uploaded, summary.bytes_total);
    summary
}
