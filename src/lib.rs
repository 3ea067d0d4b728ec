//! upload-queue - Resumable, concurrency-bounded file uploads to an ingest service
//!
//! This crate provides the core of a dataset upload widget:
//! - Validation of dropped files and collision-free naming
//! - An observable file store driving a per-file upload lifecycle
//! - A tus 1.0 client with resume records in redb, retries and a finalize call
//! - A scheduler keeping a bounded number of uploads in flight

pub mod config;
pub mod files;
pub mod formats;
pub mod queue;
pub mod resume;
pub mod scheduler;
pub mod source;
pub mod state_machine;
pub mod status;
pub mod tus;
#[cfg(test)]
pub mod testutil;

pub use queue::{RemoveOutcome, UploadQueue};
pub use scheduler::{Scheduler, UploadTask};
