pub mod models;
mod store;
pub mod validation;

pub use models::{DroppedFile, FileDescriptor, FileField, FileKey, FileOrigin};
pub use store::{FileStore, StoreError};
pub use validation::{accept_files, Constraints, DropOutcome, Rejection};
