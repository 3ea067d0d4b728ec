//! Acceptance rules for newly dropped files and stored-name disambiguation.
//!
//! Everything here is pure: callers pass the current store contents in and
//! get a verdict (and a collision-free name) back.

use serde::Serialize;
use thiserror::Error;

use super::models::{DroppedFile, FileDescriptor};

/// Characters that the ingest side cannot handle in a file name.
pub const FORBIDDEN_CHARACTERS: &[char] = &['/', ':', '*', '?', '"', '<', '>', '|', ';', '#'];

/// Why a dropped file was refused. The file never enters the store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rejection {
    #[error("File name contains invalid characters")]
    InvalidName,
    #[error("File size too large: maximum is {max} bytes")]
    TooLarge { max: u64 },
    #[error("File is empty")]
    Empty,
    #[error("File {0} already added")]
    Duplicate(String),
    #[error("File name not allowed")]
    NotAllowed,
    #[error("File type .{0} is not accepted")]
    UnsupportedType(String),
}

impl Rejection {
    /// Stable machine-readable code for the UI.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::InvalidName => "invalid-name",
            Rejection::TooLarge { .. } => "too-large",
            Rejection::Empty => "empty",
            Rejection::Duplicate(_) => "duplicate",
            Rejection::NotAllowed => "not-allowed",
            Rejection::UnsupportedType(_) => "unsupported-type",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Constraints {
    /// Inclusive upper bound on file size in bytes
    pub max_file_size: u64,
    /// Names containing any of these are refused
    pub reserved_substrings: Vec<String>,
    /// Names equal (case-insensitively) to any of these are refused
    pub reserved_names: Vec<String>,
    /// Lowercase extensions without the dot; `None` accepts every type
    pub accepted_extensions: Option<Vec<String>>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_file_size: 1_000_000 * 1024 * 1024,
            reserved_substrings: vec!["__generated__form-metadata".to_string()],
            reserved_names: vec![
                "oral history metadata private.txt".to_string(),
                "oral history metadata public.txt".to_string(),
            ],
            accepted_extensions: None,
        }
    }
}

impl Constraints {
    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_accepted_extensions(mut self, extensions: Vec<String>) -> Self {
        self.accepted_extensions = Some(
            extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        );
        self
    }
}

/// Split `name` into base and extension (extension keeps its leading dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => name.split_at(idx),
        None => (name, ""),
    }
}

/// Check a candidate against the rules, first failure wins.
pub fn validate(
    candidate: &DroppedFile,
    existing: &[FileDescriptor],
    constraints: &Constraints,
) -> Result<(), Rejection> {
    let name = candidate.name.as_str();

    if name.is_empty() || name.contains(FORBIDDEN_CHARACTERS) {
        return Err(Rejection::InvalidName);
    }

    if candidate.size > constraints.max_file_size {
        return Err(Rejection::TooLarge {
            max: constraints.max_file_size,
        });
    }

    if candidate.size == 0 {
        return Err(Rejection::Empty);
    }

    let (base, extension) = split_extension(name);
    let duplicate = existing.iter().any(|f| {
        let (existing_base, existing_extension) = split_extension(&f.name);
        existing_base.contains(base) && existing_extension == extension && f.size == candidate.size
    });
    if duplicate {
        return Err(Rejection::Duplicate(name.to_string()));
    }

    let lowered = name.to_lowercase();
    if constraints
        .reserved_substrings
        .iter()
        .any(|s| name.contains(s.as_str()))
        || constraints
            .reserved_names
            .iter()
            .any(|n| n.to_lowercase() == lowered)
    {
        return Err(Rejection::NotAllowed);
    }

    if let Some(ref accepted) = constraints.accepted_extensions {
        let ext = extension.trim_start_matches('.').to_lowercase();
        if !accepted.contains(&ext) {
            return Err(Rejection::UnsupportedType(ext));
        }
    }

    Ok(())
}

/// Name under which `name` can be stored without colliding: `a.txt`,
/// then `a(1).txt`, `a(2).txt`, ...
pub fn unique_name(name: &str, existing: &[FileDescriptor]) -> String {
    let taken = |candidate: &str| existing.iter().any(|f| f.name == candidate);
    if !taken(name) {
        return name.to_string();
    }

    let (base, extension) = split_extension(name);
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}({n}){extension}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Validate one file and build its descriptor.
pub fn accept(
    dropped: DroppedFile,
    existing: &[FileDescriptor],
    constraints: &Constraints,
) -> Result<FileDescriptor, Rejection> {
    validate(&dropped, existing, constraints)?;
    let name = unique_name(&dropped.name, existing);
    Ok(FileDescriptor::new(dropped, name))
}

/// Outcome of validating a whole drop.
#[derive(Debug, Default)]
pub struct DropOutcome {
    pub accepted: Vec<FileDescriptor>,
    pub rejected: Vec<(String, Rejection)>,
}

/// Validate a batch. Files accepted earlier in the same batch count as
/// existing for the later ones.
pub fn accept_files(
    dropped: Vec<DroppedFile>,
    existing: &[FileDescriptor],
    constraints: &Constraints,
) -> DropOutcome {
    let mut seen: Vec<FileDescriptor> = existing.to_vec();
    let mut outcome = DropOutcome::default();

    for file in dropped {
        let original_name = file.name.clone();
        match accept(file, &seen, constraints) {
            Ok(descriptor) => {
                seen.push(descriptor.clone());
                outcome.accepted.push(descriptor);
            }
            Err(rejection) => {
                tracing::debug!(file = %original_name, code = rejection.code(), "Rejected file");
                outcome.rejected.push((original_name, rejection));
            }
        }
    }

    outcome
}
