use redb::{Database as RedbDatabase, ReadableTable, ReadableTableMetadata};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;
use super::{ResumeRecord, ResumeStore};

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for ResumeError {
    fn from(e: redb::CommitError) -> Self {
        ResumeError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for ResumeError {
    fn from(e: redb::DatabaseError) -> Self {
        ResumeError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::StorageError> for ResumeError {
    fn from(e: redb::StorageError) -> Self {
        ResumeError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for ResumeError {
    fn from(e: redb::TableError) -> Self {
        ResumeError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for ResumeError {
    fn from(e: redb::TransactionError) -> Self {
        ResumeError::Transaction(Box::new(e))
    }
}

/// Resume records persisted across runs in a redb file.
#[derive(Clone)]
pub struct ResumeDb {
    db: Arc<RedbDatabase>,
}

impl ResumeDb {
    /// Open or create the database inside `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("upload-queue.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(UPLOADS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Number of stored records
    pub fn count(&self) -> Result<u64, ResumeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;
        Ok(table.len()?)
    }

    /// All stored records, e.g. to list interrupted uploads on startup
    pub fn all(&self) -> Result<Vec<ResumeRecord>, ResumeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;

        let mut records = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            records.push(rmp_serde::from_slice(value.value())?);
        }
        Ok(records)
    }
}

impl ResumeStore for ResumeDb {
    fn find(&self, fingerprint: &str) -> Result<Option<ResumeRecord>, ResumeError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UPLOADS)?;

        match table.get(fingerprint)? {
            Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
            None => Ok(None),
        }
    }

    fn save(&self, record: &ResumeRecord) -> Result<(), ResumeError> {
        debug_assert!(!record.fingerprint.is_empty(), "fingerprint must not be empty");

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(UPLOADS)?;
            let data = rmp_serde::to_vec_named(record)?;
            table.insert(record.fingerprint.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, fingerprint: &str) -> Result<bool, ResumeError> {
        let write_txn = self.db.begin_write()?;
        let removed = write_txn.open_table(UPLOADS)?.remove(fingerprint)?.is_some();
        write_txn.commit()?;
        Ok(removed)
    }
}
