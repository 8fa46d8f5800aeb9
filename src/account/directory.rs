//! Account directory and snapshot persistence.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::account::types::Account;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory snapshot is invalid: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Where accounts live. Keyed by owning identity.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<Account>, DirectoryError>;

    /// Insert or replace the account for `account.identity`.
    async fn put(&self, account: Account) -> Result<(), DirectoryError>;

    async fn list(&self) -> Result<Vec<Account>, DirectoryError>;
}

/// A thread-safe in-process directory with an optional JSON snapshot.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<DashMap<String, Account>>,
    snapshot_path: Option<String>,
}

impl InMemoryDirectory {
    pub fn new(snapshot_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            snapshot_path,
        }
    }

    /// Load from the snapshot file if it exists.
    pub fn load_from_file(path: &str) -> Result<Self, DirectoryError> {
        let directory = Self::new(Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let map: HashMap<String, Account> = serde_json::from_reader(reader)?;
            for (k, v) in map {
                directory.inner.insert(k, v);
            }
            metrics::record_account_count(directory.inner.len());
            tracing::info!(count = directory.inner.len(), path, "Loaded account directory snapshot");
        }
        Ok(directory)
    }

    /// Write the snapshot file, if one is configured.
    pub fn save_to_file(&self) -> Result<(), DirectoryError> {
        if let Some(path) = &self.snapshot_path {
            let map: HashMap<_, _> = self
                .inner
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect();
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer(writer, &map)?;
            tracing::info!(count = map.len(), path = %path, "Saved account directory snapshot");
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryDirectory {
    async fn get(&self, identity: &str) -> Result<Option<Account>, DirectoryError> {
        Ok(self.inner.get(identity).map(|r| r.value().clone()))
    }

    async fn put(&self, account: Account) -> Result<(), DirectoryError> {
        self.inner.insert(account.identity.clone(), account);
        metrics::record_account_count(self.inner.len());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Account>, DirectoryError> {
        let mut accounts: Vec<Account> = self.inner.iter().map(|r| r.value().clone()).collect();
        accounts.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(accounts)
    }
}
