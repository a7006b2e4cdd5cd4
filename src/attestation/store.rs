use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::NodeTrustRecord;
use crate::error::StoreError;

/// Durable home of per-node trust records.
///
/// Stores only load and save; the evaluator is the sole mutator of record
/// contents, and callers serialize load → evaluate → save per node.
#[async_trait]
pub trait NodeTrustStore: Send + Sync {
    async fn load(&self, node_id: &str) -> Result<Option<NodeTrustRecord>, StoreError>;

    async fn save(&self, node_id: &str, record: &NodeTrustRecord) -> Result<(), StoreError>;

    /// Node ids with a stored record, sorted.
    async fn node_ids(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store for tests and embedding. Not durable.
#[derive(Default)]
pub struct MemoryTrustStore {
    records: RwLock<BTreeMap<String, NodeTrustRecord>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NodeTrustStore for MemoryTrustStore {
    async fn load(&self, node_id: &str) -> Result<Option<NodeTrustRecord>, StoreError> {
        Ok(self.records.read().await.get(node_id).cloned())
    }

    async fn save(&self, node_id: &str, record: &NodeTrustRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(node_id.to_string(), record.clone());
        Ok(())
    }

    async fn node_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

/// JSON-file store: one document mapping node id to record.
///
/// Every save rewrites the document through a temporary file and an atomic
/// rename, so a crash leaves either the old or the new document on disk.
pub struct FileTrustStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, NodeTrustRecord>>,
}

impl FileTrustStore {
    /// Open the store at `path`, loading existing records if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(raw) if raw.is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), nodes = records.len(), "opened trust store");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    async fn flush(&self, records: &BTreeMap<String, NodeTrustRecord>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeTrustStore for FileTrustStore {
    async fn load(&self, node_id: &str) -> Result<Option<NodeTrustRecord>, StoreError> {
        Ok(self.records.read().await.get(node_id).cloned())
    }

    async fn save(&self, node_id: &str, record: &NodeTrustRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let previous = records.insert(node_id.to_string(), record.clone());
        if let Err(e) = self.flush(&records).await {
            // Keep memory consistent with disk.
            match previous {
                Some(prev) => records.insert(node_id.to_string(), prev),
                None => records.remove(node_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn node_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}
