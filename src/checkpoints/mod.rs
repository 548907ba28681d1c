//! Persisted recovery checkpoints, bounded per workbook.
//!
//! Layout in the key-value store:
//! - `workbook-guard:{workbook_id}:index` ordered list of [`CheckpointSummary`], oldest first
//! - `workbook-guard:{workbook_id}:checkpoint:{id}` one [`RecoveryCheckpoint`]
//!
//! Deleting a key writes `null`.

use crate::coordinator::normalize_workbook_id;
use crate::errors::RestoreIntegrityError;
use crate::recovery::RecoverySnapshot;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const KEY_PREFIX: &str = "workbook-guard";

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite a raw value (used to simulate stores written by other versions).
    pub fn put_raw(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.write();
        if value.is_null() {
            entries.remove(key);
        } else {
            entries.insert(key.to_string(), value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    pub checkpoint_id: String,
    pub workbook_id: String,
    pub tool_name: String,
    pub created_at: String,
    pub snapshot: RecoverySnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub tool_name: String,
    pub created_at: String,
    pub feature: String,
}

impl From<&RecoveryCheckpoint> for CheckpointSummary {
    fn from(checkpoint: &RecoveryCheckpoint) -> Self {
        Self {
            checkpoint_id: checkpoint.checkpoint_id.clone(),
            tool_name: checkpoint.tool_name.clone(),
            created_at: checkpoint.created_at.clone(),
            feature: checkpoint.snapshot.feature().to_string(),
        }
    }
}

fn index_key(workbook_id: &str) -> String {
    format!("{KEY_PREFIX}:{workbook_id}:index")
}

fn checkpoint_key(workbook_id: &str, checkpoint_id: &str) -> String {
    format!("{KEY_PREFIX}:{workbook_id}:checkpoint:{checkpoint_id}")
}

pub struct CheckpointStore {
    store: Arc<dyn SnapshotStore>,
    max_checkpoints: usize,
    // index updates are read-modify-write
    index_lock: tokio::sync::Mutex<()>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn SnapshotStore>, max_checkpoints: usize) -> Self {
        Self {
            store,
            max_checkpoints: max_checkpoints.max(1),
            index_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn max_checkpoints(&self) -> usize {
        self.max_checkpoints
    }

    async fn read_index(&self, workbook_id: &str) -> Result<Vec<CheckpointSummary>> {
        match self.store.get(&index_key(workbook_id)).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                RestoreIntegrityError::new(format!(
                    "checkpoint index for '{workbook_id}' is unreadable: {e}"
                ))
                .into()
            }),
        }
    }

    async fn write_index(&self, workbook_id: &str, index: &[CheckpointSummary]) -> Result<()> {
        let value = if index.is_empty() {
            Value::Null
        } else {
            serde_json::to_value(index).context("serialize checkpoint index")?
        };
        self.store.set(&index_key(workbook_id), value).await
    }

    /// Persist a snapshot, evicting the oldest checkpoints beyond the limit.
    pub async fn save(
        &self,
        workbook_id: &str,
        tool_name: &str,
        snapshot: RecoverySnapshot,
    ) -> Result<RecoveryCheckpoint> {
        let workbook_id = normalize_workbook_id(workbook_id);
        let checkpoint = RecoveryCheckpoint {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            workbook_id: workbook_id.clone(),
            tool_name: tool_name.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            snapshot,
        };

        let _lock = self.index_lock.lock().await;
        let value = serde_json::to_value(&checkpoint).context("serialize checkpoint")?;
        self.store
            .set(&checkpoint_key(&workbook_id, &checkpoint.checkpoint_id), value)
            .await?;

        let mut index = self.read_index(&workbook_id).await?;
        index.push(CheckpointSummary::from(&checkpoint));
        let overflow = index.len().saturating_sub(self.max_checkpoints);
        let evicted: Vec<CheckpointSummary> = index.drain(..overflow).collect();
        self.write_index(&workbook_id, &index).await?;
        for old in evicted {
            debug!(workbook_id = %workbook_id, checkpoint_id = %old.checkpoint_id, "evicting checkpoint");
            self.store
                .set(&checkpoint_key(&workbook_id, &old.checkpoint_id), Value::Null)
                .await?;
        }
        Ok(checkpoint)
    }

    /// Summaries, oldest first.
    pub async fn list(&self, workbook_id: &str) -> Result<Vec<CheckpointSummary>> {
        self.read_index(&normalize_workbook_id(workbook_id)).await
    }

    /// Load one checkpoint. A stored value that no longer deserializes is an integrity error.
    pub async fn get(
        &self,
        workbook_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<RecoveryCheckpoint>> {
        let workbook_id = normalize_workbook_id(workbook_id);
        let Some(value) = self
            .store
            .get(&checkpoint_key(&workbook_id, checkpoint_id))
            .await?
        else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        let checkpoint = serde_json::from_value(value).map_err(|e| {
            RestoreIntegrityError::new(format!("checkpoint '{checkpoint_id}' is unreadable: {e}"))
        })?;
        Ok(Some(checkpoint))
    }

    pub async fn delete(&self, workbook_id: &str, checkpoint_id: &str) -> Result<bool> {
        let workbook_id = normalize_workbook_id(workbook_id);
        let _lock = self.index_lock.lock().await;
        let mut index = self.read_index(&workbook_id).await?;
        let before = index.len();
        index.retain(|entry| entry.checkpoint_id != checkpoint_id);
        let removed = index.len() != before;
        if removed {
            self.write_index(&workbook_id, &index).await?;
        }
        self.store
            .set(&checkpoint_key(&workbook_id, checkpoint_id), Value::Null)
            .await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_workbook() {
        assert_eq!(index_key("wb-1"), "workbook-guard:wb-1:index");
        assert_eq!(
            checkpoint_key("wb-1", "abc"),
            "workbook-guard:wb-1:checkpoint:abc"
        );
    }
}
