//! Persisted synchronization state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use attrsync_common::Result;
use attrsync_storage::{keys, KeyValueStore, KeyValueStoreExt};

use crate::attributes::{AttributeState, Snapshot, TagState};

/// Version/transaction bookkeeping for the attribute snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// `0` means there is nothing to send.
    pub version: u64,
    /// Server transaction acknowledging a send of `version`.
    pub transaction_id: Option<String>,
    /// Epoch millis of the last successful check.
    pub last_check: Option<i64>,
}

impl SyncState {
    /// Whether a send for the current version is still outstanding.
    pub fn needs_send(&self) -> bool {
        self.version >= 1 && self.transaction_id.is_none()
    }

    /// Whether there is an acknowledged transaction to check.
    pub fn can_check(&self) -> bool {
        self.version >= 1 && self.transaction_id.is_some()
    }
}

/// Typed access to the sync keys of a [`KeyValueStore`].
///
/// Missing keys read as their zero value.
#[derive(Clone)]
pub struct SyncStateStore {
    store: Arc<dyn KeyValueStore>,
}

impl SyncStateStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the version, transaction id and last check together.
    pub async fn load(&self) -> Result<SyncState> {
        Ok(SyncState {
            version: self.version().await?,
            transaction_id: self.transaction_id().await?,
            last_check: self.last_check().await?,
        })
    }

    pub async fn version(&self) -> Result<u64> {
        Ok(self.store.get_typed(keys::VERSION).await?.unwrap_or(0))
    }

    pub async fn set_version(&self, version: u64) -> Result<()> {
        self.store.set_typed(keys::VERSION, &version).await
    }

    pub async fn transaction_id(&self) -> Result<Option<String>> {
        self.store.get_typed(keys::TRANSACTION_ID).await
    }

    /// `None` removes the stored transaction id.
    pub async fn set_transaction_id(&self, transaction_id: Option<&str>) -> Result<()> {
        match transaction_id {
            Some(id) => self.store.set_typed(keys::TRANSACTION_ID, &id).await,
            None => self.store.remove(keys::TRANSACTION_ID).await,
        }
    }

    pub async fn last_check(&self) -> Result<Option<i64>> {
        self.store.get_typed(keys::LAST_CHECK).await
    }

    /// `None` removes the stored timestamp.
    pub async fn set_last_check(&self, timestamp: Option<i64>) -> Result<()> {
        match timestamp {
            Some(ts) => self.store.set_typed(keys::LAST_CHECK, &ts).await,
            None => self.store.remove(keys::LAST_CHECK).await,
        }
    }

    pub async fn attributes(&self) -> Result<AttributeState> {
        Ok(self.store.get_typed(keys::ATTRIBUTES).await?.unwrap_or_default())
    }

    pub async fn set_attributes(&self, attributes: &AttributeState) -> Result<()> {
        self.store.set_typed(keys::ATTRIBUTES, attributes).await
    }

    pub async fn tags(&self) -> Result<TagState> {
        Ok(self.store.get_typed(keys::TAGS).await?.unwrap_or_default())
    }

    pub async fn set_tags(&self, tags: &TagState) -> Result<()> {
        self.store.set_typed(keys::TAGS, tags).await
    }

    /// Attributes and tags together.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            attributes: self.attributes().await?,
            tags: self.tags().await?,
        })
    }

    pub async fn project_key(&self) -> Result<Option<String>> {
        self.store.get_typed(keys::PROJECT_KEY).await
    }

    pub async fn set_project_key(&self, project_key: &str) -> Result<()> {
        self.store.set_typed(keys::PROJECT_KEY, &project_key).await
    }
}
