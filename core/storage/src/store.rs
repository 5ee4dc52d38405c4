//! Key-value store trait definition.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use attrsync_common::{Error, Result};

/// Key-value persistence collaborator.
///
/// Values are JSON documents. Reading a missing key yields `Ok(None)`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Typed helpers on top of [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    /// Read and deserialize a value.
    ///
    /// A stored `null` reads as absent.
    async fn get_typed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                Error::Serialization(format!("Failed to decode key '{}': {}", key, e))
            }),
        }
    }

    /// Serialize and write a value.
    async fn set_typed<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value)?;
        self.set(key, value).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        count: u64,
        label: String,
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let store = MemoryStore::new();
        let sample = Sample {
            count: 3,
            label: "three".to_string(),
        };

        store.set_typed("sample", &sample).await.unwrap();
        let restored: Option<Sample> = store.get_typed("sample").await.unwrap();

        assert_eq!(restored, Some(sample));
    }

    #[tokio::test]
    async fn test_null_reads_as_absent() {
        let store = MemoryStore::new();
        store.set("nothing", Value::Null).await.unwrap();

        let value: Option<u64> = store.get_typed("nothing").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error() {
        let store = MemoryStore::new();
        store.set("count", Value::String("x".into())).await.unwrap();

        let result: Result<Option<u64>> = store.get_typed("count").await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
