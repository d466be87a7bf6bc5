use std::{
    collections::HashMap,
    future::Future,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, Result};
use fs4::tokio::AsyncFileExt;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::fs::operations::{
    open_lock, read_if_exists, read_locked, replace_atomically, set_aside,
};

/// Where an unreadable store is moved before it gets replaced.
pub const CORRUPT_SUFFIX: &str = ".corrupt";

/// Interface for abstracting the persisted key-value store. Absence of a key is `None`, never
/// an error.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>>>;

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<()>>;

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>>;

    /// Everything in the store. Used by the cli and by sync.
    fn entries(&self) -> impl Future<Output = Result<Map<String, Value>>>;
}

impl<T: Deref> KeyValueStore for T
where
    T::Target: KeyValueStore,
{
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>>> {
        self.deref().get(key)
    }

    fn set(&self, key: &str, value: Value) -> impl Future<Output = Result<()>> {
        self.deref().set(key, value)
    }

    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> {
        self.deref().remove(key)
    }

    fn entries(&self) -> impl Future<Output = Result<Map<String, Value>>> {
        self.deref().entries()
    }
}

/// The main realization of [KeyValueStore]. The whole store is one JSON object in one file.
/// Reads happen under a shared lock, writes under an exclusive one and replace the file
/// atomically.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open(path: PathBuf) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// An unreadable store reads as empty. It is left on disk for [Self::update] to set aside.
    async fn read_map(&self) -> Result<Map<String, Value>> {
        let Some(content) = read_locked(&self.path).await? else {
            return Ok(Map::new());
        };
        Ok(parse_map(&content).unwrap_or_else(|e| {
            warn!("Store {:?} is unreadable, {e}", self.path);
            Map::new()
        }))
    }

    async fn update<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let lock = open_lock(&self.path).await?;
        lock.lock_exclusive()?;
        let result = self.update_locked(update).await;
        lock.unlock_async().await?;
        result
    }

    async fn update_locked<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let content = read_if_exists(&self.path).await?.unwrap_or_default();
        let mut map = match parse_map(&content) {
            Ok(map) => map,
            Err(e) => {
                let moved = set_aside(&self.path, CORRUPT_SUFFIX).await?;
                error!("Store {:?} is unreadable, {e}. Moved it to {moved:?}", self.path);
                Map::new()
            }
        };
        update(&mut map);
        replace_atomically(&self.path, &serde_json::to_vec_pretty(&Value::Object(map))?).await?;
        Ok(())
    }
}

fn parse_map(content: &str) -> Result<Map<String, Value>, String> {
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected an object, found {other}")),
        Err(e) => Err(e.to_string()),
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut map = self.read_map().await?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        debug!("Writing {key} into {:?}", self.path);
        self.update(|map| {
            map.insert(key.to_string(), value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.update(|map| {
            map.remove(key);
        })
        .await
    }

    async fn entries(&self) -> Result<Map<String, Value>> {
        self.read_map().await
    }
}

/// Store living only in memory. Backs tests and runs without a data directory.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.values
            .lock()
            .map_err(|_| anyhow!("Memory store lock was poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Map<String, Value>> {
        Ok(self
            .lock()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{JsonFileStore, KeyValueStore, MemoryStore};

    #[tokio::test]
    async fn file_store_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonFileStore::open(dir.path().join("nested").join("storage.json"))?;

        assert_eq!(store.get("doNotDisturb").await?, None);

        store.set("doNotDisturb", json!(true)).await?;
        store.set("siteBlacklist", json!(["a.com"])).await?;
        assert_eq!(store.get("doNotDisturb").await?, Some(json!(true)));

        store.remove("doNotDisturb").await?;
        let entries = store.entries().await?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["siteBlacklist"], json!(["a.com"]));

        // A second handle on the same file sees the same data.
        let other = JsonFileStore::open(store.path().to_path_buf())?;
        assert_eq!(other.get("siteBlacklist").await?, Some(json!(["a.com"])));
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_store_is_set_aside_before_a_write() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("storage.json");
        // What a crash halfway through a write used to leave behind.
        let truncated = "{\"siteTimers\":{\"a.com\":1700000000000,\"b.com\":17000";
        std::fs::write(&path, truncated)?;

        let store = JsonFileStore::open(path.clone())?;
        assert_eq!(store.get("siteTimers").await?, None);

        store.set("doNotDisturb", json!(true)).await?;
        assert_eq!(store.get("doNotDisturb").await?, Some(json!(true)));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("storage.json.corrupt"))?,
            truncated
        );
        Ok(())
    }

    #[tokio::test]
    async fn leftover_temp_file_does_not_affect_the_store() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonFileStore::open(dir.path().join("storage.json"))?;
        store.set("siteTimers", json!({ "a.com": 1_700_000_000_000i64 })).await?;

        // A write that died before its rename.
        std::fs::write(dir.path().join("storage.json.tmp"), "{\"siteTim")?;
        assert_eq!(
            store.get("siteTimers").await?,
            Some(json!({ "a.com": 1_700_000_000_000i64 }))
        );

        store.set("doNotDisturb", json!(false)).await?;
        let entries = store.entries().await?;
        assert_eq!(entries.len(), 2);
        assert!(!dir.path().join("storage.json.corrupt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn shared_handles_go_through_deref() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let handle = store.clone();
        handle.set("key", json!(1)).await?;
        assert_eq!(store.get("key").await?, Some(json!(1)));
        Ok(())
    }
}
