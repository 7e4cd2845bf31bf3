use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    io::ErrorKind,
    ops::Deref,
    path::PathBuf,
};

use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::{fs::File, sync::Mutex};
use tracing::{debug, warn};

pub const STORE_FILE_NAME: &str = "store.json";
const LOCK_FILE_NAME: &str = "store.lock";

/// The fixed set of records the tracker persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    BlockedSites,
    SiteUsage,
    SiteUsageByHour,
    BlockedAttempts,
    BlockedAttemptsByHour,
    /// Domain match rule of the running host, so other processes judge blocked sites alike.
    MatchRule,
}

impl RecordKey {
    pub const ALL: [RecordKey; 6] = [
        RecordKey::BlockedSites,
        RecordKey::SiteUsage,
        RecordKey::SiteUsageByHour,
        RecordKey::BlockedAttempts,
        RecordKey::BlockedAttemptsByHour,
        RecordKey::MatchRule,
    ];

    /// Name of the record inside the store. These match the names the browser extension uses.
    pub const fn name(&self) -> &'static str {
        match self {
            RecordKey::BlockedSites => "blockedSites",
            RecordKey::SiteUsage => "siteUsage",
            RecordKey::SiteUsageByHour => "siteUsageByHour",
            RecordKey::BlockedAttempts => "blockedAttempts",
            RecordKey::BlockedAttemptsByHour => "blockedAttemptsByHour",
            RecordKey::MatchRule => "matchRule",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.name() == name)
    }
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub type RecordValues = HashMap<RecordKey, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store content is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record `{key}` has an unexpected shape: {source}")]
    Corrupted {
        key: RecordKey,
        #[source]
        source: serde_json::Error,
    },
    #[error("store root is not a JSON object")]
    NotAnObject,
}

/// Interface for abstracting the key/value store the tracker persists into. It mirrors the
/// browser's `storage.local`: every call reads or writes whole records, and a single `set` with
/// several records is applied atomically.
pub trait RecordStorage {
    /// Returns the requested records. Records that were never written are absent from the map.
    fn get(&self, keys: &[RecordKey]) -> impl Future<Output = Result<RecordValues, StoreError>>;

    /// Replaces the given records in one write.
    fn set(&self, values: RecordValues) -> impl Future<Output = Result<(), StoreError>>;

    /// Read-modify-write of `keys` that no other writer can interleave with. `apply` receives the
    /// current records; whatever it leaves in the map is written back, so a closure that takes
    /// records out and puts nothing back writes nothing. Nothing is written if `apply` fails.
    fn update<T, F>(
        &self,
        keys: &[RecordKey],
        apply: F,
    ) -> impl Future<Output = Result<T, StoreError>>
    where
        F: FnOnce(&mut RecordValues) -> Result<T, StoreError>;
}

impl<T: Deref> RecordStorage for T
where
    T::Target: RecordStorage,
{
    fn get(&self, keys: &[RecordKey]) -> impl Future<Output = Result<RecordValues, StoreError>> {
        self.deref().get(keys)
    }

    fn set(&self, values: RecordValues) -> impl Future<Output = Result<(), StoreError>> {
        self.deref().set(values)
    }

    fn update<R, F>(
        &self,
        keys: &[RecordKey],
        apply: F,
    ) -> impl Future<Output = Result<R, StoreError>>
    where
        F: FnOnce(&mut RecordValues) -> Result<R, StoreError>,
    {
        self.deref().update(keys, apply)
    }
}

/// Removes `key` from `values` and decodes it. Missing and `null` records decode to the default.
pub fn take_record<T: DeserializeOwned + Default>(
    values: &mut RecordValues,
    key: RecordKey,
) -> Result<T, StoreError> {
    match values.remove(&key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value).map_err(|source| StoreError::Corrupted { key, source })
        }
    }
}

pub fn put_record<T: Serialize>(
    values: &mut RecordValues,
    key: RecordKey,
    record: &T,
) -> Result<(), StoreError> {
    values.insert(key, serde_json::to_value(record)?);
    Ok(())
}

/// The main realization of [RecordStorage]. All records live in one JSON object file so a
/// multi-record `set` can be committed with a single rename.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self { dir })
    }

    fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }

    async fn open_lock(&self) -> Result<File, std::io::Error> {
        File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE_NAME))
            .await
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        let path = self.store_path();
        debug!("Reading store {path:?}");
        let content = match tokio::fs::read(&path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), StoreError> {
        let path = self.store_path();
        let temporary = path.with_extension("json.tmp");
        let buffer = serde_json::to_vec(&Value::Object(map))?;
        tokio::fs::write(&temporary, &buffer).await?;
        tokio::fs::rename(&temporary, &path).await?;
        Ok(())
    }

    async fn get_inner(&self, keys: &[RecordKey]) -> Result<RecordValues, StoreError> {
        let mut map = self.read_all().await?;
        let mut values = RecordValues::new();
        for key in keys {
            if let Some(value) = map.remove(key.name()) {
                values.insert(*key, value);
            }
        }
        Ok(values)
    }

    async fn set_inner(&self, values: RecordValues) -> Result<(), StoreError> {
        let map = self.read_all().await?;
        self.merge_and_write(map, values).await
    }

    async fn update_inner<T, F>(&self, keys: &[RecordKey], apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RecordValues) -> Result<T, StoreError>,
    {
        let map = self.read_all().await?;
        let mut values = keys
            .iter()
            .filter_map(|key| map.get(key.name()).map(|v| (*key, v.clone())))
            .collect::<RecordValues>();
        let result = apply(&mut values)?;
        if !values.is_empty() {
            self.merge_and_write(map, values).await?;
        }
        Ok(result)
    }

    async fn merge_and_write(
        &self,
        mut map: Map<String, Value>,
        values: RecordValues,
    ) -> Result<(), StoreError> {
        for (key, value) in values {
            map.insert(key.name().to_string(), value);
        }
        for name in map.keys() {
            if RecordKey::from_name(name).is_none() {
                warn!("Keeping unknown record {name} in the store");
            }
        }
        self.write_all(map).await
    }
}

impl RecordStorage for JsonFileStore {
    async fn get(&self, keys: &[RecordKey]) -> Result<RecordValues, StoreError> {
        let lock = self.open_lock().await?;
        lock.lock_shared()?;
        let result = self.get_inner(keys).await;
        lock.unlock_async().await?;
        result
    }

    async fn set(&self, values: RecordValues) -> Result<(), StoreError> {
        // Semi-safe acquire-release, the host and the cli may both write.
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result = self.set_inner(values).await;
        lock.unlock_async().await?;
        result
    }

    async fn update<T, F>(&self, keys: &[RecordKey], apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RecordValues) -> Result<T, StoreError>,
    {
        // The exclusive lock spans the read and the write, so another process can't slip a write
        // in between.
        let lock = self.open_lock().await?;
        lock.lock_exclusive()?;
        let result = self.update_inner(keys, apply).await;
        lock.unlock_async().await?;
        result
    }
}

/// In-memory store. Used by tests and by embedders that persist records themselves.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<RecordValues>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStorage for MemoryStore {
    async fn get(&self, keys: &[RecordKey]) -> Result<RecordValues, StoreError> {
        let records = self.records.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| records.get(key).map(|v| (*key, v.clone())))
            .collect())
    }

    async fn set(&self, values: RecordValues) -> Result<(), StoreError> {
        self.records.lock().await.extend(values);
        Ok(())
    }

    async fn update<T, F>(&self, keys: &[RecordKey], apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RecordValues) -> Result<T, StoreError>,
    {
        let mut records = self.records.lock().await;
        let mut values = keys
            .iter()
            .filter_map(|key| records.get(key).map(|v| (*key, v.clone())))
            .collect::<RecordValues>();
        let result = apply(&mut values)?;
        records.extend(values);
        Ok(result)
    }
}
