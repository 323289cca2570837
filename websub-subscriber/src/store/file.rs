use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::SubscriptionStore;
use crate::error::PersistenceError;
use crate::types::Subscription;

/// Store persisted as one JSON object keyed by callback.
///
/// Every write serializes the whole map to a sibling temp file and renames
/// it over the original, so a crash leaves either the old or the new file.
/// The in-memory copy only changes after the rename succeeded.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Subscription>>,
}

impl JsonFileStore {
    /// Open the store at `path`, loading it if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), records = records.len(), "opened subscription store");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, records: &BTreeMap<String, Subscription>) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for JsonFileStore {
    async fn get(&self, callback: &str) -> Result<Option<Subscription>, PersistenceError> {
        Ok(self.records.lock().await.get(callback).cloned())
    }

    async fn put(&self, record: Subscription) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(record.callback.clone(), record);
        self.write(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete(&self, callback: &str) -> Result<(), PersistenceError> {
        let mut records = self.records.lock().await;
        if !records.contains_key(callback) {
            return Err(PersistenceError::NotFound(callback.to_string()));
        }
        let mut next = records.clone();
        next.remove(callback);
        self.write(&next).await?;
        *records = next;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<Subscription>, PersistenceError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use crate::types::SubscriptionState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscriptions.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let mut sub = record("cb-1", Utc::now());
        sub.state = SubscriptionState::Active;
        store.put(sub.clone()).await.unwrap();
        store.put(record("cb-2", Utc::now())).await.unwrap();
        store.delete("cb-2").await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let records = reopened.snapshot().await.unwrap();
        assert_eq!(records, vec![sub]);
        assert_eq!(
            reopened.get("cb-1").await.unwrap().and_then(|r| r.secret().map(str::to_string)),
            Some("secret-cb-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_and_empty_files_open_empty() {
        let dir = tempfile::tempdir().unwrap();

        let missing = JsonFileStore::open(dir.path().join("none.json")).await.unwrap();
        assert!(missing.snapshot().await.unwrap().is_empty());

        let empty_path = dir.path().join("empty.json");
        std::fs::write(&empty_path, "\n").unwrap();
        let empty = JsonFileStore::open(&empty_path).await.unwrap();
        assert!(empty.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = JsonFileStore::open(&path).await;
        assert!(matches!(result, Err(PersistenceError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("subscriptions.json");

        let store = JsonFileStore::open(&path).await.unwrap();
        let result = store.put(record("cb", Utc::now())).await;
        assert!(matches!(result, Err(PersistenceError::IoFailure(_))));
        assert!(store.get("cb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_unknown_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("s.json")).await.unwrap();
        assert!(matches!(
            store.delete("nope").await,
            Err(PersistenceError::NotFound(_))
        ));
    }
}
