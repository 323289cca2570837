use async_trait::async_trait;
use dashmap::DashMap;

use super::SubscriptionStore;
use crate::error::PersistenceError;
use crate::types::Subscription;

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, Subscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn get(&self, callback: &str) -> Result<Option<Subscription>, PersistenceError> {
        Ok(self.records.get(callback).map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: Subscription) -> Result<(), PersistenceError> {
        self.records.insert(record.callback.clone(), record);
        Ok(())
    }

    async fn delete(&self, callback: &str) -> Result<(), PersistenceError> {
        self.records
            .remove(callback)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound(callback.to_string()))
    }

    async fn snapshot(&self) -> Result<Vec<Subscription>, PersistenceError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use crate::types::SubscriptionState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("cb").await.unwrap().is_none());

        let mut sub = record("cb", Utc::now());
        store.put(sub.clone()).await.unwrap();
        assert_eq!(store.get("cb").await.unwrap(), Some(sub.clone()));

        sub.state = SubscriptionState::Active;
        store.put(sub.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("cb").await.unwrap().map(|r| r.state), Some(SubscriptionState::Active));

        store.delete("cb").await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.delete("cb").await,
            Err(PersistenceError::NotFound(_))
        ));
    }
}
