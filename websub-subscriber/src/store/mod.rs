//! Persistence of subscription records, keyed by callback token.
//!
//! - `memory`: in-process store on `dashmap`
//! - `file`: whole-map JSON file with atomic replacement

mod file;
mod memory;

use async_trait::async_trait;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::PersistenceError;
use crate::types::Subscription;

/// Flat key-value storage of subscriptions.
///
/// `put` is an upsert and must be atomic per key: a reader sees either the
/// old record or the new one.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, callback: &str) -> Result<Option<Subscription>, PersistenceError>;

    async fn put(&self, record: Subscription) -> Result<(), PersistenceError>;

    /// Remove a record; [`PersistenceError::NotFound`] if there is none.
    async fn delete(&self, callback: &str) -> Result<(), PersistenceError>;

    /// A point-in-time copy of every record.
    async fn snapshot(&self) -> Result<Vec<Subscription>, PersistenceError>;
}

/// Iterator over a snapshot of a store.
///
/// Writes made after the snapshot was taken are not observed. Take a new
/// snapshot to start over.
#[derive(Debug)]
pub struct SubscriptionIter {
    records: std::vec::IntoIter<Subscription>,
}

impl SubscriptionIter {
    pub async fn snapshot(store: &dyn SubscriptionStore) -> Result<Self, PersistenceError> {
        let mut records = store.snapshot().await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.callback.cmp(&b.callback)));
        Ok(Self {
            records: records.into_iter(),
        })
    }
}

impl Iterator for SubscriptionIter {
    type Item = Subscription;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

impl ExactSizeIterator for SubscriptionIter {}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use crate::types::{SubscribeOptions, Subscription};

    pub fn record(callback: &str, created_at: DateTime<Utc>) -> Subscription {
        Subscription::new(
            callback.to_string(),
            "https://hub.example/".to_string(),
            "https://example.com/feed".to_string(),
            Some(format!("secret-{callback}")),
            &SubscribeOptions::new().with_lease_seconds(600),
            created_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::record;
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_iter_is_snapshot_and_restartable() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put(record("b", now)).await.unwrap();
        store.put(record("a", now)).await.unwrap();

        let mut iter = SubscriptionIter::snapshot(&store).await.unwrap();
        assert_eq!(iter.len(), 2);
        assert_eq!(iter.next().map(|r| r.callback), Some("a".to_string()));

        // Mutation after the snapshot is not observed by the running iterator
        store.delete("b").await.unwrap();
        store.put(record("c", now)).await.unwrap();
        assert_eq!(iter.next().map(|r| r.callback), Some("b".to_string()));
        assert!(iter.next().is_none());

        let callbacks: Vec<String> = SubscriptionIter::snapshot(&store)
            .await
            .unwrap()
            .map(|r| r.callback)
            .collect();
        assert_eq!(callbacks, vec!["a".to_string(), "c".to_string()]);
    }
}
