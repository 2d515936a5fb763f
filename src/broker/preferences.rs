//! User preference upsert and lookup

use super::{timestamp, ContextBroker};
use crate::models::{
    Category, MemoryQuery, Metadata, META_PREFERENCE_TYPE, META_TIMESTAMP, META_USER_ID, META_VALUE,
};
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

type PreferenceKey = (String, String);

impl ContextBroker {
    async fn preference_lock(&self, key: &PreferenceKey) -> Arc<Mutex<()>> {
        let mut locks = self.preference_locks.lock().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other upsert holds or waits on it
    async fn release_preference_lock(&self, key: &PreferenceKey, lock: Arc<Mutex<()>>) {
        let mut locks = self.preference_locks.lock().await;
        // Clones are only handed out under the map lock, so the count is stable here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
    }

    /// Create or update the single preference of `preference_type` for a user
    ///
    /// When the store already holds several matches, the most recent one is
    /// updated and the rest are left untouched.
    pub async fn record_user_preference(
        &self,
        user_id: &str,
        preference_type: &str,
        preference_value: &str,
    ) -> Result<Uuid> {
        let key = (user_id.to_string(), preference_type.to_string());
        let lock = self.preference_lock(&key).await;

        let result = {
            let _guard = lock.lock().await;
            self.upsert_preference(user_id, preference_type, preference_value).await
        };

        self.release_preference_lock(&key, lock).await;
        result
    }

    async fn upsert_preference(
        &self,
        user_id: &str,
        preference_type: &str,
        preference_value: &str,
    ) -> Result<Uuid> {
        // At least one row, whatever the configured cap
        let limit = self.config.preference_cap.max(1);

        let existing = self
            .store
            .get_memories(
                Category::UserPreferences,
                &MemoryQuery::new(limit)
                    .with_filter(META_USER_ID, user_id)
                    .with_filter(META_PREFERENCE_TYPE, preference_type),
            )
            .await?;

        if existing.len() > 1 {
            warn!(
                user_id,
                preference_type,
                matches = existing.len(),
                "Multiple preference records found; updating the most recent"
            );
        }

        if let Some(current) = existing.first() {
            let mut update = Metadata::new();
            update.insert(META_VALUE.into(), Value::from(preference_value));
            update.insert(META_TIMESTAMP.into(), timestamp());

            self.store
                .update_memory(Category::UserPreferences, current.id, None, update)
                .await?;

            debug!(memory_id = %current.id, user_id, preference_type, "Updated preference");
            return Ok(current.id);
        }

        let mut metadata = Metadata::new();
        metadata.insert(META_USER_ID.into(), Value::from(user_id));
        metadata.insert(META_PREFERENCE_TYPE.into(), Value::from(preference_type));
        metadata.insert(META_VALUE.into(), Value::from(preference_value));
        metadata.insert(META_TIMESTAMP.into(), timestamp());

        let id = self
            .store
            .create_memory(Category::UserPreferences, preference_type, metadata)
            .await?;

        debug!(memory_id = %id, user_id, preference_type, "Created preference");
        Ok(id)
    }

    /// Preference type → value; the newest record wins on duplicate types
    pub async fn get_user_preferences(&self, user_id: &str) -> Result<BTreeMap<String, Value>> {
        let newest_first = self
            .store
            .get_memories(
                Category::UserPreferences,
                &MemoryQuery::new(self.config.preference_cap).with_filter(META_USER_ID, user_id),
            )
            .await?;

        let mut preferences = BTreeMap::new();
        for record in newest_first.into_iter().rev() {
            let value = record.metadata.get(META_VALUE).cloned().unwrap_or(Value::Null);
            preferences.insert(record.document, value);
        }

        Ok(preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::tests::fresh_broker;
    use crate::models::SortOrder;
    use serde_json::json;

    async fn topic_records(
        broker: &ContextBroker,
        user_id: &str,
    ) -> Vec<crate::models::MemoryRecord> {
        broker
            .store()
            .get_memories(
                Category::UserPreferences,
                &MemoryQuery::new(100)
                    .with_filter(META_USER_ID, user_id)
                    .with_filter(META_PREFERENCE_TYPE, "topic")
                    .sorted(SortOrder::Asc),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_preference_upsert_keeps_one_record() {
        let (broker, _) = fresh_broker().await;

        let first = broker.record_user_preference("u1", "topic", "A").await.unwrap();
        let second = broker.record_user_preference("u1", "topic", "B").await.unwrap();
        assert_eq!(first, second);

        let records = topic_records(&broker, "u1").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].document, "topic");
        assert_eq!(records[0].metadata[META_VALUE], json!("B"));
        assert_eq!(records[0].metadata[META_USER_ID], json!("u1"));
    }

    #[tokio::test]
    async fn test_upsert_with_zero_cap_keeps_one_record() {
        let store: Arc<dyn crate::memory::MemoryStore> =
            Arc::new(crate::memory::InMemoryMemoryStore::new());
        let config = crate::config::BrokerConfig {
            preference_cap: 0,
            ..Default::default()
        };
        let broker = ContextBroker::new(store, config);

        broker.record_user_preference("u1", "topic", "A").await.unwrap();
        broker.record_user_preference("u1", "topic", "B").await.unwrap();

        let records = topic_records(&broker, "u1").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata[META_VALUE], json!("B"));
    }

    #[tokio::test]
    async fn test_preference_locks_are_released() {
        let (broker, _) = fresh_broker().await;

        broker.record_user_preference("u1", "topic", "A").await.unwrap();
        broker.record_user_preference("u2", "network", "mainnet").await.unwrap();

        assert!(broker.preference_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_preferences_are_per_user_and_type() {
        let (broker, _) = fresh_broker().await;

        broker.record_user_preference("u1", "topic", "inscriptions").await.unwrap();
        broker.record_user_preference("u1", "preferred_network", "mainnet").await.unwrap();
        broker.record_user_preference("u2", "topic", "mining").await.unwrap();

        let prefs = broker.get_user_preferences("u1").await.unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs["topic"], json!("inscriptions"));
        assert_eq!(prefs["preferred_network"], json!("mainnet"));

        let other = broker.get_user_preferences("u2").await.unwrap();
        assert_eq!(other["topic"], json!("mining"));
        assert!(broker.get_user_preferences("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_records_newest_wins() {
        let (broker, _) = fresh_broker().await;

        for value in ["old", "new"] {
            let mut metadata = Metadata::new();
            metadata.insert(META_USER_ID.into(), json!("u1"));
            metadata.insert(META_PREFERENCE_TYPE.into(), json!("topic"));
            metadata.insert(META_VALUE.into(), json!(value));
            broker
                .store()
                .create_memory(Category::UserPreferences, "topic", metadata)
                .await
                .unwrap();
        }

        let prefs = broker.get_user_preferences("u1").await.unwrap();
        assert_eq!(prefs["topic"], json!("new"));

        broker.record_user_preference("u1", "topic", "newest").await.unwrap();
        let records = topic_records(&broker, "u1").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata[META_VALUE], json!("old"));
        assert_eq!(records[1].metadata[META_VALUE], json!("newest"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_stay_unique() {
        let (broker, _) = fresh_broker().await;
        let broker = Arc::new(broker);

        let mut handles = Vec::new();
        for i in 0..16 {
            let broker = Arc::clone(&broker);
            handles.push(tokio::spawn(async move {
                broker
                    .record_user_preference("u1", "topic", &format!("value-{}", i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(topic_records(&broker, "u1").await.len(), 1);
        assert!(broker.preference_locks.lock().await.is_empty());
    }
}
