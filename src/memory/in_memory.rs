//! In-process memory store
//!
//! Records are kept per category in insertion order, so recency ordering is
//! positional and stable even when timestamps collide.

use super::similarity::rank;
use super::MemoryStore;
use crate::error::BrokerError;
use crate::models::{
    Category, Event, MemoryQuery, MemoryRecord, Metadata, SearchHit, SortOrder, UniqueInsert,
};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub struct InMemoryMemoryStore {
    records: Arc<RwLock<HashMap<Category, Vec<MemoryRecord>>>>,
    events: Arc<RwLock<Vec<Event>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(category: Category, id: Uuid) -> BrokerError {
    BrokerError::RecordNotFound {
        category: category.to_string(),
        id,
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn create_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
    ) -> Result<Uuid> {
        let record = MemoryRecord::new(category, document, metadata);
        let id = record.id;

        let mut records = self.records.write().await;
        records.entry(category).or_default().push(record);

        debug!(memory_id = %id, category = %category, "Created memory");
        Ok(id)
    }

    async fn create_unique_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
        similarity: f32,
    ) -> Result<UniqueInsert> {
        // Check and insert under one write lock
        let mut records = self.records.write().await;
        let bucket = records.entry(category).or_default();

        if let Some(best) = rank(document, bucket.iter(), 1).into_iter().next() {
            if best.score >= similarity {
                debug!(
                    memory_id = %best.record.id,
                    score = best.score,
                    category = %category,
                    "Skipped near-duplicate memory"
                );
                return Ok(UniqueInsert::Duplicate(best.record.id));
            }
        }

        let record = MemoryRecord::new(category, document, metadata);
        let id = record.id;
        bucket.push(record);

        debug!(memory_id = %id, category = %category, "Created unique memory");
        Ok(UniqueInsert::Created(id))
    }

    async fn get_memories(
        &self,
        category: Category,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        let Some(bucket) = records.get(&category) else {
            return Ok(Vec::new());
        };

        let matching = bucket.iter().filter(|r| r.matches(&query.filter));

        let listed = match query.sort {
            SortOrder::Asc => matching.take(query.limit).cloned().collect(),
            SortOrder::Desc => {
                let mut newest_first: Vec<MemoryRecord> = matching.cloned().collect();
                newest_first.reverse();
                newest_first.truncate(query.limit);
                newest_first
            }
        };

        Ok(listed)
    }

    async fn search_memory(
        &self,
        category: Category,
        query: &str,
        filter: &Metadata,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let records = self.records.read().await;
        let Some(bucket) = records.get(&category) else {
            return Ok(Vec::new());
        };

        Ok(rank(query, bucket.iter().filter(|r| r.matches(filter)), limit))
    }

    async fn get_memory(&self, category: Category, id: Uuid) -> Result<Option<MemoryRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&category)
            .and_then(|bucket| bucket.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn update_memory(
        &self,
        category: Category,
        id: Uuid,
        document: Option<&str>,
        metadata: Metadata,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&category)
            .and_then(|bucket| bucket.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| not_found(category, id))?;

        if let Some(document) = document {
            record.document = document.to_string();
        }
        record.metadata.extend(metadata);

        debug!(memory_id = %id, category = %category, "Updated memory");
        Ok(())
    }

    async fn delete_memory(&self, category: Category, id: Uuid) -> Result<()> {
        let mut records = self.records.write().await;
        let bucket = records
            .get_mut(&category)
            .ok_or_else(|| not_found(category, id))?;

        let before = bucket.len();
        bucket.retain(|r| r.id != id);

        if bucket.len() == before {
            return Err(not_found(category, id));
        }
        Ok(())
    }

    async fn count_memories(&self, category: Category) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.get(&category).map(Vec::len).unwrap_or(0))
    }

    async fn wipe_category(&self, category: Category) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(&category);
        Ok(())
    }

    async fn seed_if_empty(&self, guard: Category, seeds: Vec<MemoryRecord>) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.get(&guard).is_some_and(|bucket| !bucket.is_empty()) {
            return Ok(false);
        }

        let seeded = seeds.len();
        for record in seeds {
            records.entry(record.category).or_default().push(record);
        }

        debug!(guard = %guard, seeded, "Seeded memories");
        Ok(true)
    }

    async fn create_event(&self, event: Event) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::new_event;
    use crate::models::META_USER_ID;
    use serde_json::json;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_count() {
        let store = InMemoryMemoryStore::new();
        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 0);

        let id = store
            .create_memory(Category::BitcoinFacts, "Bitcoin launched in 2009.", Metadata::new())
            .await
            .unwrap();

        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 1);
        let record = store.get_memory(Category::BitcoinFacts, id).await.unwrap().unwrap();
        assert_eq!(record.document, "Bitcoin launched in 2009.");
        assert!(store.get_memory(Category::OrdinalsKnowledge, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_insert_collapses_near_duplicates() {
        let store = InMemoryMemoryStore::new();
        let first = store
            .create_unique_memory(
                Category::BitcoinFacts,
                "Bitcoin has a maximum supply of 21 million coins.",
                Metadata::new(),
                0.85,
            )
            .await
            .unwrap();
        assert!(first.is_created());

        let second = store
            .create_unique_memory(
                Category::BitcoinFacts,
                "bitcoin has a maximum supply of 21 million coins",
                Metadata::new(),
                0.85,
            )
            .await
            .unwrap();
        assert_eq!(second, UniqueInsert::Duplicate(first.id()));

        let third = store
            .create_unique_memory(
                Category::BitcoinFacts,
                "Bitcoin blocks are mined approximately every 10 minutes.",
                Metadata::new(),
                0.85,
            )
            .await
            .unwrap();
        assert!(third.is_created());
        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_memories_sort_filter_limit() {
        let store = InMemoryMemoryStore::new();
        for i in 0..5 {
            store
                .create_memory(
                    Category::Conversations,
                    &format!("message {}", i),
                    meta(&[(META_USER_ID, "u1")]),
                )
                .await
                .unwrap();
        }
        store
            .create_memory(Category::Conversations, "other", meta(&[(META_USER_ID, "u2")]))
            .await
            .unwrap();

        let desc = store
            .get_memories(
                Category::Conversations,
                &MemoryQuery::new(3).with_filter(META_USER_ID, "u1"),
            )
            .await
            .unwrap();
        let docs: Vec<_> = desc.iter().map(|r| r.document.as_str()).collect();
        assert_eq!(docs, vec!["message 4", "message 3", "message 2"]);

        let asc = store
            .get_memories(
                Category::Conversations,
                &MemoryQuery::new(2)
                    .with_filter(META_USER_ID, "u1")
                    .sorted(SortOrder::Asc),
            )
            .await
            .unwrap();
        let docs: Vec<_> = asc.iter().map(|r| r.document.as_str()).collect();
        assert_eq!(docs, vec!["message 0", "message 1"]);
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let store = InMemoryMemoryStore::new();
        for doc in [
            "Bitcoin was created by Satoshi Nakamoto in 2009.",
            "Ordinal theory was developed by Casey Rodarmor.",
            "Ordinals allow for the creation of digital artifacts on Bitcoin through inscriptions.",
        ] {
            store
                .create_memory(Category::OrdinalsKnowledge, doc, Metadata::new())
                .await
                .unwrap();
        }

        let hits = store
            .search_memory(
                Category::OrdinalsKnowledge,
                "who developed ordinal theory",
                &Metadata::new(),
                2,
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.document, "Ordinal theory was developed by Casey Rodarmor.");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_update_merges_metadata() {
        let store = InMemoryMemoryStore::new();
        let id = store
            .create_memory(
                Category::UserPreferences,
                "topic",
                meta(&[(META_USER_ID, "u1"), ("value", "A")]),
            )
            .await
            .unwrap();

        store
            .update_memory(Category::UserPreferences, id, None, meta(&[("value", "B")]))
            .await
            .unwrap();

        let record = store.get_memory(Category::UserPreferences, id).await.unwrap().unwrap();
        assert_eq!(record.metadata["value"], json!("B"));
        assert_eq!(record.metadata[META_USER_ID], json!("u1"));
        assert_eq!(record.document, "topic");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = InMemoryMemoryStore::new();
        let missing = Uuid::new_v4();

        let update = store
            .update_memory(Category::UserPreferences, missing, None, Metadata::new())
            .await;
        assert!(matches!(update, Err(BrokerError::RecordNotFound { .. })));

        let delete = store.delete_memory(Category::UserPreferences, missing).await;
        assert!(matches!(delete, Err(BrokerError::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_and_wipe() {
        let store = InMemoryMemoryStore::new();
        let id = store
            .create_memory(Category::BitcoinFacts, "a", Metadata::new())
            .await
            .unwrap();
        store
            .create_memory(Category::BitcoinFacts, "b", Metadata::new())
            .await
            .unwrap();

        tokio_test::assert_ok!(store.delete_memory(Category::BitcoinFacts, id).await);
        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 1);

        tokio_test::assert_ok!(store.wipe_category(Category::BitcoinFacts).await);
        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 0);
    }

    fn seeds() -> Vec<MemoryRecord> {
        vec![
            MemoryRecord::new(Category::BitcoinFacts, "fact", Metadata::new()),
            MemoryRecord::new(Category::OrdinalsKnowledge, "knowledge", Metadata::new()),
        ]
    }

    #[tokio::test]
    async fn test_seed_if_empty_writes_once() {
        let store = InMemoryMemoryStore::new();

        assert!(store.seed_if_empty(Category::OrdinalsKnowledge, seeds()).await.unwrap());
        assert!(!store.seed_if_empty(Category::OrdinalsKnowledge, seeds()).await.unwrap());

        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 1);
        assert_eq!(store.count_memories(Category::OrdinalsKnowledge).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_seeding_writes_once() {
        let store = Arc::new(InMemoryMemoryStore::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.seed_if_empty(Category::OrdinalsKnowledge, seeds()).await
            }));
        }

        let mut seeded = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                seeded += 1;
            }
        }

        assert_eq!(seeded, 1);
        assert_eq!(store.count_memories(Category::BitcoinFacts).await.unwrap(), 1);
        assert_eq!(store.count_memories(Category::OrdinalsKnowledge).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let store = InMemoryMemoryStore::new();
        store.create_event(new_event("first", Metadata::new()).unwrap()).await.unwrap();
        store.create_event(new_event("second", Metadata::new()).unwrap()).await.unwrap();

        let events = store.list_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].description, "second");
    }
}
