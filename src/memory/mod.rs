//! Memory store abstraction
//!
//! The broker owns no durable state; every write and read goes through a
//! `MemoryStore`. Two backends ship with the crate: an in-process store for
//! tests and single-process use, and a Postgres store shared between the
//! one-shot CLI binaries.

pub mod in_memory;
pub mod postgres;
pub mod similarity;

pub use in_memory::InMemoryMemoryStore;
pub use postgres::PgMemoryStore;

use crate::config::BrokerConfig;
use crate::models::{Category, Event, MemoryQuery, MemoryRecord, Metadata, SearchHit, UniqueInsert};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Trait for memory persistence
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert a record unconditionally
    async fn create_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
    ) -> Result<Uuid>;

    /// Insert unless a record in the category is at least `similarity` alike
    async fn create_unique_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
        similarity: f32,
    ) -> Result<UniqueInsert>;

    /// List records matching the query filter, ordered by recency
    async fn get_memories(
        &self,
        category: Category,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>>;

    /// Rank records by similarity to `query`, best first
    async fn search_memory(
        &self,
        category: Category,
        query: &str,
        filter: &Metadata,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    async fn get_memory(&self, category: Category, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Merge `metadata` into the record, optionally replacing its document
    async fn update_memory(
        &self,
        category: Category,
        id: Uuid,
        document: Option<&str>,
        metadata: Metadata,
    ) -> Result<()>;

    async fn delete_memory(&self, category: Category, id: Uuid) -> Result<()>;

    async fn count_memories(&self, category: Category) -> Result<usize>;

    async fn wipe_category(&self, category: Category) -> Result<()>;

    /// Insert `seeds` in one step if `guard` holds no records
    ///
    /// Returns false and writes nothing when `guard` is already populated.
    /// Concurrent callers, including other processes sharing the store, seed
    /// at most once.
    async fn seed_if_empty(&self, guard: Category, seeds: Vec<MemoryRecord>) -> Result<bool>;

    async fn create_event(&self, event: Event) -> Result<()>;

    /// Most recent events first
    async fn list_events(&self, limit: usize) -> Result<Vec<Event>>;
}

/// Pick the backend described by the configuration
pub fn build_store(config: &BrokerConfig) -> Arc<dyn MemoryStore> {
    if let Some(url) = &config.database_url {
        match PgMemoryStore::connect_lazy(url, config.max_connections) {
            Ok(store) => {
                info!("Memory store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres memory store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Memory store backend: in-memory");
    Arc::new(InMemoryMemoryStore::new())
}
