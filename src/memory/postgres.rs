//! Postgres-backed memory store
//!
//! Shares state between processes (the one-shot CLI binaries rely on this).
//! Metadata lives in a JSONB column and is filtered with `@>`; similarity is
//! scored in-process with the same lexical ranking as the in-memory store.

use super::similarity::rank;
use super::MemoryStore;
use crate::error::BrokerError;
use crate::models::{
    Category, Event, MemoryQuery, MemoryRecord, Metadata, SearchHit, SortOrder, UniqueInsert,
};
use crate::Result;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

pub struct PgMemoryStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> BrokerError {
    move |e| BrokerError::DatabaseError(format!("{}: {}", context, e))
}

fn not_found(category: Category, id: Uuid) -> BrokerError {
    BrokerError::RecordNotFound {
        category: category.to_string(),
        id,
    }
}

const LIST_ASC: &str = r#"
    SELECT id, category, document, metadata, created_at
    FROM memories
    WHERE category = $1 AND metadata @> $2
    ORDER BY seq ASC
    LIMIT $3
"#;

const LIST_DESC: &str = r#"
    SELECT id, category, document, metadata, created_at
    FROM memories
    WHERE category = $1 AND metadata @> $2
    ORDER BY seq DESC
    LIMIT $3
"#;

/// Candidates for ranking, oldest first so ties favour recent rows
const SELECT_CANDIDATES: &str = r#"
    SELECT id, category, document, metadata, created_at
    FROM memories
    WHERE category = $1 AND metadata @> $2
    ORDER BY seq ASC
"#;

/// Advisory lock key shared by every process seeding the store
const SEED_LOCK_KEY: &str = "memory_seed";

fn list_sql(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Asc => LIST_ASC,
        SortOrder::Desc => LIST_DESC,
    }
}

/// `LIMIT` parameter; Postgres takes a signed bigint
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn metadata_from_json(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}

fn record_from_row(row: &PgRow) -> Result<MemoryRecord> {
    let category: String = row
        .try_get("category")
        .map_err(db_err("Failed to read memory category"))?;
    let Json(metadata): Json<Value> = row
        .try_get("metadata")
        .map_err(db_err("Failed to read memory metadata"))?;

    Ok(MemoryRecord {
        id: row.try_get("id").map_err(db_err("Failed to read memory id"))?,
        category: category.parse()?,
        document: row
            .try_get("document")
            .map_err(db_err("Failed to read memory document"))?,
        metadata: metadata_from_json(metadata),
        created_at: row
            .try_get("created_at")
            .map_err(db_err("Failed to read memory timestamp"))?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let Json(metadata): Json<Value> = row
        .try_get("metadata")
        .map_err(db_err("Failed to read event metadata"))?;

    Ok(Event {
        event_id: row
            .try_get("event_id")
            .map_err(db_err("Failed to read event id"))?,
        description: row
            .try_get("description")
            .map_err(db_err("Failed to read event description"))?,
        metadata: metadata_from_json(metadata),
        created_at: row
            .try_get("created_at")
            .map_err(db_err("Failed to read event timestamp"))?,
        digest: row
            .try_get("digest")
            .map_err(db_err("Failed to read event digest"))?,
    })
}

impl PgMemoryStore {
    /// Build a pool without connecting; the first query opens a connection
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(db_err("Failed to create postgres pool"))?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;

        self.schema_ready
            .get_or_try_init(|| async move {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS memories (
                      seq BIGSERIAL PRIMARY KEY,
                      id UUID NOT NULL UNIQUE,
                      category TEXT NOT NULL,
                      document TEXT NOT NULL,
                      metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_memories_category_seq
                    ON memories (category, seq);
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS memory_events (
                      seq BIGSERIAL PRIMARY KEY,
                      event_id UUID NOT NULL UNIQUE,
                      description TEXT NOT NULL,
                      metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                      digest TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(db_err("Failed to initialize memory store schema"))?;

        Ok(())
    }

    async fn insert_record(
        executor: &mut Transaction<'_, Postgres>,
        record: &MemoryRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memories (id, category, document, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(record.category.as_str())
        .bind(&record.document)
        .bind(Json(&record.metadata))
        .bind(record.created_at)
        .execute(&mut **executor)
        .await
        .map_err(db_err("Failed to insert memory"))?;

        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(db_err("Failed to begin transaction"))
    }
}

#[async_trait::async_trait]
impl MemoryStore for PgMemoryStore {
    async fn create_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
    ) -> Result<Uuid> {
        self.ensure_schema().await?;

        let record = MemoryRecord::new(category, document, metadata);
        let mut tx = self.begin().await?;
        Self::insert_record(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(db_err("Failed to commit memory insert"))?;

        debug!(memory_id = %record.id, category = %category, "Created memory");
        Ok(record.id)
    }

    async fn create_unique_memory(
        &self,
        category: Category,
        document: &str,
        metadata: Metadata,
        similarity: f32,
    ) -> Result<UniqueInsert> {
        self.ensure_schema().await?;

        let mut tx = self.begin().await?;

        // Serializes deduplicating inserts per category until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(category.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to lock category"))?;

        let rows = sqlx::query(SELECT_CANDIDATES)
            .bind(category.as_str())
            .bind(Json(Metadata::new()))
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err("Failed to load candidates"))?;

        let existing = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        if let Some(best) = rank(document, existing.iter(), 1).into_iter().next() {
            if best.score >= similarity {
                tx.commit()
                    .await
                    .map_err(db_err("Failed to release category lock"))?;
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
        Self::insert_record(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(db_err("Failed to commit unique memory insert"))?;

        debug!(memory_id = %record.id, category = %category, "Created unique memory");
        Ok(UniqueInsert::Created(record.id))
    }

    async fn get_memories(
        &self,
        category: Category,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(list_sql(query.sort))
            .bind(category.as_str())
            .bind(Json(&query.filter))
            .bind(sql_limit(query.limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list memories"))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn search_memory(
        &self,
        category: Category,
        query: &str,
        filter: &Metadata,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(SELECT_CANDIDATES)
            .bind(category.as_str())
            .bind(Json(filter))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to search memories"))?;

        let candidates = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(rank(query, candidates.iter(), limit))
    }

    async fn get_memory(&self, category: Category, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT id, category, document, metadata, created_at
            FROM memories
            WHERE category = $1 AND id = $2
            "#,
        )
        .bind(category.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("Failed to load memory"))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn update_memory(
        &self,
        category: Category,
        id: Uuid,
        document: Option<&str>,
        metadata: Metadata,
    ) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query(
            r#"
            UPDATE memories
            SET metadata = metadata || $3,
                document = COALESCE($4, document)
            WHERE category = $1 AND id = $2
            "#,
        )
        .bind(category.as_str())
        .bind(id)
        .bind(Json(&metadata))
        .bind(document)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to update memory"))?;

        if result.rows_affected() == 0 {
            return Err(not_found(category, id));
        }

        debug!(memory_id = %id, category = %category, "Updated memory");
        Ok(())
    }

    async fn delete_memory(&self, category: Category, id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM memories WHERE category = $1 AND id = $2")
            .bind(category.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete memory"))?;

        if result.rows_affected() == 0 {
            return Err(not_found(category, id));
        }
        Ok(())
    }

    async fn count_memories(&self, category: Category) -> Result<usize> {
        self.ensure_schema().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE category = $1")
            .bind(category.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to count memories"))?;

        Ok(count.max(0) as usize)
    }

    async fn wipe_category(&self, category: Category) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM memories WHERE category = $1")
            .bind(category.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to wipe category"))?;

        Ok(())
    }

    async fn seed_if_empty(&self, guard: Category, seeds: Vec<MemoryRecord>) -> Result<bool> {
        self.ensure_schema().await?;

        let mut tx = self.begin().await?;

        // Held until commit; the count below sees any seed committed before it
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(SEED_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(db_err("Failed to take seed lock"))?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories WHERE category = $1")
            .bind(guard.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to count seed guard"))?;

        if existing > 0 {
            tx.commit()
                .await
                .map_err(db_err("Failed to release seed lock"))?;
            return Ok(false);
        }

        for record in &seeds {
            Self::insert_record(&mut tx, record).await?;
        }
        tx.commit().await.map_err(db_err("Failed to commit seed"))?;

        debug!(guard = %guard, seeded = seeds.len(), "Seeded memories");
        Ok(true)
    }

    async fn create_event(&self, event: Event) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO memory_events (event_id, description, metadata, digest, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.description)
        .bind(Json(&event.metadata))
        .bind(&event.digest)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to insert event"))?;

        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT event_id, description, metadata, digest, created_at
            FROM memory_events
            ORDER BY seq DESC
            LIMIT $1
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("Failed to list events"))?;

        rows.iter().map(event_from_row).collect()
    }
}
