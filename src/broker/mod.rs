//! Context broker
//!
//! Sits between the chat front-end and the memory store:
//! - records every user message and agent response (plus an audit event)
//! - keeps Bitcoin facts and Ordinals knowledge free of near-duplicates
//! - upserts user preferences
//! - assembles the `ContextBundle` used for reply generation
//!
//! TURN FLOW:
//! process(message) → [generation happens elsewhere] → record_response(reply)

mod epoch;
mod preferences;
mod recording;
mod retrieval;
pub mod seed;

pub use epoch::EpochCounter;

use crate::config::BrokerConfig;
use crate::memory::MemoryStore;
use crate::models::{
    Category, ContextBundle, InitReport, MemoryRecord, Metadata, UniqueInsert, META_SOURCE,
    META_TIMESTAMP,
};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Source tag for facts learned mid-conversation
pub const CONVERSATION_SOURCE: &str = "conversation";

/// What `record_response` wrote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub response_id: Uuid,
    pub facts: Vec<UniqueInsert>,
    pub knowledge: Vec<UniqueInsert>,
}

pub struct ContextBroker {
    store: Arc<dyn MemoryStore>,
    config: BrokerConfig,
    epoch: EpochCounter,
    /// One lock per (user, preference type) for search-then-write upserts
    preference_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

pub(crate) fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

impl ContextBroker {
    pub fn new(store: Arc<dyn MemoryStore>, config: BrokerConfig) -> Self {
        Self {
            store,
            config,
            epoch: EpochCounter::new(),
            preference_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Construct and run `initialize` in one step
    pub async fn start(
        store: Arc<dyn MemoryStore>,
        config: BrokerConfig,
    ) -> Result<(Self, InitReport)> {
        let broker = Self::new(store, config);
        let report = broker.initialize().await?;
        Ok((broker, report))
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Reset the epoch, report category sizes, seed knowledge into an empty store
    pub async fn initialize(&self) -> Result<InitReport> {
        info!("Initializing Ord GPT memory system...");

        self.epoch.reset();
        info!("Memory system initialized. Current epoch: {}", self.epoch.get());

        let mut report = InitReport {
            epoch: self.epoch.get(),
            conversation_count: self.store.count_memories(Category::Conversations).await?,
            bitcoin_fact_count: self.store.count_memories(Category::BitcoinFacts).await?,
            ordinals_knowledge_count: self
                .store
                .count_memories(Category::OrdinalsKnowledge)
                .await?,
            preference_count: self.store.count_memories(Category::UserPreferences).await?,
            ..InitReport::default()
        };

        info!(
            conversations = report.conversation_count,
            bitcoin_facts = report.bitcoin_fact_count,
            ordinals_knowledge = report.ordinals_knowledge_count,
            user_preferences = report.preference_count,
            "Existing memories"
        );

        if report.ordinals_knowledge_count == 0 {
            if self.seed_initial_knowledge().await? {
                report.seeded = true;
                report.seeded_bitcoin_facts = seed::BITCOIN_FACTS.len();
                report.seeded_ordinals_knowledge = seed::ORDINALS_KNOWLEDGE.len();
            } else {
                info!("Initial knowledge already seeded by another broker");
            }
        } else if report.bitcoin_fact_count == 0 {
            warn!("Ordinals knowledge present but no Bitcoin facts; skipping seeding");
        }

        Ok(report)
    }

    /// Write the seed set unless Ordinals knowledge appeared meanwhile
    async fn seed_initial_knowledge(&self) -> Result<bool> {
        info!("Seeding initial knowledge...");

        let facts = seed::BITCOIN_FACTS
            .iter()
            .map(|fact| MemoryRecord::new(Category::BitcoinFacts, *fact, seed_metadata()));
        let knowledge = seed::ORDINALS_KNOWLEDGE.iter().map(|item| {
            MemoryRecord::new(Category::OrdinalsKnowledge, *item, seed_metadata())
        });

        let seeded = self
            .store
            .seed_if_empty(Category::OrdinalsKnowledge, facts.chain(knowledge).collect())
            .await?;

        if seeded {
            info!(
                "Seeded {} Bitcoin facts and {} Ordinals knowledge items",
                seed::BITCOIN_FACTS.len(),
                seed::ORDINALS_KNOWLEDGE.len()
            );
        }

        Ok(seeded)
    }

    /// Start a new turn: record the message and gather context for generation
    pub async fn process(&self, user_id: &str, message: &str) -> Result<ContextBundle> {
        let epoch = self.epoch.increment();
        debug!(user_id, epoch, "Processing message");

        self.record_user_message(user_id, message).await?;

        let conversation_history = self
            .get_conversation_history(user_id, self.config.history_limit)
            .await?;

        let relevant_bitcoin_facts = self
            .search_bitcoin_facts(message, self.config.search_limit)
            .await?
            .into_iter()
            .map(|hit| hit.record.document)
            .collect();

        let relevant_ordinals_knowledge = self
            .search_ordinals_knowledge(message, self.config.search_limit)
            .await?
            .into_iter()
            .map(|hit| hit.record.document)
            .collect();

        let user_preferences = self.get_user_preferences(user_id).await?;

        Ok(ContextBundle {
            conversation_history,
            relevant_bitcoin_facts,
            relevant_ordinals_knowledge,
            user_preferences,
            current_epoch: self.epoch.get(),
        })
    }

    /// Record the generated reply and anything learned while producing it
    ///
    /// Writes are independent: an error part-way leaves earlier writes stored.
    pub async fn record_response(
        &self,
        user_id: &str,
        response: &str,
        new_facts: &[String],
        new_knowledge: &[String],
    ) -> Result<RecordedResponse> {
        let response_id = self.record_agent_response(user_id, response).await?;

        let mut facts = Vec::with_capacity(new_facts.len());
        for fact in new_facts {
            facts.push(self.record_bitcoin_fact(fact, CONVERSATION_SOURCE).await?);
        }

        let mut knowledge = Vec::with_capacity(new_knowledge.len());
        for item in new_knowledge {
            knowledge.push(self.record_ordinals_knowledge(item, CONVERSATION_SOURCE).await?);
        }

        Ok(RecordedResponse {
            response_id,
            facts,
            knowledge,
        })
    }
}

fn seed_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(META_TIMESTAMP.into(), timestamp());
    metadata.insert(META_SOURCE.into(), Value::from(seed::SEED_SOURCE));
    metadata
}
