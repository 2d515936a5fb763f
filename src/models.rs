//! Core data models for the context broker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form metadata attached to memories and events
pub type Metadata = Map<String, Value>;

//
// ================= Metadata keys =================
//

pub const META_TIMESTAMP: &str = "timestamp";
pub const META_USER_ID: &str = "user_id";
pub const META_SPEAKER: &str = "speaker";
pub const META_EPOCH: &str = "epoch";
pub const META_SOURCE: &str = "source";
pub const META_VALUE: &str = "value";
pub const META_PREFERENCE_TYPE: &str = "preference_type";
pub const META_MESSAGE_TYPE: &str = "message_type";

//
// ================= Enums =================
//

/// Named collection a memory belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Conversations,
    BitcoinFacts,
    OrdinalsKnowledge,
    UserPreferences,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Conversations,
        Category::BitcoinFacts,
        Category::OrdinalsKnowledge,
        Category::UserPreferences,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Conversations => "conversations",
            Category::BitcoinFacts => "bitcoin_facts",
            Category::OrdinalsKnowledge => "ordinals_knowledge",
            Category::UserPreferences => "user_preferences",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = crate::error::BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                crate::error::BrokerError::StoreError(format!("unknown category: {}", s))
            })
    }
}

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
    Unknown,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Agent => "agent",
            Speaker::Unknown => "unknown",
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> Self {
        match metadata.get(META_SPEAKER).and_then(Value::as_str) {
            Some("user") => Speaker::User,
            Some("agent") => Speaker::Agent,
            _ => Speaker::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

//
// ================= Memory =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub category: Category,
    pub document: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(category: Category, document: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            document: document.into(),
            metadata,
            created_at: Utc::now(),
        }
    }

    /// True when every key in `filter` is present with an equal value
    pub fn matches(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.metadata.get(key) == Some(expected))
    }
}

/// A ranked similarity-search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Listing parameters for `MemoryStore::get_memories`
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub filter: Metadata,
    pub limit: usize,
    pub sort: SortOrder,
}

impl MemoryQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            filter: Metadata::new(),
            limit,
            sort: SortOrder::Desc,
        }
    }

    pub fn with_filter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(key.to_string(), value.into());
        self
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// Outcome of a deduplicating insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum UniqueInsert {
    Created(Uuid),
    /// An existing record was at or above the similarity threshold
    Duplicate(Uuid),
}

impl UniqueInsert {
    pub fn id(&self) -> Uuid {
        match self {
            UniqueInsert::Created(id) | UniqueInsert::Duplicate(id) => *id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, UniqueInsert::Created(_))
    }
}

//
// ================= Events =================
//

/// Append-only audit narration of a broker action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub description: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over description and metadata
    pub digest: String,
}

//
// ================= Context =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// Everything handed to reply generation for one inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub conversation_history: Vec<ConversationTurn>,
    pub relevant_bitcoin_facts: Vec<String>,
    pub relevant_ordinals_knowledge: Vec<String>,
    pub user_preferences: BTreeMap<String, Value>,
    pub current_epoch: u64,
}

impl ContextBundle {
    /// Render as a markdown block for a prompt builder
    pub fn to_prompt_section(&self) -> String {
        let mut out = String::new();

        out.push_str("## Conversation History\n\n");
        if self.conversation_history.is_empty() {
            out.push_str("_No previous messages_\n");
        }
        for turn in &self.conversation_history {
            let label = match turn.speaker {
                Speaker::User => "**User**",
                Speaker::Agent => "**Agent**",
                Speaker::Unknown => "**Unknown**",
            };
            out.push_str(&format!("{}: {}\n", label, turn.text));
        }

        push_list(&mut out, "Relevant Bitcoin Facts", &self.relevant_bitcoin_facts);
        push_list(
            &mut out,
            "Relevant Ordinals Knowledge",
            &self.relevant_ordinals_knowledge,
        );

        if !self.user_preferences.is_empty() {
            out.push_str("\n## User Preferences\n\n");
            for (kind, value) in &self.user_preferences {
                let value = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                out.push_str(&format!("- {}: {}\n", kind, value));
            }
        }

        out.push_str(&format!("\n_Turn {}_\n", self.current_epoch));
        out
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n## {}\n\n", title));
    for item in items {
        out.push_str(&format!("- {}\n", item));
    }
}

//
// ================= Initialization =================
//

/// What `ContextBroker::initialize` found and did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitReport {
    pub epoch: u64,
    pub conversation_count: usize,
    pub bitcoin_fact_count: usize,
    pub ordinals_knowledge_count: usize,
    pub preference_count: usize,
    pub seeded: bool,
    pub seeded_bitcoin_facts: usize,
    pub seeded_ordinals_knowledge: usize,
}
