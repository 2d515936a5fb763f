//! Conversation and knowledge writes

use super::{timestamp, ContextBroker};
use crate::audit::new_event;
use crate::models::{
    Category, Metadata, Speaker, UniqueInsert, META_EPOCH, META_MESSAGE_TYPE, META_SOURCE,
    META_SPEAKER, META_TIMESTAMP, META_USER_ID,
};
use crate::Result;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// First `max_chars` characters of `text`, never splitting a code point
pub(crate) fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

impl ContextBroker {
    fn turn_metadata(&self, user_id: &str, speaker: Speaker) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_TIMESTAMP.into(), timestamp());
        metadata.insert(META_USER_ID.into(), Value::from(user_id));
        metadata.insert(META_SPEAKER.into(), Value::from(speaker.as_str()));
        metadata.insert(META_EPOCH.into(), Value::from(self.epoch.get()));
        metadata
    }

    fn event_metadata(&self, user_id: &str, message_type: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_TIMESTAMP.into(), timestamp());
        metadata.insert(META_USER_ID.into(), Value::from(user_id));
        metadata.insert(META_MESSAGE_TYPE.into(), Value::from(message_type));
        metadata.insert(META_EPOCH.into(), Value::from(self.epoch.get()));
        metadata
    }

    fn knowledge_metadata(&self, source: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(META_TIMESTAMP.into(), timestamp());
        metadata.insert(META_SOURCE.into(), Value::from(source));
        metadata.insert(META_EPOCH.into(), Value::from(self.epoch.get()));
        metadata
    }

    pub async fn record_user_message(&self, user_id: &str, message: &str) -> Result<Uuid> {
        let id = self
            .store
            .create_memory(
                Category::Conversations,
                message,
                self.turn_metadata(user_id, Speaker::User),
            )
            .await?;

        self.store
            .create_event(new_event(
                format!("User {} said: {}", user_id, message),
                self.event_metadata(user_id, "user_message"),
            )?)
            .await?;

        debug!(memory_id = %id, user_id, "Recorded user message");
        Ok(id)
    }

    /// The stored turn keeps the full text; only the event is abbreviated
    pub async fn record_agent_response(&self, user_id: &str, response: &str) -> Result<Uuid> {
        let id = self
            .store
            .create_memory(
                Category::Conversations,
                response,
                self.turn_metadata(user_id, Speaker::Agent),
            )
            .await?;

        self.store
            .create_event(new_event(
                format!(
                    "Agent responded to {}: {}...",
                    user_id,
                    preview(response, self.config.event_preview_chars)
                ),
                self.event_metadata(user_id, "agent_response"),
            )?)
            .await?;

        debug!(memory_id = %id, user_id, "Recorded agent response");
        Ok(id)
    }

    pub async fn record_bitcoin_fact(&self, fact: &str, source: &str) -> Result<UniqueInsert> {
        self.store
            .create_unique_memory(
                Category::BitcoinFacts,
                fact,
                self.knowledge_metadata(source),
                self.config.similarity_threshold,
            )
            .await
    }

    pub async fn record_ordinals_knowledge(
        &self,
        knowledge: &str,
        source: &str,
    ) -> Result<UniqueInsert> {
        self.store
            .create_unique_memory(
                Category::OrdinalsKnowledge,
                knowledge,
                self.knowledge_metadata(source),
                self.config.similarity_threshold,
            )
            .await
    }
}
