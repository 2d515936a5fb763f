//! Read paths used while assembling context

use super::ContextBroker;
use crate::models::{
    Category, ConversationTurn, MemoryQuery, Metadata, SearchHit, Speaker, META_USER_ID,
};
use crate::Result;

impl ContextBroker {
    /// Up to `limit` most recent turns for the user, oldest first
    pub async fn get_conversation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let newest_first = self
            .store
            .get_memories(
                Category::Conversations,
                &MemoryQuery::new(limit).with_filter(META_USER_ID, user_id),
            )
            .await?;

        Ok(newest_first
            .into_iter()
            .rev()
            .map(|record| ConversationTurn {
                speaker: Speaker::from_metadata(&record.metadata),
                text: record.document,
            })
            .collect())
    }

    pub async fn search_bitcoin_facts(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.store
            .search_memory(Category::BitcoinFacts, query, &Metadata::new(), limit)
            .await
    }

    pub async fn search_ordinals_knowledge(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.store
            .search_memory(Category::OrdinalsKnowledge, query, &Metadata::new(), limit)
            .await
    }
}
