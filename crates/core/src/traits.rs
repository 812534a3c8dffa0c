use crate::error::{BackendError, StoreError};
use crate::models::{
    Agent, ChatMessage, Completion, KnowledgeDocument, NewDocument, NewMessage, PromptMessage,
    QuotaState, ScopeFilter, VectorMatch, VectorRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait MetadataStore {
    async fn agent_by_id(&self, id: i64) -> Result<Option<Agent>, StoreError>;

    /// Scoped to "system agent or the caller's own agent".
    async fn agent_by_name(&self, name: &str, tenant_id: i64)
        -> Result<Option<Agent>, StoreError>;

    async fn insert_document(&self, document: &NewDocument) -> Result<i64, StoreError>;
    async fn document_by_id(&self, id: i64) -> Result<Option<KnowledgeDocument>, StoreError>;
    async fn delete_document(&self, id: i64) -> Result<(), StoreError>;
    async fn documents_by_tag(&self, tag: &str) -> Result<Vec<KnowledgeDocument>, StoreError>;

    async fn quota_state(&self, tenant_id: i64) -> Result<Option<QuotaState>, StoreError>;
    async fn reset_quota(&self, tenant_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn charge_tokens(
        &self,
        tenant_id: i64,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_message(&self, message: &NewMessage) -> Result<i64, StoreError>;

    /// The most recent `limit` messages, chronological order.
    async fn recent_history(
        &self,
        tenant_id: i64,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Every record carries `doc_id` metadata; `delete_by_document`
/// relies on it.
#[async_trait]
pub trait VectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), BackendError>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &ScopeFilter,
    ) -> Result<Vec<VectorMatch>, BackendError>;

    async fn delete_by_document(&self, doc_id: i64) -> Result<(), BackendError>;
}

#[async_trait]
pub trait Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Implementations report a missing credential as
/// `BackendError::NotReady` so the orchestrator can degrade to the
/// offline placeholder.
#[async_trait]
pub trait ChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[PromptMessage],
    ) -> Result<Completion, BackendError>;
}
