use crate::quota::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel scope value for knowledge visible to every tenant.
pub const SYSTEM_SCOPE: &str = "system";

/// `owner_tenant = None` marks a shared system agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub owner_tenant: Option<i64>,
    pub name: String,
    pub specialty: String,
    pub system_instruction: String,
    pub is_public: bool,
}

impl Agent {
    pub fn is_system(&self) -> bool {
        self.owner_tenant.is_none()
    }
}

/// Shared ownership rule for every mutating path. Unowned (shared)
/// resources are only writable by privileged callers.
pub fn may_modify(resource_owner: Option<i64>, requester: i64, privileged: bool) -> bool {
    privileged || resource_owner == Some(requester)
}

/// Source of truth for a document's existence; the anchor for bulk
/// vector deletion via `doc_id` metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: i64,
    pub tenant_id: i64,
    pub file_name: String,
    pub file_type: String,
    pub vector_id_prefix: String,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub tenant_id: i64,
    pub file_name: String,
    pub file_type: String,
    pub vector_id_prefix: String,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Sender> {
        match value {
            "user" => Some(Sender::User),
            "assistant" => Some(Sender::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub tenant_id: i64,
    pub agent_ref: String,
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub tokens_used: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: i64,
    pub agent_ref: String,
    pub session_id: String,
    pub sender: Sender,
    pub text: String,
    pub tokens_used: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Shared,
    Tenant(i64),
}

impl Scope {
    pub fn from_flags(tenant_id: i64, shared: bool) -> Scope {
        if shared {
            Scope::Shared
        } else {
            Scope::Tenant(tenant_id)
        }
    }

    pub fn as_value(&self) -> String {
        match self {
            Scope::Shared => SYSTEM_SCOPE.to_string(),
            Scope::Tenant(id) => id.to_string(),
        }
    }
}

/// `doc_id` is the only link back to the relational row; without it,
/// deletion by filter breaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub text: String,
    pub tag: String,
    pub scope: String,
    pub source_file: String,
    pub doc_id: i64,
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
    pub metadata: Option<VectorMetadata>,
}

/// Exact tag match plus scope membership in {tenant, "system"}.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    pub tag: String,
    pub scopes: Vec<String>,
}

impl ScopeFilter {
    pub fn for_tenant(tag: impl Into<String>, tenant_id: i64) -> ScopeFilter {
        ScopeFilter {
            tag: tag.into(),
            scopes: vec![tenant_id.to_string(), SYSTEM_SCOPE.to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaState {
    pub consumed: i64,
    pub last_reset: DateTime<Utc>,
    pub plan: Plan,
}

#[derive(Debug, Clone)]
pub struct PromptMessage {
    pub role: Sender,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens: i64,
}

/// Expected-degraded conditions are values here, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Reply { text: String, tokens: i64 },
    QuotaExceeded { plan: Plan },
    Offline,
    ModelFailure { detail: String },
    Cancelled,
    UnknownTenant,
}

impl ChatOutcome {
    pub fn tokens(&self) -> i64 {
        match self {
            ChatOutcome::Reply { tokens, .. } => *tokens,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ChatOutcome::Reply { text, .. } => text.clone(),
            ChatOutcome::QuotaExceeded { plan } => format!(
                "Limite do plano {} atingido. Faça upgrade para continuar.",
                plan.as_str()
            ),
            ChatOutcome::Offline => {
                "[MODO OFFLINE] A IA não está respondendo. Verifique a chave da API.".to_string()
            }
            ChatOutcome::ModelFailure { detail } => {
                format!("Erro de comunicação com a IA: {detail}")
            }
            ChatOutcome::Cancelled => "Geração cancelada pelo usuário.".to_string(),
            ChatOutcome::UnknownTenant => "Erro: usuário não encontrado.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotOwner,
}
