use crate::error::{BackendError, StoreError};
use crate::models::{ChatMessage, ChatOutcome, PromptMessage, Sender};
use crate::notify::{Notification, Notifier};
use crate::quota::check_and_roll;
use crate::retrieve::KnowledgeRetriever;
use crate::traits::{ChatModel, Embedder, MetadataStore, VectorIndex};
use chrono::Utc;
use tokio::sync::watch;

/// Prepended to every persona.
pub const ENGINEERING_PREAMBLE: &str = "DISCIPLINA DE ENGENHARIA: ao auxiliar com código ou \
configurações, proponha sempre a menor alteração possível que resolva o problema. Não \
reescreva trechos que não precisam mudar e preserve o estilo existente do projeto.";

const GENERIC_PERSONA: &str = "Você é um assistente virtual útil e profissional.";

const KNOWLEDGE_HEADER: &str = "BASE DE CONHECIMENTO (use isto para responder):";

const CONTEXT_HEADER: &str = "CONTEXTOS ATIVOS:";

pub const HISTORY_WINDOW: usize = 10;

/// Flip the sender to `true` to abort the in-flight model call.
pub type CancelSignal = watch::Receiver<bool>;

pub fn cancellation_pair() -> (watch::Sender<bool>, CancelSignal) {
    watch::channel(false)
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub message: String,
    pub agent: String,
    pub tenant_id: i64,
    pub history: Vec<ChatMessage>,
    pub active_contexts: Vec<String>,
}

/// Message persistence stays with the caller; quota state is the only
/// thing mutated here.
pub struct ChatOrchestrator<S, V, E, M>
where
    S: MetadataStore,
    V: VectorIndex,
    E: Embedder,
    M: ChatModel,
{
    store: S,
    retriever: KnowledgeRetriever<V, E>,
    model: M,
    notifier: Option<Notifier>,
}

impl<S, V, E, M> ChatOrchestrator<S, V, E, M>
where
    S: MetadataStore + Send + Sync,
    V: VectorIndex + Send + Sync,
    E: Embedder + Send + Sync,
    M: ChatModel + Send + Sync,
{
    pub fn new(store: S, retriever: KnowledgeRetriever<V, E>, model: M) -> Self {
        Self {
            store,
            retriever,
            model,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Expected-degraded conditions come back as `ChatOutcome` values;
    /// only store failures escape as errors.
    pub async fn respond(
        &self,
        turn: ChatTurn,
        mut cancel: CancelSignal,
    ) -> Result<ChatOutcome, StoreError> {
        let now = Utc::now();

        let Some(quota) = self.store.quota_state(turn.tenant_id).await? else {
            return Ok(ChatOutcome::UnknownTenant);
        };

        let decision = check_and_roll(quota.consumed, quota.last_reset, now, quota.plan);
        if decision.rolled_over {
            self.store.reset_quota(turn.tenant_id, decision.last_reset).await?;
        }
        if !decision.allowed {
            self.emit(Notification::QuotaExhausted {
                tenant_id: turn.tenant_id,
                plan: quota.plan,
            });
            return Ok(ChatOutcome::QuotaExceeded { plan: quota.plan });
        }

        // callers pass either a numeric id or a name
        let agent = match turn.agent.parse::<i64>() {
            Ok(id) => self.store.agent_by_id(id).await?,
            Err(_) => None,
        };
        let agent = match agent {
            Some(found) => Some(found),
            None => self.store.agent_by_name(&turn.agent, turn.tenant_id).await?,
        };

        let (persona, tag) = match &agent {
            Some(found) => (found.system_instruction.clone(), found.name.clone()),
            None => (GENERIC_PERSONA.to_string(), turn.agent.clone()),
        };

        let knowledge = self
            .retriever
            .retrieve(&turn.message, &tag, turn.tenant_id)
            .await;

        let system_prompt = compose_system_prompt(&persona, &turn.active_contexts, &knowledge);
        let messages = assemble_messages(&turn.history, &turn.message);

        if *cancel.borrow() {
            return Ok(ChatOutcome::Cancelled);
        }

        let completion = tokio::select! {
            result = self.model.complete(&system_prompt, &messages) => result,
            _ = wait_for_cancel(&mut cancel) => {
                tracing::info!(tenant_id = turn.tenant_id, "generation cancelled by user");
                return Ok(ChatOutcome::Cancelled);
            }
        };

        match completion {
            Ok(completion) => {
                self.store
                    .charge_tokens(turn.tenant_id, completion.tokens, Utc::now())
                    .await?;
                self.emit(Notification::UsageRecorded {
                    tenant_id: turn.tenant_id,
                    tokens: completion.tokens,
                });
                Ok(ChatOutcome::Reply {
                    text: completion.text,
                    tokens: completion.tokens,
                })
            }
            Err(BackendError::NotReady(reason)) => {
                tracing::warn!(%reason, "language model not configured, replying offline");
                Ok(ChatOutcome::Offline)
            }
            Err(error) => {
                tracing::error!(%error, tenant_id = turn.tenant_id, "language model call failed");
                Ok(ChatOutcome::ModelFailure {
                    detail: error.to_string(),
                })
            }
        }
    }

    fn emit(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            notifier.emit(notification);
        }
    }
}

// Resolves only once the signal reads `true`; a dropped sender means
// the turn can never be cancelled.
async fn wait_for_cancel(signal: &mut CancelSignal) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Instruction classes in a fixed order, each under its own delimiter.
pub fn compose_system_prompt(persona: &str, active_contexts: &[String], knowledge: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(ENGINEERING_PREAMBLE);
    prompt.push_str("\n\n");
    prompt.push_str(persona);

    let contexts: Vec<&String> = active_contexts
        .iter()
        .filter(|context| !context.trim().is_empty())
        .collect();
    if !contexts.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(CONTEXT_HEADER);
        for context in contexts {
            prompt.push('\n');
            prompt.push_str(context);
        }
    }

    if !knowledge.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(KNOWLEDGE_HEADER);
        prompt.push('\n');
        prompt.push_str(knowledge);
    }

    prompt
}

fn assemble_messages(history: &[ChatMessage], user_message: &str) -> Vec<PromptMessage> {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut messages: Vec<PromptMessage> = history[start..]
        .iter()
        .map(|entry| PromptMessage {
            role: entry.sender,
            text: entry.text.clone(),
        })
        .collect();

    messages.push(PromptMessage {
        role: Sender::User,
        text: user_message.to_string(),
    });

    messages
}
