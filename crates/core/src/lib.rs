pub mod chat;
pub mod chunking;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod quota;
pub mod retrieve;
pub mod stores;
pub mod traits;

pub use chat::{cancellation_pair, CancelSignal, ChatOrchestrator, ChatTurn, HISTORY_WINDOW};
pub use chunking::{flatten_line_breaks, split_fixed, ChunkingConfig, DEFAULT_CHUNK_MAX_CHARS};
pub use error::{BackendError, IngestError, StoreError};
pub use extract::{extract, is_supported, ocr_config_from_env, Extracted, OcrConfig};
pub use ingest::{discover_files, IngestReceipt, KnowledgeIndexer};
pub use models::{
    Agent, ChatMessage, ChatOutcome, Completion, DeleteOutcome, KnowledgeDocument, NewDocument,
    NewMessage, PromptMessage, QuotaState, Scope, ScopeFilter, Sender, VectorMatch, VectorMetadata,
    VectorRecord, SYSTEM_SCOPE,
};
pub use notify::{LogSink, Notification, NotificationSink, Notifier};
pub use quota::{check_and_roll, Plan, QuotaDecision};
pub use retrieve::{KnowledgeRetriever, RetrievalOptions, CONTEXT_SEPARATOR};
pub use stores::{OpenAiClient, PineconeStore, SessionSummary, SqliteStore};
pub use traits::{ChatModel, Embedder, MetadataStore, VectorIndex};
