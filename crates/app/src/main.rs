use agent_chat_core::{
    cancellation_pair, discover_files, ChatOrchestrator, ChatTurn, IngestError, KnowledgeIndexer,
    KnowledgeRetriever, LogSink, MetadataStore, NewMessage, Notifier, OpenAiClient, PineconeStore,
    Plan, RetrievalOptions, Sender, SqliteStore,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agent-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path.
    #[arg(long, default_value = "agent-chat.db")]
    db: PathBuf,

    /// Pinecone index host URL.
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    pinecone_host: Option<String>,

    /// Pinecone API key.
    #[arg(long, env = "PINECONE_API_KEY")]
    pinecone_key: Option<String>,

    /// OpenAI API key. Without it the chat degrades to offline mode.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a file or folder into an agent's knowledge base.
    Ingest {
        /// File or folder to ingest (folders are walked recursively).
        #[arg(long)]
        path: PathBuf,
        /// Agent name the knowledge belongs to.
        #[arg(long)]
        tag: String,
        /// Owning tenant id.
        #[arg(long)]
        tenant: i64,
        /// Mark the knowledge as shared across all tenants.
        #[arg(long, default_value_t = false)]
        shared: bool,
    },
    /// Ingest raw text without a file.
    IngestText {
        #[arg(long)]
        text: String,
        /// Display name recorded for the snippet.
        #[arg(long, default_value = "texto-avulso")]
        name: String,
        #[arg(long)]
        tag: String,
        #[arg(long)]
        tenant: i64,
        #[arg(long, default_value_t = false)]
        shared: bool,
    },
    /// Send one chat message and print the reply. Ctrl-C cancels the
    /// generation in flight.
    Ask {
        #[arg(long)]
        message: String,
        /// Agent id or name.
        #[arg(long)]
        agent: String,
        #[arg(long)]
        tenant: i64,
        /// Session to continue; a new one is created when omitted.
        #[arg(long)]
        session: Option<String>,
        /// Extra instruction blocks appended to the system prompt.
        #[arg(long = "context")]
        contexts: Vec<String>,
    },
    /// Run a similarity search without invoking the chat model.
    Retrieve {
        #[arg(long)]
        query: String,
        #[arg(long)]
        tag: String,
        #[arg(long)]
        tenant: i64,
        /// Number of candidates to pull from the index.
        #[arg(long, default_value = "4")]
        top_k: usize,
        /// Minimum similarity score kept in the joined context.
        #[arg(long, default_value = "0.68")]
        min_score: f64,
        /// Print raw matches with scores instead of the joined context.
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Delete a document and its vectors.
    Delete {
        #[arg(long)]
        document_id: i64,
        #[arg(long)]
        tenant: i64,
        /// Bypass the ownership check (admin use).
        #[arg(long, default_value_t = false)]
        privileged: bool,
    },
    /// List a tenant's chat sessions.
    Sessions {
        #[arg(long)]
        tenant: i64,
    },
    /// Print the full log of one session.
    History {
        #[arg(long)]
        tenant: i64,
        #[arg(long)]
        session: String,
    },
    /// List a tenant's documents.
    Documents {
        #[arg(long)]
        tenant: i64,
    },
    /// Create an agent persona.
    SeedAgent {
        #[arg(long)]
        name: String,
        #[arg(long)]
        specialty: String,
        #[arg(long)]
        instruction: String,
        /// Owning tenant; omit for a shared system agent.
        #[arg(long)]
        tenant: Option<i64>,
        #[arg(long, default_value_t = false)]
        public: bool,
    },
    /// Create a tenant with a subscription plan.
    SeedTenant {
        #[arg(long)]
        tenant: i64,
        #[arg(long, default_value = "Free")]
        plan: String,
    },
}

fn vector_index(cli: &Cli) -> anyhow::Result<PineconeStore> {
    let host = cli
        .pinecone_host
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("PINECONE_INDEX_HOST (or --pinecone-host) is required"))?;
    let key = cli
        .pinecone_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("PINECONE_API_KEY (or --pinecone-key) is required"))?;
    Ok(PineconeStore::new(host, key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = SqliteStore::new(&cli.db).map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let openai = OpenAiClient::new(cli.openai_key.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "agent-chat boot"
    );

    match cli.command {
        Command::Ingest { ref path, ref tag, tenant, shared } => {
            let index = vector_index(&cli)?;
            let embedder = OpenAiClient::new(cli.openai_key.clone());
            let indexer = KnowledgeIndexer::new(store, index, embedder);

            let files = if path.is_dir() {
                discover_files(path)
            } else {
                vec![path.clone()]
            };
            if files.is_empty() {
                println!("nenhum arquivo suportado em {}", path.display());
                return Ok(());
            }

            let mut ingested = 0usize;
            for file in files {
                match ingest_one(&indexer, &file, tag, tenant, shared).await {
                    Ok(chunk_count) => {
                        println!("{}: {} trechos indexados", file.display(), chunk_count);
                        ingested += 1;
                    }
                    Err(error) if error.is_user_facing() => {
                        warn!(path = %file.display(), %error, "arquivo ignorado");
                    }
                    Err(error) => return Err(anyhow::anyhow!(error.to_string())),
                }
            }
            println!("{ingested} documento(s) ingerido(s)");
        }
        Command::IngestText { ref text, ref name, ref tag, tenant, shared } => {
            let index = vector_index(&cli)?;
            let embedder = OpenAiClient::new(cli.openai_key.clone());
            let indexer = KnowledgeIndexer::new(store, index, embedder);

            let receipt = indexer
                .ingest_text(text, name, "txt", tag, tenant, shared)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!(
                "documento {} indexado com {} trecho(s)",
                receipt.document_id, receipt.chunk_count
            );
        }
        Command::Ask { ref message, ref agent, tenant, ref session, ref contexts } => {
            let index = vector_index(&cli)?;
            let embedder = OpenAiClient::new(cli.openai_key.clone());
            let retriever = KnowledgeRetriever::new(index, embedder);
            let engine = ChatOrchestrator::new(store, retriever, openai)
                .with_notifier(Notifier::spawn(LogSink));

            let session_id = session
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let history = engine
                .store()
                .recent_history(tenant, &session_id, agent_chat_core::HISTORY_WINDOW)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            engine
                .store()
                .append_message(&NewMessage {
                    tenant_id: tenant,
                    agent_ref: agent.clone(),
                    session_id: session_id.clone(),
                    sender: Sender::User,
                    text: message.clone(),
                    tokens_used: 0,
                    timestamp: Utc::now(),
                })
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let (cancel_tx, cancel_rx) = cancellation_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = cancel_tx.send(true);
                }
            });

            let turn = ChatTurn {
                message: message.clone(),
                agent: agent.clone(),
                tenant_id: tenant,
                history,
                active_contexts: contexts.clone(),
            };
            let outcome = engine
                .respond(turn, cancel_rx)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if let agent_chat_core::ChatOutcome::Reply { ref text, tokens } = outcome {
                engine
                    .store()
                    .append_message(&NewMessage {
                        tenant_id: tenant,
                        agent_ref: agent.clone(),
                        session_id: session_id.clone(),
                        sender: Sender::Assistant,
                        text: text.clone(),
                        tokens_used: tokens,
                        timestamp: Utc::now(),
                    })
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            }

            println!("sessão: {session_id}");
            println!("{}", outcome.message());
        }
        Command::Retrieve { ref query, ref tag, tenant, top_k, min_score, debug } => {
            let index = vector_index(&cli)?;
            let embedder = OpenAiClient::new(cli.openai_key.clone());
            let retriever = KnowledgeRetriever::new(index, embedder)
                .with_options(RetrievalOptions { top_k, min_score });

            if debug {
                let matches = retriever
                    .retrieve_debug(query, tag, tenant)
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                for found in matches {
                    println!("[{:.4}] id={}", found.score, found.id);
                    if let Some(metadata) = found.metadata {
                        println!("  fonte={} escopo={}", metadata.source_file, metadata.scope);
                        println!("  {}", metadata.text);
                    }
                }
            } else {
                let context = retriever.retrieve(query, tag, tenant).await;
                if context.is_empty() {
                    println!("nenhum trecho relevante encontrado");
                } else {
                    println!("{context}");
                }
            }
        }
        Command::Delete { document_id, tenant, privileged } => {
            let index = vector_index(&cli)?;
            let embedder = OpenAiClient::new(cli.openai_key.clone());
            let indexer = KnowledgeIndexer::new(store, index, embedder)
                .with_notifier(Notifier::spawn(LogSink));

            let outcome = indexer
                .delete_document(document_id, tenant, privileged)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            match outcome {
                agent_chat_core::DeleteOutcome::Deleted => println!("documento {document_id} removido"),
                agent_chat_core::DeleteOutcome::NotFound => println!("documento {document_id} não existe"),
                agent_chat_core::DeleteOutcome::NotOwner => {
                    println!("documento {document_id} pertence a outro usuário")
                }
            }
        }
        Command::Sessions { tenant } => {
            let sessions = store
                .list_sessions(tenant)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            for session in sessions {
                println!(
                    "{} | {} | {} mensagem(ns) | {}",
                    session.session_id,
                    session.title,
                    session.message_count,
                    session.last_activity.to_rfc3339()
                );
            }
        }
        Command::History { tenant, ref session } => {
            let messages = store
                .session_messages(tenant, session)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            for message in messages {
                println!(
                    "[{}] {}: {}",
                    message.timestamp.to_rfc3339(),
                    message.sender.as_str(),
                    message.text
                );
            }
        }
        Command::Documents { tenant } => {
            let documents = store
                .documents_for_tenant(tenant)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            for document in documents {
                println!(
                    "{} | {} | {} | tag={} | {}",
                    document.id,
                    document.file_name,
                    document.file_type,
                    document.tag,
                    document.created_at.to_rfc3339()
                );
            }
        }
        Command::SeedAgent { ref name, ref specialty, ref instruction, tenant, public } => {
            let id = store
                .insert_agent(tenant, name, specialty, instruction, public)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("agente {id} criado");
        }
        Command::SeedTenant { tenant, plan } => {
            let plan = Plan::parse(&plan);
            store
                .ensure_tenant(tenant, plan)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            store
                .set_plan(tenant, plan)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            println!("tenant {tenant} no plano {}", plan.as_str());
        }
    }

    Ok(())
}

async fn ingest_one<S, V, E>(
    indexer: &KnowledgeIndexer<S, V, E>,
    file: &Path,
    tag: &str,
    tenant: i64,
    shared: bool,
) -> Result<usize, IngestError>
where
    S: MetadataStore + Send + Sync,
    V: agent_chat_core::VectorIndex + Send + Sync,
    E: agent_chat_core::Embedder + Send + Sync,
{
    let bytes = tokio::fs::read(file).await?;
    enforce_upload_limit(indexer.store(), tenant, bytes.len()).await?;

    let filename = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("arquivo");
    let receipt = indexer
        .ingest_file(&bytes, filename, tag, tenant, shared)
        .await?;
    Ok(receipt.chunk_count)
}

async fn enforce_upload_limit<S: MetadataStore + Sync>(
    store: &S,
    tenant: i64,
    bytes: usize,
) -> Result<(), IngestError> {
    let plan = match store.quota_state(tenant).await? {
        Some(state) => state.plan,
        None => Plan::Free,
    };
    if let Some(limit) = plan.max_upload_bytes() {
        if bytes as u64 > limit {
            return Err(IngestError::Extraction(format!(
                "arquivo de {bytes} bytes excede o limite de {limit} bytes do plano {}",
                plan.as_str()
            )));
        }
    }
    Ok(())
}
