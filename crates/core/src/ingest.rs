use crate::chunking::{split_fixed, ChunkingConfig};
use crate::error::{BackendError, IngestError};
use crate::extract::{extract, is_supported};
use crate::models::{
    may_modify, DeleteOutcome, NewDocument, Scope, VectorMetadata, VectorRecord,
};
use crate::notify::{Notification, Notifier};
use crate::traits::{Embedder, MetadataStore, VectorIndex};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub document_id: i64,
    pub chunk_count: usize,
    pub file_type: String,
}

/// Plan size limits and write authorization are the caller's job;
/// tenant and shared flags arrive here already validated.
pub struct KnowledgeIndexer<S, V, E>
where
    S: MetadataStore,
    V: VectorIndex,
    E: Embedder,
{
    store: S,
    index: V,
    embedder: E,
    chunking: ChunkingConfig,
    notifier: Option<Notifier>,
}

impl<S, V, E> KnowledgeIndexer<S, V, E>
where
    S: MetadataStore + Send + Sync,
    V: VectorIndex + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(store: S, index: V, embedder: E) -> Self {
        Self {
            store,
            index,
            embedder,
            chunking: ChunkingConfig::default(),
            notifier: None,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn ingest_file(
        &self,
        bytes: &[u8],
        filename: &str,
        tag: &str,
        tenant_id: i64,
        shared: bool,
    ) -> Result<IngestReceipt, IngestError> {
        let extracted = extract(bytes, filename)?;
        self.ingest_text(
            &extracted.text,
            filename,
            &extracted.file_type,
            tag,
            tenant_id,
            shared,
        )
        .await
    }

    /// The relational row is written first to establish identity; if
    /// embedding or upsert fails the row is rolled back.
    pub async fn ingest_text(
        &self,
        text: &str,
        source_name: &str,
        file_type: &str,
        tag: &str,
        tenant_id: i64,
        shared: bool,
    ) -> Result<IngestReceipt, IngestError> {
        if text.trim().is_empty() {
            return Err(IngestError::EmptyDocument(source_name.to_string()));
        }

        let vector_id_prefix = Uuid::new_v4().simple().to_string();
        let document_id = self
            .store
            .insert_document(&NewDocument {
                tenant_id,
                file_name: source_name.to_string(),
                file_type: file_type.to_string(),
                vector_id_prefix: vector_id_prefix.clone(),
                tag: tag.to_string(),
            })
            .await?;

        let scope = Scope::from_flags(tenant_id, shared);
        match self
            .vectorize(text, document_id, &vector_id_prefix, tag, scope, source_name)
            .await
        {
            Ok(chunk_count) => {
                tracing::info!(
                    document_id,
                    chunk_count,
                    tag,
                    scope = %scope.as_value(),
                    "document ingested"
                );
                Ok(IngestReceipt {
                    document_id,
                    chunk_count,
                    file_type: file_type.to_string(),
                })
            }
            Err(error) => {
                // without vectors the row would make listings and
                // retrieval diverge
                if let Err(cleanup) = self.store.delete_document(document_id).await {
                    tracing::error!(document_id, %cleanup, "rollback of document row failed");
                }
                Err(error.into())
            }
        }
    }

    async fn vectorize(
        &self,
        text: &str,
        document_id: i64,
        vector_id_prefix: &str,
        tag: &str,
        scope: Scope,
        source_name: &str,
    ) -> Result<usize, BackendError> {
        let chunks = split_fixed(text, self.chunking)
            .map_err(|error| BackendError::Request(error.to_string()))?;

        let mut records = Vec::with_capacity(chunks.len());
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let values = self.embedder.embed(&chunk).await?;
            records.push(VectorRecord {
                id: format!("{vector_id_prefix}_{chunk_index}"),
                values,
                metadata: VectorMetadata {
                    text: chunk,
                    tag: tag.to_string(),
                    scope: scope.as_value(),
                    source_file: source_name.to_string(),
                    doc_id: document_id,
                },
            });
        }

        let count = records.len();
        self.index.upsert(&records).await?;
        Ok(count)
    }

    /// Vector cleanup is best-effort; the relational delete is
    /// authoritative.
    pub async fn delete_document(
        &self,
        document_id: i64,
        requesting_tenant: i64,
        privileged: bool,
    ) -> Result<DeleteOutcome, IngestError> {
        let Some(document) = self.store.document_by_id(document_id).await? else {
            return Ok(DeleteOutcome::NotFound);
        };

        if !may_modify(Some(document.tenant_id), requesting_tenant, privileged) {
            return Ok(DeleteOutcome::NotOwner);
        }

        if let Err(error) = self.index.delete_by_document(document_id).await {
            tracing::warn!(
                document_id,
                %error,
                "vector deletion failed; removing the document row anyway"
            );
        }

        self.store.delete_document(document_id).await?;
        if let Some(notifier) = &self.notifier {
            notifier.emit(Notification::DocumentDeleted {
                tenant_id: document.tenant_id,
                document_id,
            });
        }
        Ok(DeleteOutcome::Deleted)
    }
}

pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = entry
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_supported);

        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}
