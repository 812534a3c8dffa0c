use crate::error::BackendError;
use crate::models::{ScopeFilter, VectorMatch, VectorMetadata, VectorRecord};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// `host` is the full index host URL; auth via the `Api-Key` header.
pub struct PineconeStore {
    host: String,
    api_key: String,
    client: Client,
}

impl PineconeStore {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl VectorIndex for PineconeStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), BackendError> {
        if records.is_empty() {
            return Ok(());
        }

        let vectors = records
            .iter()
            .map(|record| {
                Ok(json!({
                    "id": record.id,
                    "values": record.values,
                    "metadata": serde_json::to_value(&record.metadata)?,
                }))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        let response = self
            .client
            .post(self.url("/vectors/upsert"))
            .header("Api-Key", &self.api_key)
            .json(&json!({ "vectors": vectors }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "pinecone".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &ScopeFilter,
    ) -> Result<Vec<VectorMatch>, BackendError> {
        let response = self
            .client
            .post(self.url("/query"))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
                "filter": {
                    "tag": { "$eq": filter.tag },
                    "scope": { "$in": filter.scopes },
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "pinecone".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/matches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit
                .pointer("/id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
            let metadata = hit.pointer("/metadata").map(parse_metadata);

            matches.push(VectorMatch { id, score, metadata: metadata.flatten() });
        }

        Ok(matches)
    }

    async fn delete_by_document(&self, doc_id: i64) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/vectors/delete"))
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "filter": { "doc_id": { "$eq": doc_id } },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "pinecone".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }
}

// Pinecone returns metadata numbers as floats, so `doc_id` needs the
// lossy path. Unusable metadata becomes `None`, not a query failure.
fn parse_metadata(value: &Value) -> Option<VectorMetadata> {
    let doc_id = value
        .pointer("/doc_id")
        .and_then(|raw| raw.as_i64().or_else(|| raw.as_f64().map(|float| float as i64)))?;

    Some(VectorMetadata {
        text: value.pointer("/text")?.as_str()?.to_string(),
        tag: value
            .pointer("/tag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        scope: value
            .pointer("/scope")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        source_file: value
            .pointer("/source_file")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        doc_id,
    })
}
