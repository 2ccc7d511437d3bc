//! Vector-backed knowledge source
//!
//! [`VectorKnowledge`] composes an [`EmbeddingsProvider`] with a
//! [`VectorStore`] to implement the [`Knowledge`] port: documents are embedded
//! and upserted at indexing time, queries are embedded and matched by cosine
//! similarity at search time. Document text rides along in embedding metadata
//! so hits can be rehydrated without a second store.

use crate::error::{CoreError, Result};
use crate::llm::{Document, EmbedRequest, EmbeddingsProvider, Knowledge};
use async_trait::async_trait;
use drover_store::{Embedding, VectorStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tooling::CancelToken;

const CONTENT_KEY: &str = "content";

/// Knowledge source over an embeddings provider and a vector store.
pub struct VectorKnowledge {
    embedder: Arc<dyn EmbeddingsProvider>,
    vectors: Arc<dyn VectorStore>,
    collection: String,
    model: Option<String>,
}

impl VectorKnowledge {
    pub fn new(
        embedder: Arc<dyn EmbeddingsProvider>,
        vectors: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            collection: collection.into(),
            model: None,
        }
    }

    /// Use a specific embedding model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Embed and index documents as `(id, content)` pairs.
    ///
    /// Creates the collection on first use, sized from the first embedding.
    pub async fn index(&self, cancel: &CancelToken, documents: Vec<(String, String)>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let input: Vec<String> = documents.iter().map(|(_, content)| content.clone()).collect();
        let response = self
            .embedder
            .embed(
                cancel,
                EmbedRequest {
                    model: self.model.clone(),
                    input,
                },
            )
            .await
            .map_err(|e| CoreError::Embed(e.to_string()))?;

        let dimension = response
            .embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| CoreError::Embed("provider returned no embeddings".to_string()))?;
        self.vectors.create_collection(&self.collection, dimension).await?;

        let embeddings = documents
            .into_iter()
            .zip(response.embeddings)
            .map(|((id, content), vector)| {
                let mut metadata: HashMap<String, Value> = HashMap::new();
                metadata.insert(CONTENT_KEY.to_string(), json!(content));
                Embedding {
                    id,
                    vector,
                    metadata,
                }
            })
            .collect();

        self.vectors.upsert(&self.collection, embeddings).await?;
        Ok(())
    }
}

#[async_trait]
impl Knowledge for VectorKnowledge {
    async fn load(&self, _cancel: &CancelToken) -> Result<()> {
        Ok(())
    }

    async fn search(
        &self,
        cancel: &CancelToken,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Document>> {
        let response = self
            .embedder
            .embed(
                cancel,
                EmbedRequest {
                    model: self.model.clone(),
                    input: vec![query.to_string()],
                },
            )
            .await
            .map_err(|e| CoreError::Embed(e.to_string()))?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Embed("provider returned no embeddings".to_string()))?;

        let hits = self
            .vectors
            .search(&self.collection, &vector, top_k)
            .await
            .map_err(|e| CoreError::Knowledge(e.to_string()))?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                let content = hit
                    .metadata
                    .get(CONTENT_KEY)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Document {
                    id: hit.id,
                    content,
                    metadata: hit.metadata,
                    score: hit.score,
                }
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        self.vectors.close().await?;
        Ok(())
    }
}
