//! Agent memory over the store
//!
//! [`MemoryManager`] injects long-term memories into prompts and extracts
//! durable facts from transcripts. Extraction asks the model for a JSON list
//! of `{key, value}` facts and upserts them; it is strictly best-effort -
//! summarization and parse failures are swallowed so a flaky extraction can
//! never fail the chat that triggered it.

use crate::error::Result;
use crate::json::parse_salvaged;
use crate::llm::{ChatModel, ChatRequest, Message};
use drover_store::{MemoryKind, MemoryRecord, Store};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tooling::CancelToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ExtractedFact {
    key: String,
    value: Value,
}

/// Long-term memory injection and extraction for one agent.
pub struct MemoryManager {
    store: Arc<dyn Store>,
    provider: Arc<dyn ChatModel>,
    model: Option<String>,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn ChatModel>) -> Self {
        Self {
            store,
            provider,
            model: None,
        }
    }

    /// Use a specific model id for extraction calls.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Long-term memories to inject into an agent's prompt.
    pub async fn inject(&self, agent_id: &str) -> Result<Vec<MemoryRecord>> {
        Ok(self.store.list_memories(agent_id, MemoryKind::LongTerm).await?)
    }

    /// Upsert a single long-term memory.
    pub async fn remember(
        &self,
        agent_id: &str,
        key: impl Into<String>,
        value: Value,
        session_id: Option<&str>,
    ) -> Result<()> {
        let mut record = MemoryRecord::new(agent_id, MemoryKind::LongTerm, key, value);
        if let Some(session_id) = session_id {
            record = record.with_session(session_id);
        }
        self.store.put_memory(record).await?;
        Ok(())
    }

    /// Delete a long-term memory.
    pub async fn forget(&self, agent_id: &str, key: &str) -> Result<()> {
        self.store
            .delete_memory(agent_id, MemoryKind::LongTerm, key)
            .await?;
        Ok(())
    }

    /// Extract durable facts from a transcript. Best-effort; never fails.
    pub async fn extract(
        &self,
        cancel: &CancelToken,
        agent_id: &str,
        session_id: Option<&str>,
        transcript: &[Message],
    ) {
        if transcript.is_empty() {
            return;
        }

        let mut conversation = String::new();
        for message in transcript {
            conversation.push_str(&format!("{:?}: {}\n", message.role, message.content));
        }

        let request = ChatRequest::new(vec![
            Message::system(
                "Extract durable facts about the user from the conversation. Respond \
                 with a JSON array of objects {\"key\": string, \"value\": any}. Use \
                 short snake_case keys. Respond with [] when there is nothing worth \
                 remembering.",
            ),
            Message::user(conversation),
        ])
        .with_temperature(0.0)
        .with_json_output();
        let request = match &self.model {
            Some(model) => request.with_model(model.clone()),
            None => request,
        };

        let response = match self.provider.chat(cancel, request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(agent = agent_id, error = %e, "memory extraction call failed, skipping");
                return;
            }
        };

        let facts: Vec<ExtractedFact> = match parse_salvaged(&response.content) {
            Ok(facts) => facts,
            Err(e) => {
                debug!(agent = agent_id, error = %e, "memory extraction parse failed, skipping");
                return;
            }
        };

        for fact in facts {
            let mut record = MemoryRecord::new(agent_id, MemoryKind::LongTerm, fact.key, fact.value);
            if let Some(session_id) = session_id {
                record = record.with_session(session_id);
            }
            if let Err(e) = self.store.put_memory(record).await {
                debug!(agent = agent_id, error = %e, "memory upsert failed, skipping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;
    use drover_store::MemoryStore;
    use serde_json::json;

    struct ScriptedExtractor(&'static str);

    #[async_trait]
    impl ChatModel for ScriptedExtractor {
        fn name(&self) -> &str {
            "extractor"
        }

        async fn chat(&self, _cancel: &CancelToken, _request: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse::text(self.0))
        }
    }

    fn transcript() -> Vec<Message> {
        vec![
            Message::user("My name is Ada and I prefer metric units."),
            Message::assistant("Nice to meet you, Ada."),
        ]
    }

    #[tokio::test]
    async fn test_extracts_and_upserts_facts() {
        let store = Arc::new(MemoryStore::new());
        let manager = MemoryManager::new(
            store.clone(),
            Arc::new(ScriptedExtractor(
                r#"[{"key": "name", "value": "Ada"}, {"key": "units", "value": "metric"}]"#,
            )),
        );

        manager
            .extract(&CancelToken::new(), "agent-1", Some("s1"), &transcript())
            .await;

        let memories = manager.inject("agent-1").await.unwrap();
        assert_eq!(memories.len(), 2);
        let name = store
            .get_memory("agent-1", MemoryKind::LongTerm, "name")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name.value, json!("Ada"));
        assert_eq!(name.session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_salvages_fenced_output() {
        let store = Arc::new(MemoryStore::new());
        let manager = MemoryManager::new(
            store,
            Arc::new(ScriptedExtractor(
                "Sure:\n```json\n[{\"key\": \"name\", \"value\": \"Ada\"}]\n```",
            )),
        );

        manager
            .extract(&CancelToken::new(), "agent-1", None, &transcript())
            .await;

        assert_eq!(manager.inject("agent-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_output_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        let manager =
            MemoryManager::new(store, Arc::new(ScriptedExtractor("I could not decide.")));

        manager
            .extract(&CancelToken::new(), "agent-1", None, &transcript())
            .await;

        assert!(manager.inject("agent-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remember_and_forget() {
        let store = Arc::new(MemoryStore::new());
        let manager = MemoryManager::new(store, Arc::new(ScriptedExtractor("[]")));

        manager
            .remember("agent-1", "likes", json!("graphs"), None)
            .await
            .unwrap();
        assert_eq!(manager.inject("agent-1").await.unwrap().len(), 1);

        manager.forget("agent-1", "likes").await.unwrap();
        assert!(manager.inject("agent-1").await.unwrap().is_empty());
    }
}
