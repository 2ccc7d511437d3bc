//! Context-window management
//!
//! Estimates token usage with a characters-per-token heuristic, decides when
//! a conversation no longer fits its model's window, and produces rolling
//! summaries that fold older turns into a compact prefix while keeping the
//! most recent user turns verbatim.
//!
//! Each compression incorporates the prior rolling summary into the new one,
//! so information is carried forward rather than silently discarded.

use crate::error::Result;
use crate::interceptor::{keys, EventType, HookEvent, InterceptorChain};
use crate::llm::{ChatModel, ChatRequest, Message};
use serde_json::json;
use std::sync::Arc;
use tooling::CancelToken;
use tracing::debug;

/// Nominal context windows for known model families, matched by prefix.
const MODEL_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o1", 200_000),
    ("claude-3-5", 200_000),
    ("claude-3", 200_000),
    ("claude-", 200_000),
    ("gemini-1.5", 1_048_576),
    ("gemini-", 32_768),
    ("llama3", 8_192),
    ("mistral", 32_768),
];

/// Window applied when the model id is unknown.
const FALLBACK_WINDOW: usize = 8_192;

/// Tuning knobs for estimation and compression.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Characters per token for the estimation heuristic.
    pub chars_per_token: f64,

    /// Fixed per-message overhead, in tokens.
    pub message_overhead: usize,

    /// Fixed request framing overhead, in tokens.
    pub framing_overhead: usize,

    /// Compress when estimated usage exceeds `window * threshold`.
    pub threshold: f64,

    /// Most recent user turns kept verbatim through compression.
    pub preserve_recent_turns: usize,

    /// Cap on the summarization call's output.
    pub summary_max_tokens: u32,

    /// Fixed window override; bypasses the model table when set.
    pub context_limit: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            message_overhead: 4,
            framing_overhead: 3,
            threshold: 0.8,
            preserve_recent_turns: 5,
            summary_max_tokens: 512,
            context_limit: None,
        }
    }
}

impl ContextConfig {
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_preserve_recent_turns(mut self, turns: usize) -> Self {
        self.preserve_recent_turns = turns;
        self
    }

    pub fn with_summary_max_tokens(mut self, max_tokens: u32) -> Self {
        self.summary_max_tokens = max_tokens;
        self
    }
}

/// Result of one compression pass.
#[derive(Debug, Clone)]
pub struct Compression {
    /// The new rolling summary.
    pub summary: String,

    /// Messages kept verbatim (the recent turns).
    pub preserved: Vec<Message>,

    /// Estimated token count that triggered the pass.
    pub estimated_tokens: usize,
}

/// Token estimation and rolling-summary compression.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Context window for a model id, honouring the override.
    pub fn window_for(&self, model: Option<&str>) -> usize {
        if let Some(limit) = self.config.context_limit {
            return limit;
        }
        model
            .and_then(|id| {
                MODEL_WINDOWS
                    .iter()
                    .find(|(prefix, _)| id.starts_with(prefix))
                    .map(|(_, window)| *window)
            })
            .unwrap_or(FALLBACK_WINDOW)
    }

    fn estimate_message(&self, message: &Message) -> usize {
        let chars = message.content.len();
        (chars as f64 / self.config.chars_per_token).ceil() as usize + self.config.message_overhead
    }

    /// Estimate total tokens for a set of messages, including framing.
    pub fn estimate<'a>(&self, messages: impl IntoIterator<Item = &'a Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.estimate_message(m))
            .sum::<usize>()
            + self.config.framing_overhead
    }

    /// Whether `system + history` overflows the model's effective window.
    pub fn should_compress(
        &self,
        model: Option<&str>,
        system: &[Message],
        history: &[Message],
    ) -> bool {
        let estimated = self.estimate(system.iter().chain(history));
        let limit = (self.window_for(model) as f64 * self.config.threshold).floor() as usize;
        estimated > limit
    }

    /// Index splitting `history` into a compressible prefix and the preserved
    /// tail: the most recent `preserve_recent_turns` user messages plus
    /// everything after them.
    fn split_point(&self, history: &[Message]) -> usize {
        let mut user_turns = 0;
        for (index, message) in history.iter().enumerate().rev() {
            if message.is_user() {
                user_turns += 1;
                if user_turns >= self.config.preserve_recent_turns {
                    return index;
                }
            }
        }
        0
    }

    /// Compress `history` into a rolling summary plus preserved recent turns.
    ///
    /// Fires `context.overflow` before and `context.summarize` after through
    /// the interceptor chain. When there is nothing to compress (too few
    /// turns), the history is returned unchanged with the prior summary.
    pub async fn compress(
        &self,
        cancel: &CancelToken,
        provider: &Arc<dyn ChatModel>,
        chain: &InterceptorChain,
        model: Option<&str>,
        history: Vec<Message>,
        prior_summary: Option<&str>,
    ) -> Result<Compression> {
        let estimated = self.estimate(history.iter());
        let cut = self.split_point(&history);

        if cut == 0 {
            return Ok(Compression {
                summary: prior_summary.unwrap_or_default().to_string(),
                preserved: history,
                estimated_tokens: estimated,
            });
        }

        let limit = self.window_for(model);
        let mut overflow = HookEvent::new(EventType::ContextOverflow, "context")
            .with_metadata(keys::ESTIMATED_TOKENS, json!(estimated))
            .with_metadata(keys::CONTEXT_LIMIT, json!(limit));
        chain.emit(cancel, &mut overflow).await;

        let prefix = &history[..cut];
        let preserved: Vec<Message> = history[cut..].to_vec();

        let mut transcript = String::new();
        if let Some(summary) = prior_summary {
            if !summary.is_empty() {
                transcript.push_str("Summary of the conversation so far:\n");
                transcript.push_str(summary);
                transcript.push_str("\n\n");
            }
        }
        transcript.push_str("Conversation to fold into the summary:\n");
        for message in prefix {
            transcript.push_str(&format!("{:?}: {}\n", message.role, message.content));
        }

        let request = ChatRequest::new(vec![
            Message::system(
                "You summarize conversations. Produce a compact summary that preserves \
                 facts, decisions, names, numbers, and open questions. Respond with the \
                 summary only.",
            ),
            Message::user(transcript),
        ])
        .with_temperature(0.0)
        .with_max_tokens(self.config.summary_max_tokens);
        let request = match model {
            Some(model) => request.with_model(model),
            None => request,
        };

        let response = provider.chat(cancel, request).await?;
        let summary = response.content.trim().to_string();

        debug!(
            summary_len = summary.len(),
            preserved = preserved.len(),
            "context compressed"
        );

        let mut summarized = HookEvent::new(EventType::ContextSummarize, "context")
            .with_metadata(keys::ESTIMATED_TOKENS, json!(estimated))
            .with_metadata(keys::CONTEXT_LIMIT, json!(limit))
            .with_metadata(keys::SUMMARY_LENGTH, json!(summary.len()))
            .with_metadata(keys::PRESERVED_MESSAGES, json!(preserved.len()));
        chain.emit(cancel, &mut summarized).await;

        Ok(Compression {
            summary,
            preserved,
            estimated_tokens: estimated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatResponse;
    use async_trait::async_trait;

    struct FixedSummarizer;

    #[async_trait]
    impl ChatModel for FixedSummarizer {
        fn name(&self) -> &str {
            "summarizer"
        }

        async fn chat(&self, _cancel: &CancelToken, request: ChatRequest) -> Result<ChatResponse> {
            // The summarization request pins temperature to zero.
            assert_eq!(request.temperature, Some(0.0));
            Ok(ChatResponse::text("the summary"))
        }
    }

    fn turns(n: usize) -> Vec<Message> {
        let mut history = Vec::new();
        for i in 0..n {
            history.push(Message::user(format!("user message number {}", i)));
            history.push(Message::assistant(format!("assistant reply number {}", i)));
        }
        history
    }

    #[test]
    fn test_estimate_counts_chars_and_overhead() {
        let manager = ContextManager::default();
        // 40 chars / 4.0 = 10, + 4 message overhead + 3 framing.
        let message = Message::user("a".repeat(40));
        assert_eq!(manager.estimate([&message]), 17);
    }

    #[test]
    fn test_window_table_prefix_match() {
        let manager = ContextManager::default();
        assert_eq!(manager.window_for(Some("gpt-4o-mini")), 128_000);
        assert_eq!(manager.window_for(Some("gpt-4")), 8_192);
        assert_eq!(manager.window_for(Some("claude-3-5-sonnet-latest")), 200_000);
        assert_eq!(manager.window_for(Some("something-unknown")), FALLBACK_WINDOW);
        assert_eq!(manager.window_for(None), FALLBACK_WINDOW);
    }

    #[test]
    fn test_override_beats_table() {
        let manager = ContextManager::new(ContextConfig::default().with_context_limit(100));
        assert_eq!(manager.window_for(Some("gpt-4o")), 100);
    }

    #[test]
    fn test_should_compress_threshold() {
        let manager = ContextManager::new(
            ContextConfig::default()
                .with_context_limit(100)
                .with_threshold(0.8),
        );

        // Small history fits.
        assert!(!manager.should_compress(None, &[], &turns(1)));
        // Large history overflows floor(100 * 0.8) = 80 tokens.
        assert!(manager.should_compress(None, &[], &turns(6)));
    }

    #[test]
    fn test_split_preserves_recent_user_turns() {
        let manager =
            ContextManager::new(ContextConfig::default().with_preserve_recent_turns(1));
        let history = turns(3); // u0 a0 u1 a1 u2 a2

        let cut = manager.split_point(&history);
        assert_eq!(cut, 4); // last user turn at index 4

        let manager =
            ContextManager::new(ContextConfig::default().with_preserve_recent_turns(2));
        assert_eq!(manager.split_point(&history), 2);
    }

    #[tokio::test]
    async fn test_compress_produces_summary_and_tail() {
        let manager = ContextManager::new(
            ContextConfig::default()
                .with_context_limit(100)
                .with_preserve_recent_turns(1),
        );
        let provider: Arc<dyn ChatModel> = Arc::new(FixedSummarizer);
        let chain = InterceptorChain::new();
        let cancel = CancelToken::new();

        let compression = manager
            .compress(&cancel, &provider, &chain, None, turns(3), Some("earlier"))
            .await
            .unwrap();

        assert_eq!(compression.summary, "the summary");
        // Last user turn plus the reply after it.
        assert_eq!(compression.preserved.len(), 2);
        assert!(compression.preserved[0].is_user());
    }

    #[tokio::test]
    async fn test_compress_with_too_few_turns_is_noop() {
        let manager =
            ContextManager::new(ContextConfig::default().with_preserve_recent_turns(5));
        let provider: Arc<dyn ChatModel> = Arc::new(FixedSummarizer);
        let chain = InterceptorChain::new();
        let cancel = CancelToken::new();

        let history = turns(2);
        let compression = manager
            .compress(&cancel, &provider, &chain, None, history.clone(), Some("prior"))
            .await
            .unwrap();

        assert_eq!(compression.summary, "prior");
        assert_eq!(compression.preserved.len(), history.len());
    }

    #[tokio::test]
    async fn test_compress_emits_context_events() {
        use crate::interceptor::LoggingInterceptor;

        let logger = Arc::new(LoggingInterceptor::new());
        let chain = InterceptorChain::new().with(logger.clone());
        let manager = ContextManager::new(
            ContextConfig::default()
                .with_context_limit(100)
                .with_preserve_recent_turns(1),
        );
        let provider: Arc<dyn ChatModel> = Arc::new(FixedSummarizer);
        let cancel = CancelToken::new();

        manager
            .compress(&cancel, &provider, &chain, None, turns(3), None)
            .await
            .unwrap();

        let kinds: Vec<String> = logger.events().iter().map(|e| e.event_type.clone()).collect();
        assert!(kinds.contains(&"context.overflow".to_string()));
        assert!(kinds.contains(&"context.summarize".to_string()));
    }
}
