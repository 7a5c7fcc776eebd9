// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! History compression under token-budget pressure
//!
//! The trigger looks at the usage of the latest assistant message created
//! after the last compression point. Compressing replaces the leading part
//! of the history with one synthetic summary message.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::ConversationConfig;
use crate::error::{Result, TandemError};
use crate::llm::capabilities::ModelCapabilities;
use crate::session::model::{MessageRole, Session, SessionMessage};
use crate::session::store::SessionStore;

/// Produces the text of a compression summary
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[SessionMessage]) -> Result<String>;
}

/// Deterministic excerpt of each summarized message
#[derive(Debug, Clone)]
pub struct TranscriptSummarizer {
    max_chars_per_message: usize,
}

impl Default for TranscriptSummarizer {
    fn default() -> Self {
        Self {
            max_chars_per_message: 200,
        }
    }
}

impl TranscriptSummarizer {
    /// Excerpt length per message
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars_per_message = max_chars;
        self
    }
}

#[async_trait]
impl Summarizer for TranscriptSummarizer {
    async fn summarize(&self, messages: &[SessionMessage]) -> Result<String> {
        let mut summary = String::from("Summary of the earlier conversation:\n");
        for message in messages {
            let text = message.text();
            let tools: Vec<&str> = message
                .tool_calls()
                .map(|call| call.tool_name.as_str())
                .collect();
            if text.trim().is_empty() && tools.is_empty() {
                continue;
            }

            let mut line: String = text
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(self.max_chars_per_message)
                .collect();
            if !tools.is_empty() {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(&format!("[tools: {}]", tools.join(", ")));
            }
            let role = if message.summary {
                "summary".to_string()
            } else {
                message.role.to_string()
            };
            summary.push_str(&format!("- {}: {}\n", role, line));
        }
        Ok(summary)
    }
}

/// What a compression call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOutcome {
    /// History was replaced: `summarized` messages became one summary
    Compressed { summarized: usize, retained: usize },
    /// History too short for the retention window to remove anything
    NotNeeded,
}

/// Decides when and how to shrink a session's history
#[derive(Clone)]
pub struct CompressionPolicy {
    config: ConversationConfig,
    summarizer: Arc<dyn Summarizer>,
}

impl std::fmt::Debug for CompressionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionPolicy")
            .field("config", &self.config)
            .finish()
    }
}

impl CompressionPolicy {
    /// Create a policy using the transcript summarizer
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            config,
            summarizer: Arc::new(TranscriptSummarizer::default()),
        }
    }

    /// Replace the summarizer
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Token count above which compression triggers
    pub fn token_limit(&self, caps: &ModelCapabilities) -> f64 {
        let usable = caps
            .max_context_length
            .saturating_sub(self.config.output_reserve_tokens);
        usable as f64 * self.config.compression_threshold
    }

    /// Messages kept verbatim out of `total`
    pub fn retained_count(&self, total: usize) -> usize {
        // Nudge past representation error so 0.3 * 10 floors to 3
        (self.config.preserve_threshold * total as f64 + 1e-9).floor() as usize
    }

    /// Whether the latest assistant turn overflowed the budget
    pub fn should_compress(
        &self,
        session: &Session,
        messages: &[SessionMessage],
        caps: &ModelCapabilities,
    ) -> bool {
        if !self.config.compression_enabled {
            return false;
        }

        let latest = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant && !m.summary);
        let Some(latest) = latest else {
            return false;
        };
        if let Some(compressed_at) = session.compressed_at {
            if latest.created_at <= compressed_at {
                return false;
            }
        }
        let Some(usage) = latest.token_usage else {
            return false;
        };

        let total = usage.total_tokens();
        let limit = self.token_limit(caps);
        let overflow = total as f64 > limit;
        tracing::trace!(
            target: "tandem.session.compression",
            session_id = %session.id,
            total,
            limit,
            overflow,
            "Evaluated compression trigger"
        );
        overflow
    }

    /// Replace the leading history with a summary message.
    ///
    /// Failures leave the stored history untouched.
    pub async fn compress(
        &self,
        store: &dyn SessionStore,
        session_id: &str,
    ) -> Result<CompressionOutcome> {
        let messages = store.messages(session_id).await?;
        let total = messages.len();
        let retained = self.retained_count(total);
        if retained == 0 || retained >= total {
            tracing::debug!(
                target: "tandem.session.compression",
                session_id,
                total,
                retained,
                "History too short to compress"
            );
            return Ok(CompressionOutcome::NotNeeded);
        }

        let split = total - retained;
        let (prefix, tail) = messages.split_at(split);
        let text = self
            .summarizer
            .summarize(prefix)
            .await
            .map_err(|e| TandemError::Compression(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(TandemError::Compression("summarizer returned no text".into()));
        }

        let mut summary = SessionMessage::summary(session_id, text);
        if let Some(last) = prefix.last() {
            summary.created_at = last.created_at;
            summary.completed_at = Some(last.created_at);
        }

        let mut compacted = Vec::with_capacity(retained + 1);
        compacted.push(summary);
        compacted.extend_from_slice(tail);
        store.replace_messages(session_id, compacted).await?;

        let now = Utc::now();
        store
            .update_session(
                session_id,
                Box::new(move |session| {
                    session.compressed = true;
                    session.compressed_at = Some(now);
                }),
            )
            .await?;

        tracing::info!(
            target: "tandem.session.compression",
            session_id,
            summarized = split,
            retained,
            "Compressed session history"
        );
        Ok(CompressionOutcome::Compressed {
            summarized: split,
            retained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::Usage;
    use crate::session::model::Part;
    use crate::session::store::MemorySessionStore;

    fn config() -> ConversationConfig {
        ConversationConfig {
            compression_enabled: true,
            compression_threshold: 0.9,
            preserve_threshold: 0.3,
            output_reserve_tokens: 100,
        }
    }

    fn caps(max_context_length: u32) -> ModelCapabilities {
        ModelCapabilities {
            max_context_length,
            ..ModelCapabilities::conservative()
        }
    }

    fn assistant_with_usage(session_id: &str, total: u32) -> SessionMessage {
        let mut message = SessionMessage::assistant(session_id);
        message.parts.push(Part::text("answer"));
        message.token_usage = Some(Usage {
            input_tokens: total,
            ..Default::default()
        });
        message
    }

    async fn seeded_store(n: usize, last_total: u32) -> MemorySessionStore {
        let store = MemorySessionStore::new();
        store.get_or_create_session("s1", "p", "m").await.unwrap();
        for i in 0..n {
            let message = if i % 2 == 0 {
                let mut m = SessionMessage::user("s1");
                m.parts.push(Part::text(format!("question {}", i)));
                m
            } else {
                assistant_with_usage("s1", last_total)
            };
            store.append_message(message).await.unwrap();
        }
        store
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _messages: &[SessionMessage]) -> Result<String> {
            Err(TandemError::Compression("model unavailable".into()))
        }
    }

    // ===== Trigger Tests =====

    #[test]
    fn test_token_limit() {
        let policy = CompressionPolicy::new(config());
        assert!((policy.token_limit(&caps(1000)) - 810.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trigger_above_limit() {
        let store = seeded_store(4, 820).await;
        let policy = CompressionPolicy::new(config());
        let session = store.get_session("s1").await.unwrap().unwrap();
        let messages = store.messages("s1").await.unwrap();
        assert!(policy.should_compress(&session, &messages, &caps(1000)));
    }

    #[tokio::test]
    async fn test_no_trigger_at_limit() {
        let store = seeded_store(4, 810).await;
        let policy = CompressionPolicy::new(config());
        let session = store.get_session("s1").await.unwrap().unwrap();
        let messages = store.messages("s1").await.unwrap();
        assert!(!policy.should_compress(&session, &messages, &caps(1000)));
    }

    #[tokio::test]
    async fn test_disabled_never_triggers() {
        let store = seeded_store(4, 5000).await;
        let policy = CompressionPolicy::new(ConversationConfig {
            compression_enabled: false,
            ..config()
        });
        let session = store.get_session("s1").await.unwrap().unwrap();
        let messages = store.messages("s1").await.unwrap();
        assert!(!policy.should_compress(&session, &messages, &caps(1000)));
    }

    #[test]
    fn test_no_assistant_message_never_triggers() {
        let policy = CompressionPolicy::new(config());
        let session = Session::new("s1", "p", "m");
        assert!(!policy.should_compress(&session, &[SessionMessage::user("s1")], &caps(1000)));
    }

    // ===== Compression Tests =====

    #[tokio::test]
    async fn test_compress_retains_tail() {
        let store = seeded_store(10, 820).await;
        let original = store.messages("s1").await.unwrap();
        let policy = CompressionPolicy::new(config());

        let outcome = policy.compress(&store, "s1").await.unwrap();
        assert_eq!(
            outcome,
            CompressionOutcome::Compressed {
                summarized: 7,
                retained: 3
            }
        );

        let messages = store.messages("s1").await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].summary);
        assert!(messages[0].text().contains("question 0"));
        assert_eq!(messages[1..], original[7..]);

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert!(session.compressed);
        assert!(session.compressed_at.is_some());
    }

    #[tokio::test]
    async fn test_compress_is_idempotent() {
        let store = seeded_store(10, 820).await;
        let policy = CompressionPolicy::new(config());
        policy.compress(&store, "s1").await.unwrap();

        let session = store.get_session("s1").await.unwrap().unwrap();
        let messages = store.messages("s1").await.unwrap();
        // The overflowing assistant message predates the compression point
        assert!(!policy.should_compress(&session, &messages, &caps(1000)));
    }

    #[tokio::test]
    async fn test_short_history_not_compressed() {
        let store = seeded_store(3, 820).await;
        let policy = CompressionPolicy::new(config());
        assert_eq!(
            policy.compress(&store, "s1").await.unwrap(),
            CompressionOutcome::NotNeeded
        );
        assert_eq!(store.messages("s1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_summarizer_failure_leaves_history() {
        let store = seeded_store(10, 820).await;
        let policy = CompressionPolicy::new(config()).with_summarizer(Arc::new(FailingSummarizer));

        let err = policy.compress(&store, "s1").await.unwrap_err();
        assert!(matches!(err, TandemError::Compression(_)));
        assert_eq!(store.messages("s1").await.unwrap().len(), 10);
        assert!(!store.get_session("s1").await.unwrap().unwrap().compressed);
    }

    #[tokio::test]
    async fn test_transcript_summarizer_mentions_tools() {
        use crate::session::model::{PartKind, ToolCallPart};
        let mut message = SessionMessage::assistant("s1");
        message.push_part(PartKind::ToolCall(ToolCallPart::new(
            "c1",
            "grep",
            serde_json::json!({}),
        )));
        let text = TranscriptSummarizer::default()
            .summarize(&[message])
            .await
            .unwrap();
        assert!(text.contains("[tools: grep]"));
    }
}
