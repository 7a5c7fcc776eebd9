// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM Provider trait and related types
//!
//! Defines the streaming boundary every backend implements. Vendor clients
//! live outside this crate; the orchestrator only sees `ProviderEvent`s.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::message::Message;

/// Stream of events produced by one provider call
pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// Main trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "anthropic", "openai")
    fn name(&self) -> &str;

    /// Open a streaming chat call.
    ///
    /// Implementations must stop producing events once `cancel` fires.
    /// Failures after the stream is open are reported as
    /// `ProviderEvent::Error`, not as an `Err`.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStream>;
}

/// Request for a streaming chat call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,

    /// Messages in the conversation, system messages first
    pub messages: Vec<Message>,

    /// Tools available for the model to use
    pub tools: Vec<ToolDefinition>,

    /// Sampling parameters derived from model capabilities
    pub parameters: SamplingParameters,
}

/// Sampling parameters for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    /// Maximum tokens in response
    pub max_tokens: u32,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            top_p: None,
            max_tokens: 8192,
        }
    }
}

/// Events from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Start of message
    Start,

    /// Incremental assistant text
    TextDelta(String),

    /// The model requests a tool invocation
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Result of a provider-executed tool call
    ToolCallResult { id: String, output: String },

    /// Terminal failure
    Error(String),

    /// End of message
    Finish { usage: Usage, reason: FinishReason },
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Wants to use a tool
    ToolUse,
    /// Stop sequence hit
    StopSequence,
    /// Stopped by operator cancellation
    Cancelled,
    /// Stopped by a provider error
    Error,
    /// Stream ended without a finish event
    Unknown,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Cache creation tokens (if caching enabled)
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
    /// Cache read tokens (if caching enabled)
    #[serde(default)]
    pub cache_read_input_tokens: u32,
}

impl Usage {
    /// Total tokens the call occupied: input, output and both cache counters
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_creation_input_tokens)
            .saturating_add(self.cache_read_input_tokens)
    }

    /// Field-wise accumulate another usage record
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema)
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: vec![],
            parameters: SamplingParameters::default(),
        }
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Set sampling parameters
    pub fn with_parameters(mut self, parameters: SamplingParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::Message;

    // ===== ChatRequest Tests =====

    #[test]
    fn test_chat_request_new() {
        let request = ChatRequest::new("claude-3", vec![Message::user("Hello")]);

        assert_eq!(request.model, "claude-3");
        assert_eq!(request.messages.len(), 1);
        assert!(request.tools.is_empty());
        assert_eq!(request.parameters, SamplingParameters::default());
    }

    #[test]
    fn test_chat_request_chained() {
        let params = SamplingParameters {
            temperature: Some(0.0),
            top_p: Some(1.0),
            max_tokens: 2048,
        };
        let tools = vec![ToolDefinition {
            name: "read".to_string(),
            description: "Read a file".to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::json!({}),
                required: vec![],
            },
        }];
        let request = ChatRequest::new("gpt-4o", vec![])
            .with_tools(tools)
            .with_parameters(params.clone());

        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.parameters, params);
    }

    // ===== Usage Tests =====

    #[test]
    fn test_usage_total_counts_cache() {
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 50,
            cache_creation_input_tokens: 25,
            cache_read_input_tokens: 10,
        };
        assert_eq!(usage.total_tokens(), 185);
    }

    #[test]
    fn test_usage_default() {
        assert_eq!(Usage::default().total_tokens(), 0);
    }

    #[test]
    fn test_usage_accumulate() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_input_tokens: 1,
            cache_read_input_tokens: 2,
        });
        total.accumulate(&Usage {
            input_tokens: 20,
            output_tokens: 5,
            ..Default::default()
        });
        assert_eq!(total.input_tokens, 30);
        assert_eq!(total.output_tokens, 10);
        assert_eq!(total.cache_creation_input_tokens, 1);
        assert_eq!(total.cache_read_input_tokens, 2);
    }

    #[test]
    fn test_usage_saturates() {
        let usage = Usage {
            input_tokens: u32::MAX,
            output_tokens: 1,
            ..Default::default()
        };
        assert_eq!(usage.total_tokens(), u32::MAX);
    }

    // ===== FinishReason Tests =====

    #[test]
    fn test_finish_reason_serde() {
        let json = serde_json::to_string(&FinishReason::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
        let back: FinishReason = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(back, FinishReason::Cancelled);
    }

    // ===== ToolInputSchema Tests =====

    #[test]
    fn test_tool_input_schema_skips_empty_required() {
        let schema = ToolInputSchema {
            schema_type: "object".to_string(),
            properties: serde_json::json!({}),
            required: vec![],
        };
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "object");
        assert!(json.get("required").is_none());
    }
}
