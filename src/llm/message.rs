// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider-neutral message types
//!
//! Stored session history is mapped into these structures before the
//! capability registry adapts them for a concrete provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message in a provider request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique identifier for the message
    pub id: Uuid,

    /// Role of the message sender
    pub role: Role,

    /// Content of the message
    pub content: MessageContent,

    /// When the message was created
    pub timestamp: DateTime<Utc>,

    /// Prompt-cache marker (set by the capability registry only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message (also carries tool results)
    User,
    /// Assistant response
    Assistant,
    /// System prompt
    System,
}

/// Content of a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multiple content blocks (text, image, tool use, tool result)
    Blocks(Vec<ContentBlock>),
}

/// A block of content within a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Image content
    Image { source: ImageSource },

    /// Tool use request from assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool result from user
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Source of an image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String, // "url" or "base64"
    pub media_type: String, // "image/png", "image/jpeg", etc.
    pub data: String,       // url or base64 payload
}

/// Prompt caching marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub cache_type: String,
}

impl CacheControl {
    /// Anthropic-style ephemeral cache breakpoint
    pub fn ephemeral() -> Self {
        Self {
            cache_type: "ephemeral".to_string(),
        }
    }
}

impl Message {
    fn with_content(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            cache_control: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_content(Role::User, MessageContent::Text(content.into()))
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_content(Role::Assistant, MessageContent::Text(content.into()))
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_content(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a new user message with content blocks
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::User, MessageContent::Blocks(blocks))
    }

    /// Create a new assistant message with content blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::Assistant, MessageContent::Blocks(blocks))
    }

    /// Create a tool result message
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::user_blocks(vec![ContentBlock::tool_result(
            tool_use_id,
            content,
            is_error,
        )])
    }

    /// All text blocks joined, or the plain text content
    pub fn text(&self) -> Option<String> {
        match &self.content {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join(""))
                }
            }
        }
    }

    /// Get all tool use blocks from the message
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.blocks_matching(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    /// Get all tool result blocks from the message
    pub fn tool_results(&self) -> Vec<&ContentBlock> {
        self.blocks_matching(|block| matches!(block, ContentBlock::ToolResult { .. }))
    }

    fn blocks_matching(&self, predicate: impl Fn(&ContentBlock) -> bool) -> Vec<&ContentBlock> {
        match &self.content {
            MessageContent::Text(_) => vec![],
            MessageContent::Blocks(blocks) => blocks.iter().filter(|b| predicate(b)).collect(),
        }
    }

    /// Check if message has any tool use
    pub fn has_tool_use(&self) -> bool {
        !self.tool_uses().is_empty()
    }

    /// Whether the message carries nothing a provider could use
    pub fn is_empty(&self) -> bool {
        match &self.content {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Create a tool result block
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: if is_error { Some(true) } else { None },
        }
    }
}

impl MessageContent {
    /// Convert content to blocks format
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        }
    }

    /// Get as text if it's a simple text content
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Message constructor Tests =====

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), Some("Hello".to_string()));
        assert!(msg.cache_control.is_none());
    }

    #[test]
    fn test_message_system() {
        let msg = Message::system("You are helpful");
        assert_eq!(msg.role, Role::System);
        assert_eq!(msg.content.as_text(), Some("You are helpful"));
    }

    #[test]
    fn test_message_tool_result_error_flag() {
        let ok = Message::tool_result("call_1", "done", false);
        let err = Message::tool_result("call_2", "boom", true);

        match &ok.content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { is_error, .. } => assert!(is_error.is_none()),
                _ => panic!("Expected ToolResult"),
            },
            _ => panic!("Expected blocks"),
        }
        match &err.content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult { is_error, .. } => assert_eq!(*is_error, Some(true)),
                _ => panic!("Expected ToolResult"),
            },
            _ => panic!("Expected blocks"),
        }
    }

    #[test]
    fn test_text_joins_blocks() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::text("Hello, "),
            ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "read".into(),
                input: serde_json::json!({}),
            },
            ContentBlock::text("world"),
        ]);
        assert_eq!(msg.text(), Some("Hello, world".to_string()));
        assert!(msg.has_tool_use());
        assert_eq!(msg.tool_uses().len(), 1);
    }

    #[test]
    fn test_text_none_without_text_blocks() {
        let msg = Message::tool_result("call_1", "ok", false);
        assert!(msg.text().is_none());
        assert_eq!(msg.tool_results().len(), 1);
    }

    #[test]
    fn test_is_empty() {
        assert!(Message::user("").is_empty());
        assert!(Message::assistant_blocks(vec![]).is_empty());
        assert!(!Message::user("x").is_empty());
    }

    // ===== Serialization Tests =====

    #[test]
    fn test_content_block_serde_tag() {
        let block = ContentBlock::tool_result("call_1", "ok", true);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["is_error"], true);
    }

    #[test]
    fn test_cache_control_serialization() {
        let mut msg = Message::user("cached");
        msg.cache_control = Some(CacheControl::ephemeral());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["cache_control"]["type"], "ephemeral");

        let plain = serde_json::to_value(Message::user("plain")).unwrap();
        assert!(plain.get("cache_control").is_none());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn test_into_blocks() {
        let blocks = MessageContent::Text("hi".into()).into_blocks();
        assert_eq!(blocks, vec![ContentBlock::text("hi")]);
    }
}
