// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system for Tandem
//!
//! The orchestrator never implements tools itself. It sees a
//! [`ToolCatalogue`] that lists definitions and executes calls by name;
//! [`ToolRegistry`] is the in-process catalogue hosts register tools into.

pub mod definition;
pub mod filter;
pub mod permission;

pub use definition::SchemaBuilder;
pub use filter::{ToolCompatibility, ToolFilter};
pub use permission::{is_file_change_tool, ToolCategory, ToolPermissions};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ToolExecutionError;
use crate::llm::provider::ToolDefinition;

/// Result of a tool invocation
pub type ToolResult = std::result::Result<ToolOutput, ToolExecutionError>;

/// Context provided to tools during execution
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    /// Session the call belongs to
    pub session_id: String,
    /// Assistant message carrying the call
    pub message_id: Uuid,
    /// Provider-assigned call id
    pub call_id: String,
    /// Current working directory
    pub working_directory: PathBuf,
    /// Fires when the turn is cancelled
    pub cancel: CancellationToken,
}

impl ToolExecutionContext {
    /// Create a new tool context
    pub fn new(
        session_id: impl Into<String>,
        message_id: Uuid,
        call_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id,
            call_id: call_id.into(),
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            cancel,
        }
    }

    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = dir;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Successful tool output
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolOutput {
    /// Short human-readable title for display
    pub title: Option<String>,
    /// Text handed back to the model
    pub output: String,
    /// Structured data for the host
    pub metadata: Value,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            title: None,
            output: output.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Source of tool definitions and executor of tool calls
#[async_trait]
pub trait ToolCatalogue: Send + Sync {
    /// Every tool known to the host, in a stable order
    fn all_tools(&self) -> Vec<ToolDefinition>;

    /// Name a call is recorded, filtered and executed under
    fn canonical_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Run one call to completion
    async fn execute(&self, name: &str, input: Value, ctx: &ToolExecutionContext) -> ToolResult;
}

/// A single tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool definition for the LLM
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with given input
    async fn execute(&self, input: Value, ctx: &ToolExecutionContext) -> ToolResult;
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Aliases mapping alternate names to canonical tool names
    aliases: HashMap<String, String>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that understands common alternate names
    pub fn with_default_aliases() -> Self {
        let mut registry = Self::new();
        for (alias, target) in [
            ("read_file", "read"),
            ("cat", "read"),
            ("write_file", "write"),
            ("edit_file", "edit"),
            ("bash", "shell"),
            ("run", "shell"),
            ("command", "shell"),
            ("find", "glob"),
        ] {
            registry.aliases.insert(alias.to_string(), target.to_string());
        }
        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register an alternate name for a tool
    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    /// Resolve a tool name, following an alias when the name itself is not registered
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        if self.tools.contains_key(name) {
            return name;
        }
        match self.aliases.get(name) {
            Some(target) if self.tools.contains_key(target) => target.as_str(),
            _ => name,
        }
    }

    /// Get a tool by name or alias
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(self.resolve_alias(name))
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolCatalogue for ToolRegistry {
    fn all_tools(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    fn canonical_name(&self, name: &str) -> String {
        self.resolve_alias(name).to_string()
    }

    async fn execute(&self, name: &str, input: Value, ctx: &ToolExecutionContext) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(target: "tandem.tools", tool = name, "call to unknown tool");
            return Err(ToolExecutionError::new(name, "unknown tool"));
        };
        if ctx.is_cancelled() {
            return Err(ToolExecutionError::new(name, "cancelled"));
        }
        tracing::debug!(
            target: "tandem.tools",
            tool = tool.name(),
            call_id = %ctx.call_id,
            "executing tool"
        );
        tool.execute(input, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            SchemaBuilder::new()
                .string("text", "Text to echo", true)
                .into_tool("echo", "Echo the input")
        }

        async fn execute(&self, input: Value, _ctx: &ToolExecutionContext) -> ToolResult {
            let text = input["text"]
                .as_str()
                .ok_or_else(|| ToolExecutionError::new("echo", "missing text"))?;
            Ok(ToolOutput::text(text).with_title("echo"))
        }
    }

    struct ReadTool;

    #[async_trait]
    impl Tool for ReadTool {
        fn name(&self) -> &str {
            "read"
        }

        fn definition(&self) -> ToolDefinition {
            SchemaBuilder::new()
                .string("path", "File path", true)
                .into_tool("read", "Read a file")
        }

        async fn execute(&self, _input: Value, _ctx: &ToolExecutionContext) -> ToolResult {
            Ok(ToolOutput::text("contents"))
        }
    }

    fn ctx() -> ToolExecutionContext {
        ToolExecutionContext::new("ses_1", Uuid::now_v7(), "call_1", CancellationToken::new())
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::with_default_aliases();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(ReadTool));
        registry
    }

    // ===== Registry Tests =====

    #[test]
    fn test_all_tools_sorted() {
        let names: Vec<String> = registry().all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "read"]);
    }

    #[test]
    fn test_alias_resolution() {
        let registry = registry();
        assert_eq!(registry.resolve_alias("cat"), "read");
        assert!(registry.get("read_file").is_some());
        // Alias to an unregistered tool stays unresolved
        assert_eq!(registry.resolve_alias("bash"), "bash");
        assert!(registry.get("bash").is_none());
    }

    #[test]
    fn test_canonical_name_follows_alias() {
        let registry = registry();
        assert_eq!(registry.canonical_name("read_file"), "read");
        assert_eq!(registry.canonical_name("echo"), "echo");
        assert_eq!(registry.canonical_name("teleport"), "teleport");
    }

    #[test]
    fn test_custom_alias() {
        let mut registry = ToolRegistry::new().with_alias("say", "echo");
        registry.register(Arc::new(EchoTool));
        assert_eq!(registry.get("say").map(|t| t.name()), Some("echo"));
        assert_eq!(registry.len(), 1);
    }

    // ===== Execution Tests =====

    #[tokio::test]
    async fn test_execute_known_tool() {
        let output = registry()
            .execute("echo", serde_json::json!({"text": "hi"}), &ctx())
            .await
            .unwrap();
        assert_eq!(output.output, "hi");
        assert_eq!(output.title.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let err = registry()
            .execute("nope", Value::Null, &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.tool_name, "nope");
        assert_eq!(err.message, "unknown tool");
    }

    #[tokio::test]
    async fn test_execute_tool_error() {
        let err = registry()
            .execute("echo", serde_json::json!({}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.message, "missing text");
    }

    #[tokio::test]
    async fn test_execute_after_cancel() {
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = registry()
            .execute("echo", serde_json::json!({"text": "hi"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.message, "cancelled");
    }
}
