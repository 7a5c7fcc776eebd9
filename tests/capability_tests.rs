// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Capability-driven request shaping, observed at the provider boundary

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use tandem::chat::{ChatInput, SessionOrchestrator};
use tandem::llm::mock_provider::MockProvider;
use tandem::llm::{ContentBlock, MessageContent, ModelFamily, ProviderCapabilityRegistry, Role};
use tandem::session::MemorySessionStore;
use tandem::tools::{
    SchemaBuilder, Tool, ToolExecutionContext, ToolFilter, ToolOutput, ToolPermissions,
    ToolRegistry, ToolResult,
};

struct StubTool {
    name: &'static str,
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }

    fn definition(&self) -> tandem::llm::ToolDefinition {
        SchemaBuilder::new()
            .string("path", "Target path", true)
            .optional_with_default("limit", "Maximum lines", "integer", json!(200))
            .string_with_format("since", "Only changes after", "date-time", false)
            .into_tool(self.name, "Stub tool")
    }

    async fn execute(&self, _input: Value, _ctx: &ToolExecutionContext) -> ToolResult {
        Ok(ToolOutput::text(format!("{} ok", self.name)))
    }
}

fn catalogue() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for name in ["read", "edit", "multi_edit", "patch", "shell"] {
        registry.register(Arc::new(StubTool { name }));
    }
    Arc::new(registry)
}

fn orchestrator_for(provider_id: &str, provider: MockProvider) -> SessionOrchestrator {
    SessionOrchestrator::builder(Arc::new(MemorySessionStore::new()))
        .with_provider_as(provider_id, Arc::new(provider))
        .with_catalogue(catalogue())
        .build()
        .unwrap()
}

fn tool_names(tools: &[tandem::llm::ToolDefinition]) -> Vec<&str> {
    tools.iter().map(|t| t.name.as_str()).collect()
}

// ===== Tool Filter Tests =====

#[test]
fn test_qwen_withholds_structured_edit_tools() {
    let filter = ToolFilter::new(catalogue(), Arc::new(ProviderCapabilityRegistry::new()));
    let tools =
        filter.get_tools_for_provider("ollama", "qwen2.5-coder:7b", &ToolPermissions::all());
    assert_eq!(tool_names(&tools), vec!["edit", "read", "shell"]);

    let compat = filter.compatibility("multi_edit", "ollama", "qwen2.5-coder:7b");
    assert!(!compat.compatible);
    assert_eq!(compat.suggested_alternative.as_deref(), Some("edit"));
    assert!(compat.warnings[0].contains("qwen"));
}

#[test]
fn test_reasoning_model_wildcard_ignores_permissions() {
    let filter = ToolFilter::new(catalogue(), Arc::new(ProviderCapabilityRegistry::new()));
    for permissions in [
        ToolPermissions::all(),
        ToolPermissions::read_only(),
        ToolPermissions::none(),
    ] {
        assert!(filter
            .get_tools_for_provider("openai", "o1-preview", &permissions)
            .is_empty());
    }
}

#[test]
fn test_same_catalogue_unfiltered_for_claude() {
    let filter = ToolFilter::new(catalogue(), Arc::new(ProviderCapabilityRegistry::new()));
    let tools = filter.get_tools_for_provider(
        "anthropic",
        "claude-sonnet-4-20250514",
        &ToolPermissions::all(),
    );
    assert_eq!(tools.len(), 5);
    assert!(filter
        .compatibility("multi_edit", "anthropic", "claude-sonnet-4-20250514")
        .compatible);
}

#[test]
fn test_permissions_and_model_filters_compose() {
    let filter = ToolFilter::new(catalogue(), Arc::new(ProviderCapabilityRegistry::new()));
    let permissions = ToolPermissions {
        shell: false,
        ..ToolPermissions::all()
    };
    let tools = filter.get_tools_for_provider("ollama", "llama3.1:8b", &permissions);
    assert_eq!(tool_names(&tools), vec!["edit", "read"]);
}

// ===== Request Shaping Tests =====

#[tokio::test]
async fn test_qwen_request_omits_withheld_tools() {
    let provider = MockProvider::new();
    let orch = orchestrator_for("ollama", provider.clone());

    orch.chat(ChatInput::text("s1", "refactor").with_model("ollama", "qwen2.5-coder:7b"))
        .await
        .unwrap();

    let request = provider.last_request().unwrap();
    let names = tool_names(&request.tools);
    assert!(!names.contains(&"multi_edit"));
    assert!(!names.contains(&"patch"));
    assert!(names.contains(&"edit"));
    // Qwen sampling defaults
    assert_eq!(request.parameters.temperature, Some(0.55));
    assert_eq!(request.parameters.top_p, Some(1.0));
}

#[tokio::test]
async fn test_reasoning_model_gets_no_tools() {
    let provider = MockProvider::new();
    let orch = orchestrator_for("openai", provider.clone());

    orch.chat(ChatInput::text("s1", "think").with_model("openai", "o1-preview"))
        .await
        .unwrap();

    let request = provider.last_request().unwrap();
    assert!(request.tools.is_empty());
    assert_eq!(request.parameters.temperature, Some(1.0));
}

#[tokio::test]
async fn test_openai_schemas_make_defaults_nullable() {
    let provider = MockProvider::new();
    let orch = orchestrator_for("openai", provider.clone());

    orch.chat(ChatInput::text("s1", "hi").with_model("openai", "gpt-4o"))
        .await
        .unwrap();

    let request = provider.last_request().unwrap();
    let read = request.tools.iter().find(|t| t.name == "read").unwrap();
    assert!(read.input_schema.required.contains(&"limit".to_string()));
    assert_eq!(
        read.input_schema.properties["limit"]["type"],
        json!(["integer", "null"])
    );
    assert!(read.input_schema.properties["limit"].get("default").is_none());
}

#[tokio::test]
async fn test_anthropic_ids_sanitized_and_cache_marked() {
    let provider = MockProvider::new().with_turns(vec![
        MockProvider::tool_turn("call:1/read", "read", json!({"path": "a.rs"})),
        MockProvider::text_turn("done", MockProvider::default_usage()),
    ]);
    let orch = orchestrator_for("anthropic", provider.clone());

    let outcome = orch
        .chat(ChatInput::text("s1", "read a.rs").with_model("anthropic", "claude-sonnet-4"))
        .await
        .unwrap();
    assert_eq!(outcome.steps, 2);

    let request = provider.last_request().unwrap();
    let ids: Vec<&str> = request
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Blocks(blocks) => Some(blocks),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["call_1_read", "call_1_read"]);

    // System prompt and the tail carry cache breakpoints
    assert_eq!(request.messages[0].role, Role::System);
    assert!(request.messages[0].cache_control.is_some());
    assert!(request.messages.last().unwrap().cache_control.is_some());

    // The stored call keeps the provider's original id
    let messages = orch.store().messages("s1").await.unwrap();
    assert_eq!(
        messages[1].tool_calls().next().unwrap().call_id,
        "call:1/read"
    );
}

#[test]
fn test_unknown_model_is_conservative() {
    let registry = ProviderCapabilityRegistry::new();
    let caps = registry.capabilities("local", "my-finetune");
    assert_eq!(caps.model_family, ModelFamily::Unknown);
    assert_eq!(caps.max_context_length, 32_768);
    assert!(caps.supports_tool_calls);
    assert!(!registry.disabled_tools("local", "my-finetune").is_wildcard());
}
