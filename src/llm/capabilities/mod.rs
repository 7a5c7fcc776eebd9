// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider capability registry
//!
//! Answers "what can this (provider, model) do" and adapts messages,
//! tool schemas and sampling parameters for it. Everything here is pure;
//! the registry only holds explicit overrides.

pub mod detect;
pub mod messages;
pub mod policy;
pub mod schema;

pub use detect::{detect_capabilities, detect_family, ModelCapabilities, ModelFamily};
pub use messages::{sanitize_tool_call_id, ToolCallIdPolicy};
pub use policy::DisabledTools;
pub use schema::SchemaRule;

use std::collections::HashMap;

use crate::llm::message::Message;
use crate::llm::provider::{SamplingParameters, ToolDefinition};

/// Registry of model capabilities with optional per-model overrides
#[derive(Debug, Clone, Default)]
pub struct ProviderCapabilityRegistry {
    overrides: HashMap<(String, String), ModelCapabilities>,
}

impl ProviderCapabilityRegistry {
    /// Create a registry that relies on pattern detection only
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin capabilities for one (provider, model) pair
    pub fn with_override(
        mut self,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        caps: ModelCapabilities,
    ) -> Self {
        self.overrides
            .insert((provider_id.into(), model_id.into()), caps);
        self
    }

    /// Capabilities for a (provider, model) pair; never fails
    pub fn capabilities(&self, provider_id: &str, model_id: &str) -> ModelCapabilities {
        if let Some(caps) = self
            .overrides
            .get(&(provider_id.to_string(), model_id.to_string()))
        {
            return caps.clone();
        }
        let caps = detect_capabilities(provider_id, model_id);
        tracing::trace!(
            target: "tandem.llm.capabilities",
            provider = provider_id,
            model = model_id,
            family = %caps.model_family,
            "Detected model capabilities"
        );
        caps
    }

    /// Adapt messages for a destination
    pub fn transform_messages(
        &self,
        provider_id: &str,
        model_id: &str,
        messages: Vec<Message>,
    ) -> Vec<Message> {
        let caps = self.capabilities(provider_id, model_id);
        messages::transform_messages(provider_id, &caps, messages)
    }

    /// Adapt tool schemas for a destination
    pub fn transform_tools(
        &self,
        provider_id: &str,
        model_id: &str,
        tools: &[ToolDefinition],
    ) -> Vec<ToolDefinition> {
        let caps = self.capabilities(provider_id, model_id);
        let rules = schema::schema_rules(provider_id, caps.model_family);
        tools
            .iter()
            .map(|tool| schema::transform_tool(tool, &rules))
            .collect()
    }

    /// Tools withheld for a destination
    pub fn disabled_tools(&self, provider_id: &str, model_id: &str) -> DisabledTools {
        policy::disabled_tools(&self.capabilities(provider_id, model_id))
    }

    /// Whether one tool is withheld for a destination
    pub fn is_tool_disabled(&self, tool_name: &str, provider_id: &str, model_id: &str) -> bool {
        self.disabled_tools(provider_id, model_id)
            .contains(tool_name)
    }

    /// Why a tool is withheld, if it is
    pub fn disabled_reason(
        &self,
        tool_name: &str,
        provider_id: &str,
        model_id: &str,
    ) -> Option<String> {
        policy::disabled_reason(tool_name, &self.capabilities(provider_id, model_id))
    }

    /// Recommended sampling parameters for a destination
    pub fn optimal_parameters(&self, provider_id: &str, model_id: &str) -> SamplingParameters {
        policy::optimal_parameters(&self.capabilities(provider_id, model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let custom = ModelCapabilities {
            max_context_length: 1_000,
            ..ModelCapabilities::conservative()
        };
        let registry =
            ProviderCapabilityRegistry::new().with_override("mock", "tiny", custom.clone());

        assert_eq!(registry.capabilities("mock", "tiny"), custom);
        // Other models still use detection
        assert_eq!(
            registry.capabilities("mock", "claude-3-haiku").model_family,
            ModelFamily::Claude
        );
    }

    #[test]
    fn test_capabilities_are_stable() {
        let registry = ProviderCapabilityRegistry::new();
        assert_eq!(
            registry.capabilities("openai", "gpt-4o"),
            registry.capabilities("openai", "gpt-4o")
        );
    }

    #[test]
    fn test_is_tool_disabled() {
        let registry = ProviderCapabilityRegistry::new();
        assert!(registry.is_tool_disabled("read", "openai", "o1-preview"));
        assert!(!registry.is_tool_disabled("read", "anthropic", "claude-3-5-sonnet"));
    }

    #[test]
    fn test_transform_tools_for_gemini() {
        let registry = ProviderCapabilityRegistry::new();
        let tool = ToolDefinition {
            name: "fetch".to_string(),
            description: "Fetch a URL".to_string(),
            input_schema: crate::llm::provider::ToolInputSchema {
                schema_type: "object".to_string(),
                properties: serde_json::json!({"url": {"type": "string", "format": "uri"}}),
                required: vec!["url".to_string()],
            },
        };
        let out = registry.transform_tools("google", "gemini-1.5-pro", &[tool]);
        assert!(out[0].input_schema.properties["url"].get("format").is_none());
    }
}
