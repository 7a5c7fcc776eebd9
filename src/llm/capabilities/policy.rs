// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-family tool policy and sampling defaults

use std::collections::BTreeSet;

use crate::llm::capabilities::detect::{ModelCapabilities, ModelFamily};
use crate::llm::provider::SamplingParameters;

/// Share of the context window a single response may use
const RESPONSE_BUDGET_FRACTION: f64 = 0.25;

/// Tools a model family should not be offered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledTools {
    /// Every tool is offered
    None,
    /// No tool is offered (wildcard)
    All,
    /// Only the named tools are withheld
    Only(BTreeSet<String>),
}

impl DisabledTools {
    /// Whether `tool` is withheld
    pub fn contains(&self, tool: &str) -> bool {
        match self {
            DisabledTools::None => false,
            DisabledTools::All => true,
            DisabledTools::Only(names) => names.contains(tool),
        }
    }

    /// Whether this is the wildcard
    pub fn is_wildcard(&self) -> bool {
        matches!(self, DisabledTools::All)
    }

    fn only(names: &[&str]) -> Self {
        DisabledTools::Only(names.iter().map(|n| n.to_string()).collect())
    }
}

impl std::fmt::Display for DisabledTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisabledTools::None => write!(f, "none"),
            DisabledTools::All => write!(f, "all"),
            DisabledTools::Only(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "{}", names.join(", "))
            }
        }
    }
}

/// Tools withheld for a model
///
/// Weaker open-weight families get structured multi-file edit tools removed;
/// families without tool-call support get the wildcard.
pub fn disabled_tools(caps: &ModelCapabilities) -> DisabledTools {
    if !caps.supports_tool_calls {
        return DisabledTools::All;
    }
    match caps.model_family {
        ModelFamily::Qwen => DisabledTools::only(&["multi_edit", "patch"]),
        ModelFamily::Llama => DisabledTools::only(&["multi_edit", "patch", "todo_write"]),
        ModelFamily::Mistral => DisabledTools::only(&["multi_edit"]),
        ModelFamily::Gemini => DisabledTools::only(&["patch"]),
        _ => DisabledTools::None,
    }
}

/// Human-readable reason a tool is withheld, if it is
pub fn disabled_reason(tool: &str, caps: &ModelCapabilities) -> Option<String> {
    match disabled_tools(caps) {
        DisabledTools::All => Some(format!(
            "{} models do not support tool calls",
            caps.model_family
        )),
        DisabledTools::Only(names) if names.contains(tool) => Some(format!(
            "'{}' is unreliable with {} models",
            tool, caps.model_family
        )),
        _ => None,
    }
}

/// Sampling parameters that suit a model
pub fn optimal_parameters(caps: &ModelCapabilities) -> SamplingParameters {
    let budget = (caps.max_context_length as f64 * RESPONSE_BUDGET_FRACTION) as u32;
    SamplingParameters {
        temperature: Some(caps.optimal_temperature),
        top_p: caps.optimal_top_p,
        max_tokens: caps.max_output_tokens.min(budget).max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::capabilities::detect::detect_capabilities;

    #[test]
    fn test_wildcard_for_reasoning_models() {
        let caps = detect_capabilities("openai", "o1-preview");
        let disabled = disabled_tools(&caps);
        assert!(disabled.is_wildcard());
        assert!(disabled.contains("read"));
        assert!(disabled_reason("read", &caps).is_some());
    }

    #[test]
    fn test_family_specific_withholding() {
        let caps = detect_capabilities("ollama", "qwen2.5-coder:7b");
        let disabled = disabled_tools(&caps);
        assert!(disabled.contains("multi_edit"));
        assert!(!disabled.contains("read"));
        assert!(disabled_reason("read", &caps).is_none());
    }

    #[test]
    fn test_claude_keeps_everything() {
        let caps = detect_capabilities("anthropic", "claude-3-5-sonnet");
        assert_eq!(disabled_tools(&caps), DisabledTools::None);
    }

    #[test]
    fn test_optimal_parameters_budget() {
        let caps = detect_capabilities("anthropic", "claude-3-5-sonnet");
        let params = optimal_parameters(&caps);
        assert_eq!(params.temperature, Some(0.0));
        assert_eq!(params.max_tokens, 8_192);

        // Small window: a quarter of the context wins over max output
        let caps = ModelCapabilities {
            max_context_length: 8_000,
            max_output_tokens: 4_096,
            ..ModelCapabilities::conservative()
        };
        assert_eq!(optimal_parameters(&caps).max_tokens, 2_000);
    }

    #[test]
    fn test_optimal_parameters_top_p() {
        let caps = detect_capabilities("ollama", "qwen2.5-coder:7b");
        let params = optimal_parameters(&caps);
        assert_eq!(params.temperature, Some(0.55));
        assert_eq!(params.top_p, Some(1.0));
    }
}
