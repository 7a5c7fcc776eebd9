// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model capability detection
//!
//! Capabilities are inferred from model identifier patterns. Identifiers
//! routed through aggregators (`openai/o1-preview`) are matched on their
//! last path segment.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Providers that honor prompt-cache breakpoints for Claude-family models
const CACHING_PROVIDERS: &[&str] = &["anthropic", "openrouter", "bedrock", "vertex"];

/// Broad model family used to pick defaults and transformation rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Claude,
    Gpt,
    /// o1/o3/o4-style reasoning-only models
    Reasoning,
    Gemini,
    Qwen,
    DeepSeek,
    Llama,
    Mistral,
    Unknown,
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelFamily::Claude => "claude",
            ModelFamily::Gpt => "gpt",
            ModelFamily::Reasoning => "reasoning",
            ModelFamily::Gemini => "gemini",
            ModelFamily::Qwen => "qwen",
            ModelFamily::DeepSeek => "deepseek",
            ModelFamily::Llama => "llama",
            ModelFamily::Mistral => "mistral",
            ModelFamily::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Facts about what a (provider, model) pair can do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Maximum context window in tokens
    pub max_context_length: u32,
    /// Maximum output tokens
    pub max_output_tokens: u32,
    /// Whether the model supports tool use
    pub supports_tool_calls: bool,
    /// Whether the model supports image input
    pub supports_images: bool,
    /// Whether prompt-cache breakpoints are honored
    pub supports_caching: bool,
    /// Detected family
    pub model_family: ModelFamily,
    /// Recommended sampling temperature
    pub optimal_temperature: f32,
    /// Recommended nucleus sampling, if the family wants one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal_top_p: Option<f32>,
    /// Input cost per 1K tokens (USD)
    #[serde(default)]
    pub input_cost_per_1k: f64,
    /// Output cost per 1K tokens (USD)
    #[serde(default)]
    pub output_cost_per_1k: f64,
}

impl ModelCapabilities {
    /// Conservative profile for unrecognized models
    pub fn conservative() -> Self {
        Self {
            max_context_length: 32_768,
            max_output_tokens: 4_096,
            supports_tool_calls: true,
            supports_images: false,
            supports_caching: false,
            model_family: ModelFamily::Unknown,
            optimal_temperature: 0.7,
            optimal_top_p: None,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        }
    }

    /// Estimated USD cost for a usage record
    pub fn estimate_cost(&self, usage: &crate::llm::provider::Usage) -> f64 {
        let input = usage.input_tokens as f64
            + usage.cache_creation_input_tokens as f64
            + usage.cache_read_input_tokens as f64;
        (input / 1000.0) * self.input_cost_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

fn reasoning_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^o[1-9](-|$)").expect("static regex is valid"))
}

/// Classify a model identifier into a family
pub fn detect_family(model_id: &str) -> ModelFamily {
    let id = model_id.to_lowercase();
    let base = id.rsplit('/').next().unwrap_or(&id);

    if reasoning_pattern().is_match(base) {
        ModelFamily::Reasoning
    } else if base.contains("claude") {
        ModelFamily::Claude
    } else if base.contains("gpt") {
        ModelFamily::Gpt
    } else if base.contains("gemini") {
        ModelFamily::Gemini
    } else if base.contains("qwen") {
        ModelFamily::Qwen
    } else if base.contains("deepseek") {
        ModelFamily::DeepSeek
    } else if base.contains("llama") {
        ModelFamily::Llama
    } else if base.contains("mistral") || base.contains("codestral") || base.contains("mixtral")
    {
        ModelFamily::Mistral
    } else {
        ModelFamily::Unknown
    }
}

/// Infer capabilities for a (provider, model) pair
pub fn detect_capabilities(provider_id: &str, model_id: &str) -> ModelCapabilities {
    let id = model_id.to_lowercase();
    let family = detect_family(model_id);
    let base = ModelCapabilities::conservative();

    match family {
        ModelFamily::Claude => {
            let (input, output) = if id.contains("opus") {
                (0.015, 0.075)
            } else if id.contains("haiku") {
                (0.0008, 0.004)
            } else {
                (0.003, 0.015)
            };
            ModelCapabilities {
                max_context_length: 200_000,
                max_output_tokens: 8_192,
                supports_images: true,
                supports_caching: CACHING_PROVIDERS.contains(&provider_id),
                model_family: family,
                optimal_temperature: 0.0,
                input_cost_per_1k: input,
                output_cost_per_1k: output,
                ..base
            }
        }
        ModelFamily::Gpt => {
            let (context, output) = if id.contains("gpt-3.5") {
                (16_385, 4_096)
            } else if id.contains("4o") || id.contains("turbo") || id.contains("4.1") {
                (128_000, 16_384)
            } else if id.contains("gpt-4") {
                (8_192, 4_096)
            } else {
                (128_000, 16_384)
            };
            ModelCapabilities {
                max_context_length: context,
                max_output_tokens: output,
                supports_images: id.contains("4o")
                    || id.contains("turbo")
                    || id.contains("vision")
                    || id.contains("4.1"),
                model_family: family,
                optimal_temperature: 0.0,
                input_cost_per_1k: 0.0025,
                output_cost_per_1k: 0.01,
                ..base
            }
        }
        ModelFamily::Reasoning => ModelCapabilities {
            max_context_length: 128_000,
            max_output_tokens: 32_768,
            supports_tool_calls: false,
            model_family: family,
            optimal_temperature: 1.0,
            input_cost_per_1k: 0.015,
            output_cost_per_1k: 0.06,
            ..base
        },
        ModelFamily::Gemini => ModelCapabilities {
            max_context_length: 1_048_576,
            max_output_tokens: 8_192,
            supports_images: true,
            model_family: family,
            optimal_temperature: 0.0,
            ..base
        },
        ModelFamily::Qwen => ModelCapabilities {
            max_context_length: if id.contains("2.5") || id.contains("qwen3") {
                131_072
            } else {
                32_768
            },
            max_output_tokens: 8_192,
            supports_images: id.contains("vl"),
            model_family: family,
            optimal_temperature: 0.55,
            optimal_top_p: Some(1.0),
            ..base
        },
        ModelFamily::DeepSeek => ModelCapabilities {
            max_context_length: 64_000,
            max_output_tokens: 8_192,
            supports_tool_calls: !(id.contains("reasoner") || id.contains("r1")),
            model_family: family,
            optimal_temperature: 0.0,
            ..base
        },
        ModelFamily::Llama => ModelCapabilities {
            max_context_length: 128_000,
            supports_images: id.contains("vision"),
            model_family: family,
            optimal_temperature: 0.3,
            ..base
        },
        ModelFamily::Mistral => ModelCapabilities {
            max_context_length: if id.contains("codestral") {
                256_000
            } else {
                32_000
            },
            model_family: family,
            optimal_temperature: 0.3,
            ..base
        },
        ModelFamily::Unknown => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Family detection Tests =====

    #[test]
    fn test_detect_family_basic() {
        assert_eq!(detect_family("claude-3-5-sonnet-20241022"), ModelFamily::Claude);
        assert_eq!(detect_family("gpt-4o"), ModelFamily::Gpt);
        assert_eq!(detect_family("gemini-1.5-pro"), ModelFamily::Gemini);
        assert_eq!(detect_family("qwen2.5-coder:14b"), ModelFamily::Qwen);
        assert_eq!(detect_family("deepseek-chat"), ModelFamily::DeepSeek);
        assert_eq!(detect_family("llama3.1:8b"), ModelFamily::Llama);
        assert_eq!(detect_family("codestral-latest"), ModelFamily::Mistral);
        assert_eq!(detect_family("my-local-model"), ModelFamily::Unknown);
    }

    #[test]
    fn test_detect_family_reasoning() {
        assert_eq!(detect_family("o1-preview"), ModelFamily::Reasoning);
        assert_eq!(detect_family("o1"), ModelFamily::Reasoning);
        assert_eq!(detect_family("o3-mini"), ModelFamily::Reasoning);
        assert_eq!(detect_family("openai/o1-mini"), ModelFamily::Reasoning);
        // "o1" inside another name is not a reasoning model
        assert_eq!(detect_family("solo1-chat"), ModelFamily::Unknown);
    }

    #[test]
    fn test_detect_family_case_insensitive() {
        assert_eq!(detect_family("Claude-3-Opus"), ModelFamily::Claude);
        assert_eq!(detect_family("GPT-4-Turbo"), ModelFamily::Gpt);
    }

    #[test]
    fn test_detect_family_aggregator_prefix() {
        assert_eq!(
            detect_family("anthropic/claude-3.5-sonnet"),
            ModelFamily::Claude
        );
        assert_eq!(
            detect_family("qwen/qwen-2.5-coder-32b-instruct"),
            ModelFamily::Qwen
        );
    }

    // ===== Capability Tests =====

    #[test]
    fn test_claude_caching_depends_on_provider() {
        let direct = detect_capabilities("anthropic", "claude-3-5-sonnet");
        assert!(direct.supports_caching);
        assert!(direct.supports_tool_calls);
        assert_eq!(direct.max_context_length, 200_000);
        assert_eq!(direct.optimal_temperature, 0.0);

        let other = detect_capabilities("some-proxy", "claude-3-5-sonnet");
        assert!(!other.supports_caching);
    }

    #[test]
    fn test_reasoning_profile() {
        let caps = detect_capabilities("openai", "o1-preview");
        assert!(!caps.supports_tool_calls);
        assert_eq!(caps.optimal_temperature, 1.0);
        assert_eq!(caps.model_family, ModelFamily::Reasoning);
    }

    #[test]
    fn test_qwen_sampling() {
        let caps = detect_capabilities("ollama", "qwen2.5-coder:7b");
        assert_eq!(caps.optimal_temperature, 0.55);
        assert_eq!(caps.optimal_top_p, Some(1.0));
        assert_eq!(caps.max_context_length, 131_072);
    }

    #[test]
    fn test_gpt_context_variants() {
        assert_eq!(
            detect_capabilities("openai", "gpt-4o").max_context_length,
            128_000
        );
        assert_eq!(
            detect_capabilities("openai", "gpt-4").max_context_length,
            8_192
        );
        assert_eq!(
            detect_capabilities("openai", "gpt-3.5-turbo").max_context_length,
            16_385
        );
        assert!(detect_capabilities("openai", "gpt-4o").supports_images);
    }

    #[test]
    fn test_deepseek_reasoner_has_no_tools() {
        assert!(detect_capabilities("deepseek", "deepseek-chat").supports_tool_calls);
        assert!(!detect_capabilities("deepseek", "deepseek-reasoner").supports_tool_calls);
    }

    #[test]
    fn test_unknown_is_conservative() {
        let caps = detect_capabilities("local", "my-model");
        assert_eq!(caps, ModelCapabilities::conservative());
        assert!(!caps.supports_caching);
        assert!(!caps.supports_images);
    }

    #[test]
    fn test_estimate_cost() {
        let caps = detect_capabilities("anthropic", "claude-3-5-sonnet");
        let usage = crate::llm::provider::Usage {
            input_tokens: 1000,
            output_tokens: 1000,
            ..Default::default()
        };
        let cost = caps.estimate_cost(&usage);
        assert!((cost - 0.018).abs() < 1e-9);
    }
}
