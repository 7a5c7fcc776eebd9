// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider-specific message rewriting
//!
//! Tool-call ids are rewritten identically on the `tool_use` and the
//! matching `tool_result` side, so pairing survives sanitization.

use crate::llm::capabilities::detect::{ModelCapabilities, ModelFamily};
use crate::llm::message::{CacheControl, ContentBlock, Message, MessageContent, Role};

/// Maximum cache breakpoints placed on system messages
const CACHED_SYSTEM_MESSAGES: usize = 2;
/// Maximum cache breakpoints placed on the conversation tail
const CACHED_TAIL_MESSAGES: usize = 2;
/// Mistral requires exactly nine alphanumeric characters
const MISTRAL_ID_LENGTH: usize = 9;

/// How tool-call correlation ids must look for a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallIdPolicy {
    /// Ids are sent unchanged
    Passthrough,
    /// Only `[A-Za-z0-9_-]`; everything else becomes `_`
    Sanitized,
    /// Exactly nine ASCII alphanumerics
    Alphanumeric9,
}

/// Pick the id policy for a destination
pub fn id_policy(provider_id: &str, caps: &ModelCapabilities) -> ToolCallIdPolicy {
    if provider_id == "mistral" || caps.model_family == ModelFamily::Mistral {
        ToolCallIdPolicy::Alphanumeric9
    } else if provider_id == "anthropic" || caps.model_family == ModelFamily::Claude {
        ToolCallIdPolicy::Sanitized
    } else {
        ToolCallIdPolicy::Passthrough
    }
}

/// Rewrite one tool-call id under a policy
pub fn sanitize_tool_call_id(id: &str, policy: ToolCallIdPolicy) -> String {
    match policy {
        ToolCallIdPolicy::Passthrough => id.to_string(),
        ToolCallIdPolicy::Sanitized => {
            let cleaned: String = id
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if cleaned.is_empty() {
                "_".to_string()
            } else {
                cleaned
            }
        }
        ToolCallIdPolicy::Alphanumeric9 => {
            let mut cleaned: String = id
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(MISTRAL_ID_LENGTH)
                .collect();
            while cleaned.len() < MISTRAL_ID_LENGTH {
                cleaned.push('0');
            }
            cleaned
        }
    }
}

fn rewrite_ids(message: &mut Message, policy: ToolCallIdPolicy) {
    if policy == ToolCallIdPolicy::Passthrough {
        return;
    }
    if let MessageContent::Blocks(blocks) = &mut message.content {
        for block in blocks.iter_mut() {
            match block {
                ContentBlock::ToolUse { id, .. } => *id = sanitize_tool_call_id(id, policy),
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    *tool_use_id = sanitize_tool_call_id(tool_use_id, policy)
                }
                _ => {}
            }
        }
    }
}

fn strip_empty_text(message: &mut Message) {
    if let MessageContent::Blocks(blocks) = &mut message.content {
        blocks.retain(|block| !matches!(block, ContentBlock::Text { text } if text.is_empty()));
    }
}

/// Mark at most the first two system messages and the last two
/// non-system messages as cache breakpoints.
pub fn apply_cache_control(messages: &mut [Message]) {
    let system_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::System)
        .map(|(i, _)| i)
        .take(CACHED_SYSTEM_MESSAGES)
        .collect();
    let tail_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .rev()
        .filter(|(_, m)| m.role != Role::System)
        .map(|(i, _)| i)
        .take(CACHED_TAIL_MESSAGES)
        .collect();

    for index in system_indices.into_iter().chain(tail_indices) {
        messages[index].cache_control = Some(CacheControl::ephemeral());
    }
}

/// Adapt provider-neutral messages for a destination
pub fn transform_messages(
    provider_id: &str,
    caps: &ModelCapabilities,
    messages: Vec<Message>,
) -> Vec<Message> {
    let policy = id_policy(provider_id, caps);
    let drop_empty = provider_id == "anthropic" || caps.model_family == ModelFamily::Claude;

    let mut transformed: Vec<Message> = messages
        .into_iter()
        .map(|mut message| {
            rewrite_ids(&mut message, policy);
            if drop_empty {
                strip_empty_text(&mut message);
            }
            message
        })
        .filter(|message| !(drop_empty && message.is_empty()))
        .collect();

    if caps.supports_caching {
        apply_cache_control(&mut transformed);
    }
    transformed
}
