// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation context from stored history
//!
//! Stored messages keep every step of an assistant turn in one record.
//! Providers expect the alternating shape instead: assistant text and tool
//! uses, then a user message with the matching tool results, per step.

use crate::llm::message::{ContentBlock, ImageSource, Message};
use crate::session::model::{MessageRole, PartKind, SessionMessage, StepKind, ToolCallState};

/// Map stored history into provider-neutral messages.
///
/// Calls that never reached a terminal state are left out so every tool use
/// sent to a provider has a result.
pub fn build_context(history: &[SessionMessage]) -> Vec<Message> {
    let mut context = Vec::with_capacity(history.len());
    for message in history {
        match message.role {
            MessageRole::User => {
                if let Some(user) = user_message(message) {
                    context.push(user);
                }
            }
            MessageRole::Assistant => context.extend(assistant_messages(message)),
        }
    }
    context
}

fn user_message(message: &SessionMessage) -> Option<Message> {
    let blocks: Vec<ContentBlock> = message
        .parts
        .iter()
        .filter_map(|part| match &part.kind {
            PartKind::Text { text, .. } if !text.is_empty() => Some(ContentBlock::text(text)),
            PartKind::File {
                url,
                mime,
                filename,
                ..
            } => Some(file_block(url, mime, filename.as_deref())),
            _ => None,
        })
        .collect();

    match blocks.as_slice() {
        [] => None,
        [ContentBlock::Text { text }] => Some(Message::user(text.clone())),
        _ => Some(Message::user_blocks(blocks)),
    }
}

fn file_block(url: &str, mime: &str, filename: Option<&str>) -> ContentBlock {
    if !mime.starts_with("image/") {
        return ContentBlock::text(format!("[File: {} ({})]", filename.unwrap_or(url), mime));
    }
    let source = match url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        Some((media_type, data)) => ImageSource {
            source_type: "base64".to_string(),
            media_type: media_type.to_string(),
            data: data.to_string(),
        },
        None => ImageSource {
            source_type: "url".to_string(),
            media_type: mime.to_string(),
            data: url.to_string(),
        },
    };
    ContentBlock::Image { source }
}

#[derive(Default)]
struct Step {
    assistant: Vec<ContentBlock>,
    results: Vec<ContentBlock>,
}

impl Step {
    fn flush(&mut self, out: &mut Vec<Message>) {
        let step = std::mem::take(self);
        if !step.assistant.is_empty() {
            out.push(Message::assistant_blocks(step.assistant));
        }
        if !step.results.is_empty() {
            out.push(Message::user_blocks(step.results));
        }
    }
}

fn assistant_messages(message: &SessionMessage) -> Vec<Message> {
    let mut out = Vec::new();
    let mut step = Step::default();

    for part in &message.parts {
        match &part.kind {
            PartKind::StepBoundary {
                kind: StepKind::Start,
                ..
            } => step.flush(&mut out),
            PartKind::Text { text, .. } if !text.is_empty() => {
                step.assistant.push(ContentBlock::text(text));
            }
            PartKind::ToolCall(call) if call.state.is_terminal() => {
                step.assistant.push(ContentBlock::ToolUse {
                    id: call.call_id.clone(),
                    name: call.tool_name.clone(),
                    input: call.input.clone(),
                });
                let (content, is_error) = match call.state {
                    ToolCallState::Completed => (call.output.clone().unwrap_or_default(), false),
                    _ => (
                        call.error
                            .clone()
                            .unwrap_or_else(|| format!("{} failed", call.tool_name)),
                        true,
                    ),
                };
                step.results
                    .push(ContentBlock::tool_result(&call.call_id, content, is_error));
            }
            _ => {}
        }
    }
    step.flush(&mut out);
    out
}
