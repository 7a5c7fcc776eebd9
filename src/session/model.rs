// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session, message and part records
//!
//! These are the durable shapes persisted by a `SessionStore`. Provider
//! messages are derived from them per turn and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, TandemError};
use crate::llm::provider::Usage;

/// Maximum title length in characters
const TITLE_MAX_CHARS: usize = 100;

/// A durable conversation bound to a provider/model pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Caller-chosen identifier
    pub id: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Provider used for turns
    pub provider_id: String,
    /// Model used for turns
    pub model_id: String,
    /// Whether history has ever been compressed
    #[serde(default)]
    pub compressed: bool,
    /// Most recent compression point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_at: Option<DateTime<Utc>>,
    /// Accumulated usage over all turns
    #[serde(default)]
    pub token_usage: Usage,
    /// Revert recorded but not yet applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_revert: Option<RevertRecord>,
    /// Short title, taken from the first user text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Session {
    /// Create a new session record
    pub fn new(
        id: impl Into<String>,
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            compressed: false,
            compressed_at: None,
            token_usage: Usage::default(),
            pending_revert: None,
            title: None,
        }
    }

    /// Update the last mutation timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set the title, truncated to a display-friendly length
    pub fn set_title(&mut self, title: &str) {
        let title = title.trim();
        self.title = Some(if title.chars().count() > TITLE_MAX_CHARS {
            let head: String = title.chars().take(TITLE_MAX_CHARS - 3).collect();
            format!("{}...", head)
        } else {
            title.to_string()
        });
    }
}

/// Who authored a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A stored turn and its parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Time-ordered identifier
    pub id: Uuid,
    /// Owning session
    pub session_id: String,
    pub role: MessageRole,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Estimated USD cost of producing this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    /// Usage of the final provider step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<Usage>,
    /// Terminal provider error, if the turn failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Synthetic compression summary
    #[serde(default)]
    pub summary: bool,
    pub parts: Vec<Part>,
}

impl SessionMessage {
    fn with_role(session_id: &str, role: MessageRole) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id: session_id.to_string(),
            role,
            created_at: Utc::now(),
            completed_at: None,
            cost_estimate: None,
            token_usage: None,
            error: None,
            summary: false,
            parts: Vec::new(),
        }
    }

    /// Empty user message
    pub fn user(session_id: &str) -> Self {
        Self::with_role(session_id, MessageRole::User)
    }

    /// Empty assistant message
    pub fn assistant(session_id: &str) -> Self {
        Self::with_role(session_id, MessageRole::Assistant)
    }

    /// Synthetic summary standing in for compressed history
    pub fn summary(session_id: &str, text: impl Into<String>) -> Self {
        let mut message = Self::with_role(session_id, MessageRole::User);
        message.summary = true;
        message.completed_at = Some(message.created_at);
        message.parts.push(Part::synthetic_text(text));
        message
    }

    /// Append a part, returning its id
    pub fn push_part(&mut self, kind: PartKind) -> Uuid {
        let part = Part::new(kind);
        let id = part.id;
        self.parts.push(part);
        id
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match &part.kind {
                PartKind::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-call parts in order
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|part| match &part.kind {
            PartKind::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Mutable access to the tool call with `call_id`
    pub fn tool_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCallPart> {
        self.parts.iter_mut().find_map(|part| match &mut part.kind {
            PartKind::ToolCall(call) if call.call_id == call_id => Some(call),
            _ => None,
        })
    }

    /// Index of the part with `part_id`
    pub fn part_index(&self, part_id: Uuid) -> Option<usize> {
        self.parts.iter().position(|part| part.id == part_id)
    }
}

/// A content unit owned by one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: Uuid,
    pub kind: PartKind,
}

impl Part {
    /// Create a part with a fresh id
    pub fn new(kind: PartKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
        }
    }

    /// Operator- or model-authored text
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PartKind::Text {
            text: text.into(),
            synthetic: false,
        })
    }

    /// System-authored text
    pub fn synthetic_text(text: impl Into<String>) -> Self {
        Self::new(PartKind::Text {
            text: text.into(),
            synthetic: true,
        })
    }

    /// Step start marker with an optional filesystem snapshot
    pub fn step_start(snapshot: Option<String>) -> Self {
        Self::new(PartKind::StepBoundary {
            kind: StepKind::Start,
            token_usage: None,
            snapshot,
        })
    }

    /// Step finish marker carrying that step's usage
    pub fn step_finish(usage: Usage) -> Self {
        Self::new(PartKind::StepBoundary {
            kind: StepKind::Finish,
            token_usage: Some(usage),
            snapshot: None,
        })
    }
}

/// Part payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartKind {
    Text {
        text: String,
        #[serde(default)]
        synthetic: bool,
    },
    ToolCall(ToolCallPart),
    File {
        url: String,
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
    StepBoundary {
        kind: StepKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<String>,
    },
}

/// Step boundary kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Start,
    Finish,
}

/// Lifecycle state of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    Running,
    Completed,
    Errored,
}

impl ToolCallState {
    /// Whether the call has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolCallState::Completed | ToolCallState::Errored)
    }
}

impl std::fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ToolCallState::Pending => "pending",
            ToolCallState::Running => "running",
            ToolCallState::Completed => "completed",
            ToolCallState::Errored => "errored",
        };
        write!(f, "{}", name)
    }
}

/// A model-requested tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    /// Provider correlation id
    pub call_id: String,
    pub tool_name: String,
    pub state: ToolCallState,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolCallPart {
    /// A freshly requested call
    pub fn new(call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: ToolCallState::Pending,
            input,
            output: None,
            error: None,
            title: None,
            metadata: Value::Null,
            started_at: None,
            finished_at: None,
        }
    }

    fn transition(&mut self, from: ToolCallState, to: ToolCallState) -> Result<()> {
        if self.state != from {
            return Err(TandemError::InvalidState(format!(
                "tool call {} cannot move from {} to {}",
                self.call_id, self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Pending → Running
    pub fn start(&mut self) -> Result<()> {
        self.transition(ToolCallState::Pending, ToolCallState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Completed
    pub fn complete(
        &mut self,
        title: Option<String>,
        output: impl Into<String>,
        metadata: Value,
    ) -> Result<()> {
        self.transition(ToolCallState::Running, ToolCallState::Completed)?;
        self.title = title;
        self.output = Some(output.into());
        self.metadata = metadata;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Errored; the stored error is never empty
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(ToolCallState::Running, ToolCallState::Errored)?;
        let error = error.into();
        self.error = Some(if error.trim().is_empty() {
            format!("{} failed", self.tool_name)
        } else {
            error
        });
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// A recorded, not yet applied rewind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertRecord {
    pub session_id: String,
    /// First message to remove
    pub target_message_id: Uuid,
    /// First part to remove inside the target message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_part_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    /// Workspace state at the time of the revert request
    pub pre_revert_snapshot_id: String,
    /// Snapshot restored when the revert is applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_snapshot_id: Option<String>,
    pub reverted_message_count: usize,
    pub reverted_file_change_count: usize,
}
