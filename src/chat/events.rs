// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn lifecycle events
//!
//! Everything a caller can observe about a running turn arrives as a
//! [`ChatEvent`]. Plain `chat` calls discard them; `chat_stream` hands them
//! out over a bounded channel.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::llm::provider::{FinishReason, Usage};
use crate::session::model::ToolCallState;

/// Where a turn is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Locking,
    Compressing,
    Prompting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnState::Completed | TurnState::Errored | TurnState::Cancelled
        )
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Locking => "locking",
            TurnState::Compressing => "compressing",
            TurnState::Prompting => "prompting",
            TurnState::Streaming => "streaming",
            TurnState::Completed => "completed",
            TurnState::Errored => "errored",
            TurnState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Observable turn event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    StateChanged {
        state: TurnState,
    },
    /// The session was busy and this request is waiting
    Queued {
        position: usize,
    },
    /// A pending revert was applied before the turn
    RevertApplied {
        reverted_message_count: usize,
    },
    Compressed {
        summarized: usize,
        retained: usize,
    },
    /// Non-fatal problem the operator may want to see
    Warning {
        message: String,
    },
    Start {
        message_id: Uuid,
    },
    TextStart {
        part_id: Uuid,
    },
    TextDelta {
        part_id: Uuid,
        text: String,
    },
    TextEnd {
        part_id: Uuid,
    },
    ToolCallStart {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        state: ToolCallState,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Terminal provider failure for the current step
    Error {
        message: String,
    },
    Finish {
        usage: Usage,
        reason: FinishReason,
    },
}

/// Optional destination for turn events
///
/// Sends wait for channel capacity, so a slow consumer slows the turn
/// instead of growing a buffer. A dropped receiver silences the sink.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ChatEvent>>,
}

impl EventSink {
    /// Sink that discards everything
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn state(&self, state: TurnState) {
        self.emit(ChatEvent::StateChanged { state }).await;
    }
}
