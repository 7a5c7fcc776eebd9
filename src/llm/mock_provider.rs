// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Provides a scripted implementation of the LlmProvider trait that can be
//! used in unit and integration tests without making real API calls.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, Result};
use crate::llm::provider::{
    ChatRequest, FinishReason, LlmProvider, ProviderEvent, ProviderStream, Usage,
};

/// A mock LLM provider for testing
#[derive(Clone)]
pub struct MockProvider {
    /// Provider name
    name: String,
    /// Scripted event sequences, one per call
    turns: Arc<Mutex<Vec<Vec<ProviderEvent>>>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<ChatRequest>>>,
    /// Each stream waits for one permit before emitting
    gate: Option<Arc<Semaphore>>,
    /// Keep the stream open after the script until cancelled
    hold_open: bool,
    /// Fail `stream_chat` before a stream exists
    open_error: Option<ProviderError>,
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock provider lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider that answers every call with a short text
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            turns: Arc::new(Mutex::new(vec![Self::text_turn(
                "Mock response",
                Self::default_usage(),
            )])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
            gate: None,
            hold_open: false,
            open_error: None,
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue event sequences (returned in order; the last one repeats)
    pub fn with_turns(self, turns: Vec<Vec<ProviderEvent>>) -> Self {
        *lock_recovering(&self.turns) = turns;
        self
    }

    /// Answer every call with the given text
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_turns(vec![Self::text_turn(text, Self::default_usage())])
    }

    /// Make every stream wait for a permit on `gate` before emitting
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Keep streams open after the scripted events until cancellation
    pub fn holding_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Fail every call before a stream is produced
    pub fn with_open_error(mut self, error: ProviderError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Usage reported by the default scripts
    pub fn default_usage() -> Usage {
        Usage {
            input_tokens: 10,
            output_tokens: 20,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 0,
        }
    }

    /// A complete text-only turn
    pub fn text_turn(text: impl Into<String>, usage: Usage) -> Vec<ProviderEvent> {
        vec![
            ProviderEvent::Start,
            ProviderEvent::TextDelta(text.into()),
            ProviderEvent::Finish {
                usage,
                reason: FinishReason::EndTurn,
            },
        ]
    }

    /// A turn that requests one tool call
    pub fn tool_turn(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Vec<ProviderEvent> {
        vec![
            ProviderEvent::Start,
            ProviderEvent::ToolCall {
                id: id.into(),
                name: name.into(),
                input,
            },
            ProviderEvent::Finish {
                usage: Self::default_usage(),
                reason: FinishReason::ToolUse,
            },
        ]
    }

    /// Get the number of times stream_chat() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock_recovering(&self.recorded_requests).clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<ChatRequest> {
        lock_recovering(&self.recorded_requests).last().cloned()
    }

    fn next_turn(&self) -> Vec<ProviderEvent> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        let turns = lock_recovering(&self.turns);
        if turns.is_empty() {
            Vec::new()
        } else {
            turns[count.min(turns.len() - 1)].clone()
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderStream> {
        lock_recovering(&self.recorded_requests).push(request);

        if let Some(err) = &self.open_error {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            return Err(err.clone().into());
        }

        let events = self.next_turn();
        let gate = self.gate.clone();
        let hold_open = self.hold_open;

        let stream = async_stream::stream! {
            if let Some(gate) = gate {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    permit = gate.acquire_owned() => match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => return,
                    },
                }
            }
            for event in events {
                if cancel.is_cancelled() {
                    return;
                }
                yield event;
            }
            if hold_open {
                cancel.cancelled().await;
            }
        };

        Ok(Box::pin(stream))
    }
}
