// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! A producer task drains the provider stream into a bounded channel; the
//! coordinator consumes it, turns events into parts on the assistant
//! message, runs requested tools to completion and persists as it goes.

use futures::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::events::{ChatEvent, EventSink};
use crate::error::{Result, TandemError, ToolExecutionError};
use crate::llm::provider::{FinishReason, ProviderEvent, ProviderStream, Usage};
use crate::session::model::{Part, PartKind, SessionMessage, ToolCallPart};
use crate::session::store::SessionStore;
use crate::tools::{ToolCatalogue, ToolExecutionContext, ToolResult};

/// Default provider event buffer
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Error recorded on calls to tools the turn did not offer
pub const TOOL_NOT_OFFERED: &str = "tool not available for this model/permissions";

/// Statistics about one streamed step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// Total text characters received
    pub total_text_chars: usize,
    /// Number of text deltas received
    pub text_delta_count: usize,
    /// Number of tool calls requested
    pub tool_call_count: usize,
    /// Number of provider events consumed
    pub event_count: usize,
}

impl StreamStats {
    pub fn update(&mut self, event: &ProviderEvent) {
        self.event_count += 1;
        match event {
            ProviderEvent::TextDelta(text) => {
                self.total_text_chars += text.chars().count();
                self.text_delta_count += 1;
            }
            ProviderEvent::ToolCall { .. } => self.tool_call_count += 1,
            _ => {}
        }
    }
}

/// How one provider step ended
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub usage: Usage,
    pub reason: FinishReason,
    /// Tool calls run to a terminal state during the step
    pub tools_executed: usize,
    /// Terminal provider error
    pub error: Option<String>,
    pub cancelled: bool,
    pub stats: StreamStats,
}

impl StepOutcome {
    /// Whether the model asked for another step
    pub fn wants_continuation(&self) -> bool {
        self.error.is_none()
            && !self.cancelled
            && self.reason == FinishReason::ToolUse
            && self.tools_executed > 0
    }
}

/// Accumulates the open text part across deltas
#[derive(Debug, Default)]
struct TextAccumulator {
    open: Option<usize>,
}

impl TextAccumulator {
    /// Append text, opening a part if needed. Returns the part id and
    /// whether the part was just opened.
    fn push(&mut self, message: &mut SessionMessage, delta: &str) -> (Uuid, bool) {
        let (index, opened) = match self.open {
            Some(index) => (index, false),
            None => {
                message.parts.push(Part::text(""));
                let index = message.parts.len() - 1;
                self.open = Some(index);
                (index, true)
            }
        };
        let part = &mut message.parts[index];
        if let PartKind::Text { text, .. } = &mut part.kind {
            text.push_str(delta);
        }
        (part.id, opened)
    }

    /// Close the open text part, returning its id
    fn close(&mut self, message: &SessionMessage) -> Option<Uuid> {
        self.open
            .take()
            .and_then(|index| message.parts.get(index))
            .map(|part| part.id)
    }
}

fn spawn_producer(
    mut stream: ProviderStream,
    tx: mpsc::Sender<ProviderEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = stream.next() => event,
            };
            let Some(event) = event else {
                break;
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    })
}

fn call_mut<'a>(message: &'a mut SessionMessage, call_id: &str) -> Result<&'a mut ToolCallPart> {
    message
        .tool_call_mut(call_id)
        .ok_or_else(|| TandemError::InvalidState(format!("tool call {} disappeared", call_id)))
}

/// Consumes provider steps for one assistant message
#[derive(Clone)]
pub struct StreamCoordinator {
    store: Arc<dyn SessionStore>,
    catalogue: Arc<dyn ToolCatalogue>,
    events: EventSink,
    buffer: usize,
    working_directory: Option<PathBuf>,
    /// Canonical names the model was offered; `None` accepts any catalogue tool
    offered: Option<HashSet<String>>,
}

impl StreamCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        catalogue: Arc<dyn ToolCatalogue>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            catalogue,
            events,
            buffer: DEFAULT_STREAM_BUFFER,
            working_directory: None,
            offered: None,
        }
    }

    /// Only execute calls to these tools; anything else is recorded as errored
    pub fn with_offered_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.offered = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn is_offered(&self, canonical: &str) -> bool {
        self.offered
            .as_ref()
            .map_or(true, |offered| offered.contains(canonical))
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_working_directory(mut self, dir: Option<PathBuf>) -> Self {
        self.working_directory = dir;
        self
    }

    async fn persist(&self, message: &SessionMessage) -> Result<()> {
        self.store.update_message(message.clone()).await
    }

    /// Consume one provider stream into `message`.
    ///
    /// The message must already be stored. Whatever was produced before an
    /// error or cancellation is persisted before this returns.
    pub async fn run_step(
        &self,
        stream: ProviderStream,
        message: &mut SessionMessage,
        cancel: &CancellationToken,
        snapshot: Option<String>,
    ) -> Result<StepOutcome> {
        let (tx, mut rx) = mpsc::channel(self.buffer);
        let producer = spawn_producer(stream, tx, cancel.clone());

        message.parts.push(Part::step_start(snapshot));
        self.persist(message).await?;

        let mut text = TextAccumulator::default();
        let mut stats = StreamStats::default();
        let mut finish: Option<(Usage, FinishReason)> = None;
        let mut error: Option<String> = None;
        let mut cancelled = false;
        let mut tools_executed = 0;

        let mut failure: Option<TandemError> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                event = rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            stats.update(&event);

            match event {
                ProviderEvent::Start => {
                    self.events
                        .emit(ChatEvent::Start {
                            message_id: message.id,
                        })
                        .await;
                }
                ProviderEvent::TextDelta(delta) => {
                    let (part_id, opened) = text.push(message, &delta);
                    if opened {
                        self.events.emit(ChatEvent::TextStart { part_id }).await;
                    }
                    self.events
                        .emit(ChatEvent::TextDelta {
                            part_id,
                            text: delta,
                        })
                        .await;
                }
                ProviderEvent::ToolCall { id, name, input } => {
                    self.close_text(&mut text, message).await;
                    match self.run_tool(message, id, name, input, cancel).await {
                        Ok(true) => tools_executed += 1,
                        Ok(false) => {}
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                }
                ProviderEvent::ToolCallResult { id, output } => {
                    self.close_text(&mut text, message).await;
                    if let Err(e) = self.record_provider_result(message, id, output).await {
                        failure = Some(e);
                        break;
                    }
                }
                ProviderEvent::Error(message_text) => {
                    self.close_text(&mut text, message).await;
                    error = Some(message_text.clone());
                    self.events
                        .emit(ChatEvent::Error {
                            message: message_text,
                        })
                        .await;
                    break;
                }
                ProviderEvent::Finish { usage, reason } => {
                    self.close_text(&mut text, message).await;
                    finish = Some((usage, reason));
                    self.events.emit(ChatEvent::Finish { usage, reason }).await;
                    break;
                }
            }
        }

        producer.abort();
        self.close_text(&mut text, message).await;

        let (usage, reason) = match (&finish, &error, cancelled) {
            (Some((usage, reason)), _, _) => (*usage, *reason),
            (None, Some(_), _) => (Usage::default(), FinishReason::Error),
            (None, None, true) => (Usage::default(), FinishReason::Cancelled),
            (None, None, false) => (Usage::default(), FinishReason::Unknown),
        };
        message.parts.push(Part::step_finish(usage));
        if let Some(err) = &error {
            message.error = Some(err.clone());
        }
        // Persist partial content even when the loop itself failed
        self.persist(message).await?;
        if let Some(e) = failure {
            return Err(e);
        }

        tracing::debug!(
            target: "tandem.chat.streaming",
            message_id = %message.id,
            events = stats.event_count,
            text_chars = stats.total_text_chars,
            tools = tools_executed,
            ?reason,
            cancelled,
            "Step finished"
        );

        Ok(StepOutcome {
            usage,
            reason,
            tools_executed,
            error,
            cancelled,
            stats,
        })
    }

    async fn close_text(&self, text: &mut TextAccumulator, message: &SessionMessage) {
        if let Some(part_id) = text.close(message) {
            self.events.emit(ChatEvent::TextEnd { part_id }).await;
        }
    }

    /// Run one requested call to a terminal state; returns whether it ran
    async fn run_tool(
        &self,
        message: &mut SessionMessage,
        call_id: String,
        requested_name: String,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if message.tool_calls().any(|call| call.call_id == call_id) {
            tracing::warn!(
                target: "tandem.chat.streaming",
                call_id = %call_id,
                tool = %requested_name,
                "Ignoring duplicate tool call id"
            );
            return Ok(false);
        }

        let tool_name = self.catalogue.canonical_name(&requested_name);
        message.push_part(PartKind::ToolCall(ToolCallPart::new(
            &call_id,
            &tool_name,
            input.clone(),
        )));
        self.persist(message).await?;
        self.events
            .emit(ChatEvent::ToolCallStart {
                call_id: call_id.clone(),
                tool_name: tool_name.clone(),
                input: input.clone(),
            })
            .await;

        call_mut(message, &call_id)?.start()?;
        self.persist(message).await?;

        if !self.is_offered(&tool_name) {
            tracing::warn!(
                target: "tandem.chat.streaming",
                call_id = %call_id,
                tool = %tool_name,
                requested = %requested_name,
                "Refusing call to a tool that was not offered"
            );
            let refused = Err(ToolExecutionError::new(&tool_name, TOOL_NOT_OFFERED));
            return self.finish_tool(message, &call_id, refused).await;
        }

        let mut ctx = ToolExecutionContext::new(
            &message.session_id,
            message.id,
            &call_id,
            cancel.child_token(),
        );
        if let Some(dir) = &self.working_directory {
            ctx = ctx.with_working_directory(dir.clone());
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolExecutionError::new(&tool_name, "cancelled")),
            result = self.catalogue.execute(&tool_name, input, &ctx) => result,
        };

        self.finish_tool(message, &call_id, result).await
    }

    /// Move a running call to its terminal state, persist and announce it
    async fn finish_tool(
        &self,
        message: &mut SessionMessage,
        call_id: &str,
        result: ToolResult,
    ) -> Result<bool> {
        let call = call_mut(message, call_id)?;
        match result {
            Ok(output) => {
                call.complete(output.title, output.output, output.metadata)?;
            }
            Err(err) => {
                tracing::debug!(
                    target: "tandem.chat.streaming",
                    call_id = %call_id,
                    tool = %call.tool_name,
                    error = %err.message,
                    "Tool call failed"
                );
                call.fail(err.message)?;
            }
        }
        let event = ChatEvent::ToolCallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            state: call.state,
            output: call.output.clone(),
            error: call.error.clone(),
        };
        self.persist(message).await?;
        self.events.emit(event).await;
        Ok(true)
    }

    /// Record the result of a call the provider ran itself
    async fn record_provider_result(
        &self,
        message: &mut SessionMessage,
        call_id: String,
        output: String,
    ) -> Result<()> {
        if message.tool_call_mut(&call_id).is_none() {
            message.push_part(PartKind::ToolCall(ToolCallPart::new(
                &call_id,
                "provider",
                serde_json::Value::Null,
            )));
        }
        let call = call_mut(message, &call_id)?;
        if call.state.is_terminal() {
            tracing::debug!(
                target: "tandem.chat.streaming",
                call_id = %call_id,
                "Ignoring provider result for a finished call"
            );
            return Ok(());
        }
        if call.state == crate::session::model::ToolCallState::Pending {
            call.start()?;
        }
        call.complete(None, output, serde_json::Value::Null)?;
        let event = ChatEvent::ToolCallResult {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            state: call.state,
            output: call.output.clone(),
            error: None,
        };
        self.persist(message).await?;
        self.events.emit(event).await;
        Ok(())
    }
}
