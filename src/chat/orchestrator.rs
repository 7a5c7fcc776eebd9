// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session orchestrator
//!
//! Entry point for running turns. A turn takes the session lock, applies a
//! pending revert, records the user message, compresses history when the
//! previous turn overflowed, then streams provider steps until the model
//! stops asking for tools. The lock is released on every exit path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chat::context::build_context;
use crate::chat::events::{ChatEvent, EventSink, TurnState};
use crate::chat::prompt::{DefaultPromptAssembler, PromptAssembler, PromptOptions};
use crate::chat::streaming::StreamCoordinator;
use crate::config::{SessionConfig, Settings};
use crate::error::{ProviderError, Result, TandemError};
use crate::llm::capabilities::ProviderCapabilityRegistry;
use crate::llm::message::Message;
use crate::llm::provider::{ChatRequest, FinishReason, LlmProvider, Usage};
use crate::session::compression::{CompressionOutcome, CompressionPolicy, Summarizer};
use crate::session::lock::{Acquisition, SessionLockGuard, SessionLocks};
use crate::session::model::{Part, PartKind, RevertRecord, Session, SessionMessage};
use crate::session::revert::{NoopSnapshotProvider, RevertManager, SnapshotProvider};
use crate::session::store::SessionStore;
use crate::tools::{ToolCatalogue, ToolFilter, ToolPermissions, ToolRegistry};

/// One piece of operator input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    Text {
        text: String,
    },
    File {
        url: String,
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// A request to run one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInput {
    pub session_id: String,
    /// Required when the session does not exist yet; switches the session
    /// to this provider otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub parts: Vec<InputPart>,
    #[serde(default)]
    pub permissions: ToolPermissions,
    #[serde(default)]
    pub prompt: PromptOptions,
}

impl ChatInput {
    /// Plain text input for an existing session
    pub fn text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            provider_id: None,
            model_id: None,
            parts: vec![InputPart::Text { text: text.into() }],
            permissions: ToolPermissions::default(),
            prompt: PromptOptions::default(),
        }
    }

    pub fn with_model(mut self, provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_file(
        mut self,
        url: impl Into<String>,
        mime: impl Into<String>,
        filename: Option<String>,
    ) -> Self {
        self.parts.push(InputPart::File {
            url: url.into(),
            mime: mime.into(),
            filename,
        });
        self
    }

    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptOptions) -> Self {
        self.prompt = prompt;
        self
    }

    fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            InputPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Result of a finished turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    /// Assistant message produced by the turn
    pub message_id: Uuid,
    /// Completed, Errored or Cancelled
    pub state: TurnState,
    /// Usage summed over all steps
    pub usage: Usage,
    pub steps: usize,
    pub cost_estimate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == TurnState::Completed
    }

    pub fn is_errored(&self) -> bool {
        self.state == TurnState::Errored
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == TurnState::Cancelled
    }
}

/// A turn running in the background
pub struct TurnHandle {
    session_id: String,
    events: mpsc::Receiver<ChatEvent>,
    outcome: JoinHandle<Result<TurnOutcome>>,
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next lifecycle event; `None` once the turn has ended
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Split into an event stream and the outcome task
    pub fn into_parts(self) -> (ReceiverStream<ChatEvent>, JoinHandle<Result<TurnOutcome>>) {
        (ReceiverStream::new(self.events), self.outcome)
    }

    /// Wait for the turn, discarding events not yet read
    pub async fn outcome(self) -> Result<TurnOutcome> {
        self.collect().await.1
    }

    /// Wait for the turn, returning every event not yet read
    pub async fn collect(mut self) -> (Vec<ChatEvent>, Result<TurnOutcome>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = match self.outcome.await {
            Ok(outcome) => outcome,
            Err(e) => Err(TandemError::InvalidState(format!("turn task failed: {}", e))),
        };
        (events, outcome)
    }
}

struct Inner {
    store: Arc<dyn SessionStore>,
    locks: SessionLocks,
    capabilities: Arc<ProviderCapabilityRegistry>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    catalogue: Arc<dyn ToolCatalogue>,
    tools: ToolFilter,
    prompts: Arc<dyn PromptAssembler>,
    compression: CompressionPolicy,
    reverts: RevertManager,
    snapshots: Arc<dyn SnapshotProvider>,
    config: SessionConfig,
    working_directory: Option<PathBuf>,
}

/// Builder for [`SessionOrchestrator`]
pub struct SessionOrchestratorBuilder {
    store: Arc<dyn SessionStore>,
    settings: Settings,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    catalogue: Option<Arc<dyn ToolCatalogue>>,
    capabilities: Option<ProviderCapabilityRegistry>,
    prompts: Option<Arc<dyn PromptAssembler>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    snapshots: Option<Arc<dyn SnapshotProvider>>,
    working_directory: Option<PathBuf>,
}

impl SessionOrchestratorBuilder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            settings: Settings::default(),
            providers: HashMap::new(),
            catalogue: None,
            capabilities: None,
            prompts: None,
            summarizer: None,
            snapshots: None,
            working_directory: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a provider under its own name
    pub fn with_provider(self, provider: Arc<dyn LlmProvider>) -> Self {
        let id = provider.name().to_string();
        self.with_provider_as(id, provider)
    }

    /// Register a provider under an explicit id
    pub fn with_provider_as(
        mut self,
        provider_id: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        self.providers.insert(provider_id.into(), provider);
        self
    }

    pub fn with_catalogue(mut self, catalogue: Arc<dyn ToolCatalogue>) -> Self {
        self.catalogue = Some(catalogue);
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilityRegistry) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_prompt_assembler(mut self, prompts: Arc<dyn PromptAssembler>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Directory tools run in
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<SessionOrchestrator> {
        self.settings.validate()?;

        let capabilities = Arc::new(self.capabilities.unwrap_or_default());
        let catalogue = self
            .catalogue
            .unwrap_or_else(|| Arc::new(ToolRegistry::new()));
        let snapshots = self
            .snapshots
            .unwrap_or_else(|| Arc::new(NoopSnapshotProvider));
        let mut compression = CompressionPolicy::new(self.settings.conversation.clone());
        if let Some(summarizer) = self.summarizer {
            compression = compression.with_summarizer(summarizer);
        }

        let inner = Inner {
            locks: SessionLocks::new(self.settings.session.max_queue_depth),
            tools: ToolFilter::new(catalogue.clone(), capabilities.clone()),
            reverts: RevertManager::new(self.store.clone(), snapshots.clone()),
            prompts: self
                .prompts
                .unwrap_or_else(|| Arc::new(DefaultPromptAssembler)),
            store: self.store,
            capabilities,
            providers: self.providers,
            catalogue,
            compression,
            snapshots,
            config: self.settings.session.clone(),
            working_directory: self.working_directory,
        };

        tracing::debug!(
            target: "tandem.chat.orchestrator",
            providers = inner.providers.len(),
            max_steps = inner.config.max_steps,
            max_queue_depth = inner.config.max_queue_depth,
            "Orchestrator ready"
        );
        Ok(SessionOrchestrator {
            inner: Arc::new(inner),
        })
    }
}

/// Runs turns against sessions; cheap to clone
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn builder(store: Arc<dyn SessionStore>) -> SessionOrchestratorBuilder {
        SessionOrchestratorBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.inner.locks
    }

    pub fn capabilities(&self) -> &ProviderCapabilityRegistry {
        &self.inner.capabilities
    }

    pub fn tool_filter(&self) -> &ToolFilter {
        &self.inner.tools
    }

    /// Run a turn, waiting in the session queue if it is busy
    pub async fn chat(&self, input: ChatInput) -> Result<TurnOutcome> {
        self.chat_with_events(input, EventSink::none()).await
    }

    /// Run a turn, failing with `SessionBusy` if the session is busy
    pub async fn try_chat(&self, input: ChatInput) -> Result<TurnOutcome> {
        let guard = self.inner.locks.try_acquire(&input.session_id)?;
        self.locked_turn(guard, input, EventSink::none()).await
    }

    /// Run a queued turn in the background and stream its events
    pub fn chat_stream(&self, input: ChatInput) -> TurnHandle {
        let (tx, rx) = mpsc::channel(self.inner.config.stream_buffer.max(1));
        let session_id = input.session_id.clone();
        let this = self.clone();
        let outcome =
            tokio::spawn(async move { this.chat_with_events(input, EventSink::channel(tx)).await });
        TurnHandle {
            session_id,
            events: rx,
            outcome,
        }
    }

    /// Cancel the turn currently running on a session
    pub fn cancel(&self, session_id: &str) -> bool {
        let cancelled = self.inner.locks.cancel(session_id);
        if cancelled {
            tracing::info!(target: "tandem.chat.orchestrator", session_id, "Turn cancellation requested");
        }
        cancelled
    }

    /// Record a revert; applied at the start of the next turn
    pub async fn revert(
        &self,
        session_id: &str,
        message_id: Uuid,
        part_id: Option<Uuid>,
    ) -> Result<RevertRecord> {
        let guard = self.inner.locks.try_acquire(session_id)?;
        let result = self.inner.reverts.revert(session_id, message_id, part_id).await;
        guard.release();
        result
    }

    /// Discard a recorded revert
    pub async fn unrevert(&self, session_id: &str) -> Result<Option<RevertRecord>> {
        let guard = self.inner.locks.try_acquire(session_id)?;
        let result = self.inner.reverts.unrevert(session_id).await;
        guard.release();
        result
    }

    /// Cancel every running turn and reject every queued one
    pub fn shutdown(&self) {
        tracing::info!(target: "tandem.chat.orchestrator", "Shutting down orchestrator");
        self.inner.locks.dispose_all();
    }

    async fn chat_with_events(&self, input: ChatInput, events: EventSink) -> Result<TurnOutcome> {
        events.state(TurnState::Locking).await;
        let guard = match self.inner.locks.acquire_or_enqueue(&input.session_id) {
            Ok(Acquisition::Acquired(guard)) => guard,
            Ok(Acquisition::Queued(ticket)) => {
                tracing::debug!(
                    target: "tandem.chat.orchestrator",
                    session_id = %input.session_id,
                    position = ticket.position(),
                    "Session busy, queued"
                );
                events
                    .emit(ChatEvent::Queued {
                        position: ticket.position(),
                    })
                    .await;
                match ticket.wait().await {
                    Ok(guard) => guard,
                    Err(e) => return Err(Self::fail_early(&events, e).await),
                }
            }
            Err(e) => return Err(Self::fail_early(&events, e).await),
        };
        self.locked_turn(guard, input, events).await
    }

    async fn fail_early(events: &EventSink, error: TandemError) -> TandemError {
        events
            .emit(ChatEvent::Error {
                message: error.to_string(),
            })
            .await;
        events.state(TurnState::Errored).await;
        error
    }

    async fn locked_turn(
        &self,
        guard: SessionLockGuard,
        input: ChatInput,
        events: EventSink,
    ) -> Result<TurnOutcome> {
        let cancel = guard.cancel_token();
        let result = self.run_turn(&input, &cancel, &events).await;
        guard.release();

        match &result {
            Ok(outcome) => {
                tracing::info!(
                    target: "tandem.chat.orchestrator",
                    session_id = %outcome.session_id,
                    state = %outcome.state,
                    steps = outcome.steps,
                    input_tokens = outcome.usage.input_tokens,
                    output_tokens = outcome.usage.output_tokens,
                    "Turn finished"
                );
                events.state(outcome.state).await;
            }
            Err(e) => {
                tracing::warn!(
                    target: "tandem.chat.orchestrator",
                    session_id = %input.session_id,
                    error = %e,
                    "Turn failed"
                );
                events
                    .emit(ChatEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                events.state(TurnState::Errored).await;
            }
        }
        events.state(TurnState::Idle).await;
        result
    }

    async fn resolve_session(&self, input: &ChatInput) -> Result<Session> {
        let store = &self.inner.store;
        let requested = input.provider_id.as_ref().zip(input.model_id.as_ref());
        match store.get_session(&input.session_id).await? {
            Some(session) => match requested {
                Some((provider, model))
                    if *provider != session.provider_id || *model != session.model_id =>
                {
                    let (provider, model) = (provider.clone(), model.clone());
                    store
                        .update_session(
                            &input.session_id,
                            Box::new(move |session| {
                                session.provider_id = provider;
                                session.model_id = model;
                            }),
                        )
                        .await
                }
                _ => Ok(session),
            },
            None => {
                let Some((provider, model)) = requested else {
                    return Err(TandemError::InvalidInput(format!(
                        "session {} does not exist and no provider/model was given",
                        input.session_id
                    )));
                };
                store
                    .get_or_create_session(&input.session_id, provider, model)
                    .await
            }
        }
    }

    async fn materialize_user_message(&self, session: &Session, input: &ChatInput) -> Result<Uuid> {
        let mut message = SessionMessage::user(&session.id);
        for part in &input.parts {
            match part {
                InputPart::Text { text } => message.parts.push(Part::text(text.clone())),
                InputPart::File {
                    url,
                    mime,
                    filename,
                } => {
                    message.push_part(PartKind::File {
                        url: url.clone(),
                        mime: mime.clone(),
                        filename: filename.clone(),
                        source: None,
                    });
                }
            }
        }
        message.completed_at = Some(message.created_at);
        let id = message.id;
        self.inner.store.append_message(message).await?;

        if session.title.is_none() {
            if let Some(text) = input.first_text() {
                let title = text.to_string();
                self.inner
                    .store
                    .update_session(&session.id, Box::new(move |s| s.set_title(&title)))
                    .await?;
            }
        }
        Ok(id)
    }

    /// Revert cleanup, the user message and compression all run under the
    /// session lock, before the prompt is built.
    async fn run_turn(
        &self,
        input: &ChatInput,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<TurnOutcome> {
        let inner = &self.inner;
        let mut user_message: Option<Uuid> = None;
        let mut compression_tried = false;

        let (session, provider, caps) = loop {
            let session = self.resolve_session(input).await?;
            let provider = inner
                .providers
                .get(&session.provider_id)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownProvider(session.provider_id.clone()))?;

            if session.pending_revert.is_some() {
                if let Some(record) = inner.reverts.cleanup(&session.id).await? {
                    events
                        .emit(ChatEvent::RevertApplied {
                            reverted_message_count: record.reverted_message_count,
                        })
                        .await;
                }
            }

            if user_message.is_none() {
                user_message = Some(self.materialize_user_message(&session, input).await?);
            }

            let session = inner
                .store
                .get_session(&session.id)
                .await?
                .ok_or_else(|| TandemError::NotFound(format!("session {}", session.id)))?;
            let caps = inner
                .capabilities
                .capabilities(&session.provider_id, &session.model_id);

            if !compression_tried {
                compression_tried = true;
                let history = inner.store.messages(&session.id).await?;
                if inner.compression.should_compress(&session, &history, &caps) {
                    events.state(TurnState::Compressing).await;
                    match inner.compression.compress(&*inner.store, &session.id).await {
                        Ok(CompressionOutcome::Compressed {
                            summarized,
                            retained,
                        }) => {
                            events
                                .emit(ChatEvent::Compressed {
                                    summarized,
                                    retained,
                                })
                                .await;
                            continue;
                        }
                        Ok(CompressionOutcome::NotNeeded) => {}
                        Err(e) => {
                            tracing::warn!(
                                target: "tandem.chat.orchestrator",
                                session_id = %session.id,
                                error = %e,
                                "Compression failed, continuing with full history"
                            );
                            events
                                .emit(ChatEvent::Warning {
                                    message: e.to_string(),
                                })
                                .await;
                        }
                    }
                }
            }
            break (session, provider, caps);
        };

        events.state(TurnState::Prompting).await;
        let provider_id = session.provider_id.as_str();
        let model_id = session.model_id.as_str();
        let system = inner
            .prompts
            .assemble(provider_id, model_id, &input.prompt)
            .await;
        let tools = inner
            .tools
            .get_tools_for_provider(provider_id, model_id, &input.permissions);
        let parameters = inner.capabilities.optimal_parameters(provider_id, model_id);

        let mut assistant = SessionMessage::assistant(&session.id);
        inner.store.append_message(assistant.clone()).await?;

        let coordinator = StreamCoordinator::new(
            inner.store.clone(),
            inner.catalogue.clone(),
            events.clone(),
        )
        .with_buffer(inner.config.stream_buffer)
        .with_working_directory(inner.working_directory.clone())
        .with_offered_tools(tools.iter().map(|tool| tool.name.clone()));

        events.state(TurnState::Streaming).await;
        let mut total = Usage::default();
        let mut last_usage: Option<Usage> = None;
        let mut steps = 0;
        let mut failure: Option<TandemError> = None;
        let state = loop {
            if cancel.is_cancelled() {
                break TurnState::Cancelled;
            }
            steps += 1;

            let history = match inner.store.messages(&session.id).await {
                Ok(history) => history,
                Err(e) => {
                    failure = Some(e);
                    break TurnState::Errored;
                }
            };
            let mut messages: Vec<Message> = system.iter().map(Message::system).collect();
            messages.extend(build_context(&history));
            let messages = inner
                .capabilities
                .transform_messages(provider_id, model_id, messages);
            let request = ChatRequest::new(model_id, messages)
                .with_tools(tools.clone())
                .with_parameters(parameters.clone());

            let snapshot = match inner.snapshots.create_snapshot(&session.id).await {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(
                        target: "tandem.chat.orchestrator",
                        session_id = %session.id,
                        error = %e,
                        "Snapshot before step failed"
                    );
                    None
                }
            };

            tracing::debug!(
                target: "tandem.chat.orchestrator",
                session_id = %session.id,
                step = steps,
                messages = request.messages.len(),
                tools = request.tools.len(),
                "Starting provider step"
            );

            let stream = match provider.stream_chat(request, cancel.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    let message = e.to_string();
                    assistant.error = Some(message.clone());
                    events.emit(ChatEvent::Error { message }).await;
                    break TurnState::Errored;
                }
            };

            let outcome = match coordinator
                .run_step(stream, &mut assistant, cancel, snapshot)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    failure = Some(e);
                    break TurnState::Errored;
                }
            };
            total.accumulate(&outcome.usage);
            if outcome.reason != FinishReason::Cancelled && outcome.reason != FinishReason::Error {
                last_usage = Some(outcome.usage);
            }

            if outcome.cancelled {
                break TurnState::Cancelled;
            }
            if outcome.error.is_some() {
                break TurnState::Errored;
            }
            if !outcome.wants_continuation() {
                break TurnState::Completed;
            }
            if steps >= inner.config.max_steps {
                tracing::warn!(
                    target: "tandem.chat.orchestrator",
                    session_id = %session.id,
                    steps,
                    "Step limit reached"
                );
                events
                    .emit(ChatEvent::Warning {
                        message: format!("stopped after {} steps", steps),
                    })
                    .await;
                break TurnState::Completed;
            }
        };

        let cost = caps.estimate_cost(&total);
        assistant.completed_at = Some(chrono::Utc::now());
        assistant.token_usage = last_usage;
        assistant.cost_estimate = Some(cost);
        if let Some(e) = &failure {
            if assistant.error.is_none() {
                assistant.error = Some(e.to_string());
            }
        }
        let finalized = self.finalize_turn(&session.id, &assistant, total).await;
        if let Some(e) = failure {
            if let Err(finalize_error) = finalized {
                tracing::warn!(
                    target: "tandem.chat.orchestrator",
                    session_id = %session.id,
                    error = %finalize_error,
                    "Could not finalize failed turn"
                );
            }
            return Err(e);
        }
        finalized?;

        Ok(TurnOutcome {
            session_id: session.id.clone(),
            message_id: assistant.id,
            state,
            usage: total,
            steps,
            cost_estimate: cost,
            error: assistant.error.clone(),
        })
    }

    /// Store the closed assistant message and add the turn's usage to the
    /// session; both writes are attempted even if the first fails
    async fn finalize_turn(
        &self,
        session_id: &str,
        assistant: &SessionMessage,
        total: Usage,
    ) -> Result<()> {
        let store = &self.inner.store;
        let message = store.update_message(assistant.clone()).await;
        let session = store
            .update_session(
                session_id,
                Box::new(move |s| {
                    s.token_usage.accumulate(&total);
                    s.touch();
                }),
            )
            .await
            .map(|_| ());
        message.and(session)
    }
}
