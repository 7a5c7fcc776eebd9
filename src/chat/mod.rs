// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Turn execution
//!
//! [`SessionOrchestrator`] is the façade callers use; the
//! [`StreamCoordinator`] does the per-step streaming work underneath.

pub mod context;
pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod streaming;

pub use context::build_context;
pub use events::{ChatEvent, EventSink, TurnState};
pub use orchestrator::{
    ChatInput, InputPart, SessionOrchestrator, SessionOrchestratorBuilder, TurnHandle,
    TurnOutcome,
};
pub use prompt::{DefaultPromptAssembler, PromptAssembler, PromptMode, PromptOptions};
pub use streaming::{StepOutcome, StreamCoordinator, StreamStats};
