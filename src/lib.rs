// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tandem - session orchestration core for agentic coding assistants.
//!
//! This crate owns everything between "the operator typed something" and
//! "the model's answer (and its tool side effects) is persisted":
//!
//! - `chat`: the `SessionOrchestrator` façade and the `StreamCoordinator`
//!   that consumes provider events, runs tools and persists turns
//! - `session`: session/message storage, per-session locks with FIFO
//!   queuing, history compression and two-phase revert
//! - `llm`: provider-neutral messages, the provider trait, and the
//!   capability/transform registry keyed by (provider, model)
//! - `tools`: the tool catalogue boundary, coarse permissions and the
//!   per-model tool filter
//! - `config`: settings loaded from `~/.tandem/settings.json`
//!
//! Concrete vendor clients, tool implementations and the terminal UI live
//! outside this crate and plug in through the traits exported here.

pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod session;
pub mod tools;

pub use error::{Result, TandemError};
