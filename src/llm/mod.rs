// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for Tandem
//!
//! Provider-neutral messages, the streaming provider boundary and the
//! capability registry that adapts requests per (provider, model).

pub mod capabilities;
pub mod message;
pub mod mock_provider;
pub mod provider;

pub use capabilities::{ModelCapabilities, ModelFamily, ProviderCapabilityRegistry};
pub use message::*;
pub use provider::*;
