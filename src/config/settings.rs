// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Tandem
//!
//! Handles loading and saving settings from ~/.tandem/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod io;
mod validation;

/// Main settings structure, stored in ~/.tandem/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Conversation and token management settings
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Turn scheduling settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Session storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Conversation compression configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationConfig {
    /// Whether history compression runs at all
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,

    /// Fraction (0.0-1.0) of the usable context at which compression triggers
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: f64,

    /// Fraction (0.0-1.0) of trailing messages kept verbatim after compression
    #[serde(default = "default_preserve_threshold")]
    pub preserve_threshold: f64,

    /// Tokens reserved for the model's response
    #[serde(default = "default_output_reserve_tokens")]
    pub output_reserve_tokens: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            compression_enabled: default_compression_enabled(),
            compression_threshold: default_compression_threshold(),
            preserve_threshold: default_preserve_threshold(),
            output_reserve_tokens: default_output_reserve_tokens(),
        }
    }
}

/// Turn scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Maximum requests waiting behind a busy session
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Maximum model steps (tool round-trips) per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Capacity of the provider event channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: default_max_queue_depth(),
            max_steps: default_max_steps(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

/// Session storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    /// Directory holding one JSON document per session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_dir: Option<PathBuf>,
}

impl Settings {
    /// Get the Tandem home directory (~/.tandem)
    pub fn tandem_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tandem")
    }

    /// Resolve the sessions directory, falling back to ~/.tandem/sessions
    pub fn sessions_dir(&self) -> PathBuf {
        self.storage
            .sessions_dir
            .clone()
            .unwrap_or_else(|| Self::tandem_home().join("sessions"))
    }
}

fn default_compression_enabled() -> bool {
    true
}

fn default_compression_threshold() -> f64 {
    0.9
}

fn default_preserve_threshold() -> f64 {
    0.3
}

fn default_output_reserve_tokens() -> u32 {
    8192
}

fn default_max_queue_depth() -> usize {
    16
}

fn default_max_steps() -> usize {
    25
}

fn default_stream_buffer() -> usize {
    64
}
