// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Tandem
//!
//! Session-level failures (busy, queue, revert) are kept distinct from
//! provider and tool failures so the calling layer can decide what the
//! operator sees.

use thiserror::Error;

/// Main error type for Tandem operations
#[derive(Error, Debug)]
pub enum TandemError {
    /// The session is already held by another turn
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// The session's wait queue is at capacity
    #[error("Queue full for session {session_id}: {depth} requests already waiting")]
    QueueFull { session_id: String, depth: usize },

    /// A queued request was rejected because the queue was torn down
    #[error("Queue disposed for session {0}")]
    QueueDisposed(String),

    /// History compression failed (callers degrade to a no-op)
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Provider-related errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Tool execution errors
    #[error(transparent)]
    ToolExecution(#[from] ToolExecutionError),

    /// Revert target could not be located
    #[error("Revert inconsistency: {0}")]
    RevertInconsistency(String),

    /// Snapshot capability failed
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Illegal state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Provider-specific error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// No provider registered under this id
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Context window exceeded
    #[error("Context too long: {current} tokens exceeds limit of {limit}")]
    ContextTooLong { current: u32, limit: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

impl ProviderError {
    /// Whether a retry (with backoff) could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited(_)
            | ProviderError::Network(_)
            | ProviderError::Timeout
            | ProviderError::StreamError(_) => true,
            ProviderError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failure of a single tool invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Tool '{tool_name}' failed: {message}")]
pub struct ToolExecutionError {
    pub tool_name: String,
    pub message: String,
}

impl ToolExecutionError {
    pub fn new(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }
}

impl TandemError {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            TandemError::SessionBusy(_) | TandemError::QueueFull { .. } => true,
            TandemError::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for Tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;
