// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io;
use tandem::error::{ProviderError, TandemError, ToolExecutionError};

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
    let error: TandemError = io_error.into();

    match error {
        TandemError::Io(_) => {} // Expected
        _ => panic!("Expected Io error, got different error type"),
    }
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
    let error: TandemError = json_error.into();
    assert!(matches!(error, TandemError::Json(_)));
    assert!(error.to_string().starts_with("JSON error:"));
}

#[test]
fn test_session_busy_display() {
    let error = TandemError::SessionBusy("s1".to_string());
    assert_eq!(error.to_string(), "Session busy: s1");
}

#[test]
fn test_queue_full_display() {
    let error = TandemError::QueueFull {
        session_id: "s1".to_string(),
        depth: 16,
    };
    assert_eq!(
        error.to_string(),
        "Queue full for session s1: 16 requests already waiting"
    );
}

#[test]
fn test_queue_disposed_display() {
    let error = TandemError::QueueDisposed("s1".to_string());
    assert_eq!(error.to_string(), "Queue disposed for session s1");
}

#[test]
fn test_config_error_display() {
    let error = TandemError::Config("bad threshold".to_string());
    assert_eq!(error.to_string(), "Configuration error: bad threshold");
}

#[test]
fn test_tool_execution_error_is_transparent() {
    let error: TandemError = ToolExecutionError::new("bash", "exit status 1").into();
    assert_eq!(error.to_string(), "Tool 'bash' failed: exit status 1");
}

#[test]
fn test_provider_error_wraps() {
    let error: TandemError = ProviderError::Timeout.into();
    assert_eq!(error.to_string(), "Provider error: Request timed out");
}

#[test]
fn test_unknown_provider_display() {
    let error = ProviderError::UnknownProvider("acme".to_string());
    assert_eq!(error.to_string(), "Unknown provider: acme");
}

#[test]
fn test_context_too_long_display() {
    let error = ProviderError::ContextTooLong {
        current: 250_000,
        limit: 200_000,
    };
    assert_eq!(
        error.to_string(),
        "Context too long: 250000 tokens exceeds limit of 200000"
    );
}

#[test]
fn test_retryable_provider_errors() {
    assert!(ProviderError::RateLimited(30).is_retryable());
    assert!(ProviderError::Network("reset".into()).is_retryable());
    assert!(ProviderError::Timeout.is_retryable());
    assert!(ProviderError::ServerError {
        status: 503,
        message: "unavailable".into()
    }
    .is_retryable());

    assert!(!ProviderError::AuthenticationFailed.is_retryable());
    assert!(!ProviderError::ServerError {
        status: 400,
        message: "bad request".into()
    }
    .is_retryable());
}
