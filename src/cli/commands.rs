// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Subcommand implementations
//!
//! Each command renders to a `String` so the binary only has to print it.

use serde_json::json;
use std::fmt::Write as _;

use crate::cli::args::{CapsArgs, OutputFormat, SessionsCommands};
use crate::error::{Result, TandemError};
use crate::llm::capabilities::ProviderCapabilityRegistry;
use crate::session::model::{PartKind, StepKind};
use crate::session::store::SessionStore;

/// Render detected capabilities for a (provider, model) pair
pub fn render_caps(args: &CapsArgs, format: OutputFormat) -> Result<String> {
    let registry = ProviderCapabilityRegistry::new();
    let caps = registry.capabilities(&args.provider, &args.model);
    let parameters = registry.optimal_parameters(&args.provider, &args.model);
    let disabled = registry.disabled_tools(&args.provider, &args.model);

    if format == OutputFormat::Json {
        let value = json!({
            "provider": args.provider,
            "model": args.model,
            "capabilities": caps,
            "parameters": parameters,
            "disabled_tools": disabled.to_string(),
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} / {}", args.provider, args.model);
    let _ = writeln!(out, "  family:          {}", caps.model_family);
    let _ = writeln!(out, "  context length:  {}", caps.max_context_length);
    let _ = writeln!(out, "  max output:      {}", caps.max_output_tokens);
    let _ = writeln!(out, "  tool calls:      {}", caps.supports_tool_calls);
    let _ = writeln!(out, "  images:          {}", caps.supports_images);
    let _ = writeln!(out, "  prompt caching:  {}", caps.supports_caching);
    let _ = writeln!(
        out,
        "  sampling:        temperature={:?} top_p={:?} max_tokens={}",
        parameters.temperature, parameters.top_p, parameters.max_tokens
    );
    let _ = writeln!(out, "  disabled tools:  {}", disabled);
    Ok(out)
}

/// Render a sessions subcommand against a store
pub async fn render_sessions(
    store: &dyn SessionStore,
    command: &SessionsCommands,
    format: OutputFormat,
) -> Result<String> {
    match command {
        SessionsCommands::List => {
            let sessions = store.list_sessions().await?;
            if format == OutputFormat::Json {
                return Ok(serde_json::to_string_pretty(&sessions)?);
            }
            if sessions.is_empty() {
                return Ok("No sessions found.\n".to_string());
            }
            let mut out = String::new();
            for session in sessions {
                let _ = writeln!(
                    out,
                    "{}  {}  {}/{}  {}{}",
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                    session.id,
                    session.provider_id,
                    session.model_id,
                    session.title.as_deref().unwrap_or("(untitled)"),
                    if session.pending_revert.is_some() {
                        "  [revert pending]"
                    } else {
                        ""
                    }
                );
            }
            Ok(out)
        }
        SessionsCommands::Show { id } => {
            let session = store
                .get_session(id)
                .await?
                .ok_or_else(|| TandemError::NotFound(format!("session {}", id)))?;
            let messages = store.messages(id).await?;
            if format == OutputFormat::Json {
                let value = json!({"session": session, "messages": messages});
                return Ok(serde_json::to_string_pretty(&value)?);
            }

            let mut out = String::new();
            let _ = writeln!(
                out,
                "Session {} ({}/{})",
                session.id, session.provider_id, session.model_id
            );
            let _ = writeln!(
                out,
                "  tokens: {} in / {} out{}",
                session.token_usage.input_tokens,
                session.token_usage.output_tokens,
                if session.compressed { ", compressed" } else { "" }
            );
            for message in &messages {
                let label = if message.summary {
                    "summary".to_string()
                } else {
                    message.role.to_string()
                };
                let _ = writeln!(out, "\n[{}] {}", label, message.id);
                for part in &message.parts {
                    match &part.kind {
                        PartKind::Text { text, .. } => {
                            let _ = writeln!(out, "  {}", text);
                        }
                        PartKind::ToolCall(call) => {
                            let _ = writeln!(out, "  -> {} ({})", call.tool_name, call.state);
                        }
                        PartKind::File { url, mime, .. } => {
                            let _ = writeln!(out, "  [file {} {}]", mime, url);
                        }
                        PartKind::StepBoundary {
                            kind: StepKind::Finish,
                            token_usage: Some(usage),
                            ..
                        } => {
                            let _ = writeln!(out, "  -- step: {} tokens", usage.total_tokens());
                        }
                        PartKind::StepBoundary { .. } => {}
                    }
                }
                if let Some(error) = &message.error {
                    let _ = writeln!(out, "  error: {}", error);
                }
            }
            Ok(out)
        }
    }
}
