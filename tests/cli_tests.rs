// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use clap::Parser;
use tandem::cli::{
    render_caps, render_sessions, CapsArgs, Cli, Commands, OutputFormat, SessionsCommands,
};
use tandem::session::{FileSessionStore, SessionStore};
use tempfile::TempDir;

#[test]
fn test_parse_caps_command() {
    let cli = Cli::try_parse_from(["tandem", "caps", "ollama", "qwen2.5-coder:7b"])
        .expect("Valid command parsing");
    if let Commands::Caps(args) = cli.command {
        assert_eq!(args.provider, "ollama");
        assert_eq!(args.model, "qwen2.5-coder:7b");
    } else {
        panic!("Expected Caps command");
    }
}

#[test]
fn test_parse_caps_requires_model() {
    assert!(Cli::try_parse_from(["tandem", "caps", "ollama"]).is_err());
}

#[test]
fn test_parse_sessions_list() {
    let cli = Cli::try_parse_from(["tandem", "sessions", "list"]).expect("Valid command parsing");
    match cli.command {
        Commands::Sessions(args) => {
            assert!(args.dir.is_none());
            assert!(matches!(args.command, SessionsCommands::List));
        }
        _ => panic!("Expected Sessions command"),
    }
}

#[test]
fn test_parse_verbose_after_subcommand() {
    let cli = Cli::try_parse_from(["tandem", "caps", "openai", "gpt-4o", "-v"])
        .expect("Valid command parsing");
    assert_eq!(cli.verbose, 1);
}

#[test]
fn test_parse_invalid_format() {
    assert!(Cli::try_parse_from(["tandem", "--format", "yaml", "sessions", "list"]).is_err());
}

#[test]
fn test_caps_for_qwen_lists_disabled_tools() {
    let args = CapsArgs {
        provider: "ollama".into(),
        model: "qwen2.5-coder:7b".into(),
    };
    let out = render_caps(&args, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();

    assert_eq!(value["capabilities"]["model_family"], "qwen");
    assert_eq!(value["disabled_tools"], "multi_edit, patch");
}

#[tokio::test]
async fn test_sessions_list_from_file_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileSessionStore::open(temp_dir.path()).unwrap();
    store
        .get_or_create_session("alpha", "anthropic", "claude-sonnet-4")
        .await
        .unwrap();

    let reopened = FileSessionStore::open(temp_dir.path()).unwrap();
    let out = render_sessions(&reopened, &SessionsCommands::List, OutputFormat::Text)
        .await
        .unwrap();
    assert!(out.contains("alpha"));
    assert!(out.contains("anthropic/claude-sonnet-4"));
    assert!(out.contains("(untitled)"));

    let json = render_sessions(&reopened, &SessionsCommands::List, OutputFormat::Json)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value.as_array().map(|a| a.len()), Some(1));
}
