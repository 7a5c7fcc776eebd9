// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Tandem - inspect model capabilities and stored sessions
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about = "Session orchestration core for agentic coding assistants")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show detected capabilities and derived parameters for a model
    Caps(CapsArgs),

    /// Inspect stored sessions
    Sessions(SessionsArgs),
}

/// Arguments for the caps subcommand
#[derive(clap::Args, Debug)]
pub struct CapsArgs {
    /// Provider id (anthropic, openai, ollama, ...)
    pub provider: String,

    /// Model id
    pub model: String,
}

/// Arguments for the sessions subcommand
#[derive(clap::Args, Debug)]
pub struct SessionsArgs {
    /// Sessions directory (overrides settings)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: SessionsCommands,
}

/// Session subcommands
#[derive(Subcommand, Debug)]
pub enum SessionsCommands {
    /// List sessions, most recent first
    List,

    /// Show one session and its history
    Show {
        /// Session id
        id: String,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Text,

    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_command() {
        let cli = Cli::parse_from(["tandem", "caps", "openai", "gpt-4o"]);
        match cli.command {
            Commands::Caps(args) => {
                assert_eq!(args.provider, "openai");
                assert_eq!(args.model, "gpt-4o");
            }
            _ => panic!("Expected Caps command"),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_sessions_show() {
        let cli = Cli::parse_from(["tandem", "sessions", "--dir", "/tmp/s", "show", "abc"]);
        match cli.command {
            Commands::Sessions(args) => {
                assert_eq!(args.dir, Some(PathBuf::from("/tmp/s")));
                assert!(matches!(args.command, SessionsCommands::Show { ref id } if id == "abc"));
            }
            _ => panic!("Expected Sessions command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "tandem", "-vv", "--format", "json", "--config", "/tmp/c.json", "sessions", "list",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
    }

    #[test]
    fn test_missing_command_is_error() {
        assert!(Cli::try_parse_from(["tandem"]).is_err());
    }
}
