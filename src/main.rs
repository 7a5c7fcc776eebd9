// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tandem - session orchestration core for agentic coding assistants
//!
//! Entry point for the inspection CLI.

use clap::Parser;

use tandem::cli::{render_caps, render_sessions, Cli, Commands};
use tandem::config::Settings;
use tandem::session::FileSessionStore;

/// Log targets raised to debug by `-v`
const VERBOSE_TARGETS: &[&str] = &[
    "tandem.chat.orchestrator",
    "tandem.chat.streaming",
    "tandem.session",
    "tandem.tools",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let output = match &cli.command {
        Commands::Caps(args) => render_caps(args, cli.format)?,
        Commands::Sessions(args) => {
            let dir = args.dir.clone().unwrap_or_else(|| settings.sessions_dir());
            let store = FileSessionStore::open(dir)?;
            render_sessions(&store, &args.command, cli.format).await?
        }
    };
    print!("{}", output);
    Ok(())
}

/// Initialize tracing; RUST_LOG directives still apply on top
fn init_tracing(verbose: u8) {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    if verbose > 0 {
        let level = if verbose > 1 { "trace" } else { "debug" };
        for target in VERBOSE_TARGETS {
            if let Ok(directive) = format!("{}={}", target, level).parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
