// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! System prompt assembly

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::llm::capabilities::{detect_family, ModelFamily};

/// Project instruction files, checked in order
const INSTRUCTION_FILES: &[&str] = &["AGENTS.md", "TANDEM.md", "CONTEXT.md"];

/// Instruction files larger than this are truncated
const MAX_INSTRUCTION_BYTES: usize = 32 * 1024;

/// What the agent is allowed to do this turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Read, write and run
    #[default]
    Build,
    /// Read and propose only
    Plan,
}

/// Per-turn inputs to prompt assembly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptOptions {
    #[serde(default)]
    pub mode: PromptMode,
    /// Caller-supplied system text appended after the built-in prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_system: Option<String>,
    /// Where to look for project instruction files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,
}

impl PromptOptions {
    pub fn with_mode(mut self, mode: PromptMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_custom_system(mut self, text: impl Into<String>) -> Self {
        self.custom_system = Some(text.into());
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }
}

/// Produces the system messages for a turn, outermost first
#[async_trait]
pub trait PromptAssembler: Send + Sync {
    async fn assemble(
        &self,
        provider_id: &str,
        model_id: &str,
        options: &PromptOptions,
    ) -> Vec<String>;
}

/// Built-in prompt: identity, environment, project instructions, custom text
#[derive(Debug, Clone, Default)]
pub struct DefaultPromptAssembler;

impl DefaultPromptAssembler {
    fn identity(family: ModelFamily, mode: PromptMode) -> String {
        let mut prompt = String::from(
            "You are an AI coding assistant working in the user's project. \
             Use the available tools to inspect and change files, and keep \
             answers short and concrete.\n",
        );
        match family {
            ModelFamily::Claude | ModelFamily::Gpt | ModelFamily::Gemini => {}
            // Smaller open-weight models drift without an explicit tool reminder
            _ => prompt.push_str(
                "\nCall one tool at a time and wait for its result before continuing.\n",
            ),
        }
        if mode == PromptMode::Plan {
            prompt.push_str(
                "\n## Mode\nPlanning only: read and analyse, then propose changes. \
                 Do not modify files or run commands that change state.\n",
            );
        }
        prompt
    }

    fn environment(options: &PromptOptions) -> String {
        let cwd = options
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        format!(
            "## Environment\n\
             Working directory: {}\n\
             Platform: {}\n\
             Date: {}\n",
            cwd,
            std::env::consts::OS,
            chrono::Utc::now().format("%Y-%m-%d")
        )
    }

    async fn project_instructions(options: &PromptOptions) -> Option<String> {
        let root = options.project_root.as_ref()?;
        for name in INSTRUCTION_FILES {
            let path = root.join(name);
            match tokio::fs::read_to_string(&path).await {
                Ok(mut content) => {
                    if content.trim().is_empty() {
                        continue;
                    }
                    if content.len() > MAX_INSTRUCTION_BYTES {
                        let mut end = MAX_INSTRUCTION_BYTES;
                        while !content.is_char_boundary(end) {
                            end -= 1;
                        }
                        content.truncate(end);
                    }
                    tracing::debug!(
                        target: "tandem.chat.prompt",
                        path = %path.display(),
                        "Loaded project instructions"
                    );
                    return Some(format!("## Project instructions ({})\n{}", name, content));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    tracing::warn!(
                        target: "tandem.chat.prompt",
                        path = %path.display(),
                        error = %e,
                        "Could not read project instructions"
                    );
                }
            }
        }
        None
    }
}

#[async_trait]
impl PromptAssembler for DefaultPromptAssembler {
    async fn assemble(
        &self,
        _provider_id: &str,
        model_id: &str,
        options: &PromptOptions,
    ) -> Vec<String> {
        let family = detect_family(model_id);
        let mut system = vec![format!(
            "{}\n{}",
            Self::identity(family, options.mode),
            Self::environment(options)
        )];
        if let Some(instructions) = Self::project_instructions(options).await {
            system.push(instructions);
        }
        if let Some(custom) = options
            .custom_system
            .as_ref()
            .filter(|text| !text.trim().is_empty())
        {
            system.push(custom.clone());
        }
        system
    }
}
