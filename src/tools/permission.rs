// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Coarse tool permissions
//!
//! Tools are grouped into categories by name; a turn's permission flags
//! decide which categories are offered to the model at all.

use serde::{Deserialize, Serialize};

/// Tools whose completion changes files on disk
const FILE_CHANGE_TOOLS: &[&str] = &[
    "edit",
    "write",
    "create",
    "patch",
    "multi_edit",
    "file_edit",
    "file_write",
];

const READ_TOOLS: &[&str] = &["read", "file_read", "glob", "grep", "list", "ls", "search"];
const SHELL_TOOLS: &[&str] = &["shell", "bash", "exec"];
const NETWORK_TOOLS: &[&str] = &["fetch", "web_fetch", "web_search", "http"];

/// Whether a completed call of `tool_name` changed files
pub fn is_file_change_tool(tool_name: &str) -> bool {
    FILE_CHANGE_TOOLS.contains(&tool_name)
}

/// What a tool touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Reads the filesystem
    Read,
    /// Changes files
    Edit,
    /// Runs commands
    Shell,
    /// Reaches the network
    Network,
    /// Pure or host-defined tools
    Other,
}

impl ToolCategory {
    /// Category of a tool by name
    pub fn of(tool_name: &str) -> Self {
        if is_file_change_tool(tool_name) {
            ToolCategory::Edit
        } else if READ_TOOLS.contains(&tool_name) {
            ToolCategory::Read
        } else if SHELL_TOOLS.contains(&tool_name) {
            ToolCategory::Shell
        } else if NETWORK_TOOLS.contains(&tool_name) {
            ToolCategory::Network
        } else {
            ToolCategory::Other
        }
    }
}

/// Permission flags for one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPermissions {
    #[serde(default = "default_true")]
    pub edit: bool,
    #[serde(default = "default_true")]
    pub shell: bool,
    #[serde(default = "default_true")]
    pub network: bool,
    #[serde(default = "default_true")]
    pub filesystem: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ToolPermissions {
    fn default() -> Self {
        Self::all()
    }
}

impl ToolPermissions {
    /// Everything allowed
    pub fn all() -> Self {
        Self {
            edit: true,
            shell: true,
            network: true,
            filesystem: true,
        }
    }

    /// Nothing but uncategorized tools
    pub fn none() -> Self {
        Self {
            edit: false,
            shell: false,
            network: false,
            filesystem: false,
        }
    }

    /// Reading files only
    pub fn read_only() -> Self {
        Self {
            filesystem: true,
            ..Self::none()
        }
    }

    /// Whether a tool may be offered under these flags
    pub fn allows(&self, tool_name: &str) -> bool {
        match ToolCategory::of(tool_name) {
            ToolCategory::Read => self.filesystem,
            ToolCategory::Edit => self.edit && self.filesystem,
            ToolCategory::Shell => self.shell,
            ToolCategory::Network => self.network,
            ToolCategory::Other => true,
        }
    }
}
