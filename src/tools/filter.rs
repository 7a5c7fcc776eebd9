// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-turn tool selection
//!
//! The visible tool set for a turn is the catalogue, minus what the
//! permission flags forbid, minus what the destination model is known to
//! mishandle, with the remaining schemas rewritten for the destination.

use serde::Serialize;
use std::sync::Arc;

use crate::llm::capabilities::ProviderCapabilityRegistry;
use crate::llm::provider::ToolDefinition;
use crate::tools::permission::ToolPermissions;
use crate::tools::ToolCatalogue;

/// Fallbacks offered when a tool is withheld
const ALTERNATIVES: &[(&str, &str)] = &[
    ("multi_edit", "edit"),
    ("patch", "edit"),
    ("file_edit", "edit"),
];

/// Diagnostic view of one tool against one destination
///
/// Informational only; execution never consults it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCompatibility {
    pub compatible: bool,
    pub warnings: Vec<String>,
    pub suggested_alternative: Option<String>,
}

/// Computes the tool set offered to a model
#[derive(Clone)]
pub struct ToolFilter {
    catalogue: Arc<dyn ToolCatalogue>,
    capabilities: Arc<ProviderCapabilityRegistry>,
}

impl ToolFilter {
    pub fn new(
        catalogue: Arc<dyn ToolCatalogue>,
        capabilities: Arc<ProviderCapabilityRegistry>,
    ) -> Self {
        Self {
            catalogue,
            capabilities,
        }
    }

    /// Tools to offer a (provider, model) pair under the given permissions
    pub fn get_tools_for_provider(
        &self,
        provider_id: &str,
        model_id: &str,
        permissions: &ToolPermissions,
    ) -> Vec<ToolDefinition> {
        let disabled = self.capabilities.disabled_tools(provider_id, model_id);
        if disabled.is_wildcard() {
            tracing::debug!(
                target: "tandem.tools.filter",
                provider = provider_id,
                model = model_id,
                "All tools disabled for this model"
            );
            return Vec::new();
        }

        let catalogue = self.catalogue.all_tools();
        let total = catalogue.len();
        let allowed: Vec<ToolDefinition> = catalogue
            .into_iter()
            .filter(|tool| permissions.allows(&tool.name))
            .filter(|tool| !disabled.contains(&tool.name))
            .collect();

        tracing::debug!(
            target: "tandem.tools.filter",
            provider = provider_id,
            model = model_id,
            offered = allowed.len(),
            withheld = total - allowed.len(),
            "Filtered tool set"
        );

        self.capabilities
            .transform_tools(provider_id, model_id, &allowed)
    }

    /// Compatibility diagnostics for one tool
    pub fn compatibility(
        &self,
        tool_name: &str,
        provider_id: &str,
        model_id: &str,
    ) -> ToolCompatibility {
        let catalogue = self.catalogue.all_tools();
        let Some(tool) = catalogue.iter().find(|t| t.name == tool_name) else {
            return ToolCompatibility {
                compatible: false,
                warnings: vec![format!("'{}' is not in the tool catalogue", tool_name)],
                suggested_alternative: None,
            };
        };

        if let Some(reason) = self
            .capabilities
            .disabled_reason(tool_name, provider_id, model_id)
        {
            let disabled = self.capabilities.disabled_tools(provider_id, model_id);
            let suggested_alternative = ALTERNATIVES
                .iter()
                .find(|(from, _)| *from == tool_name)
                .map(|(_, to)| *to)
                .filter(|alt| !disabled.contains(alt))
                .filter(|alt| catalogue.iter().any(|t| t.name == *alt))
                .map(str::to_string);
            return ToolCompatibility {
                compatible: false,
                warnings: vec![reason],
                suggested_alternative,
            };
        }

        let mut warnings = Vec::new();
        let transformed = self
            .capabilities
            .transform_tools(provider_id, model_id, std::slice::from_ref(tool));
        if transformed.first() != Some(tool) {
            warnings.push(format!(
                "schema for '{}' is rewritten for {}",
                tool_name, provider_id
            ));
        }

        ToolCompatibility {
            compatible: true,
            warnings,
            suggested_alternative: None,
        }
    }
}
