// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool definition helpers
//!
//! Schemas are written once in a neutral JSON Schema form; provider
//! dialects are derived later by the capability registry.

use serde_json::Value;

use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// Helper to create a tool input schema
pub struct SchemaBuilder {
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            properties: serde_json::Map::new(),
            required: vec![],
        }
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Add a string property
    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({"type": "string", "description": description}),
            required,
        )
    }

    /// Add a string property with a `format` (uri, email, date-time, ...)
    pub fn string_with_format(
        self,
        name: &str,
        description: &str,
        format: &str,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({"type": "string", "description": description, "format": format}),
            required,
        )
    }

    /// Add an integer property
    pub fn integer(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({"type": "integer", "description": description}),
            required,
        )
    }

    /// Add a boolean property
    pub fn boolean(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({"type": "boolean", "description": description}),
            required,
        )
    }

    /// Add an array property
    pub fn array(self, name: &str, description: &str, item_type: &str, required: bool) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": "array",
                "description": description,
                "items": {"type": item_type}
            }),
            required,
        )
    }

    /// Add an optional property with a default value
    pub fn optional_with_default(
        self,
        name: &str,
        description: &str,
        value_type: &str,
        default: Value,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": value_type,
                "description": description,
                "default": default
            }),
            false,
        )
    }

    /// Add a property restricted to a fixed set of values
    pub fn enumeration(
        self,
        name: &str,
        description: &str,
        value_type: &str,
        values: Vec<Value>,
        required: bool,
    ) -> Self {
        self.property(
            name,
            serde_json::json!({
                "type": value_type,
                "description": description,
                "enum": values
            }),
            required,
        )
    }

    /// Build the schema
    pub fn build(self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: Value::Object(self.properties),
            required: self.required,
        }
    }

    /// Build a complete tool definition
    pub fn into_tool(self, name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: self.build(),
        }
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
