// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool schema rewriting for providers with stricter JSON Schema dialects

use serde_json::{Map, Value};

use crate::llm::capabilities::detect::ModelFamily;
use crate::llm::provider::{ToolDefinition, ToolInputSchema};

/// String formats Gemini accepts
const GEMINI_STRING_FORMATS: &[&str] = &["enum", "date-time"];

/// One schema rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRule {
    /// Optional-with-default properties become required, nullable, defaultless
    NullableOptionals,
    /// Remove string formats outside the accepted set
    StripStringFormats,
    /// Enum members become strings
    StringEnums,
}

/// Rules that apply to a destination
pub fn schema_rules(provider_id: &str, family: ModelFamily) -> Vec<SchemaRule> {
    match (provider_id, family) {
        ("openai", _) | (_, ModelFamily::Gpt) | (_, ModelFamily::Reasoning) => {
            vec![SchemaRule::NullableOptionals]
        }
        ("google", _) | ("gemini", _) | (_, ModelFamily::Gemini) => {
            vec![SchemaRule::StripStringFormats, SchemaRule::StringEnums]
        }
        _ => vec![],
    }
}

/// Rewrite a tool definition under the given rules
pub fn transform_tool(tool: &ToolDefinition, rules: &[SchemaRule]) -> ToolDefinition {
    if rules.is_empty() {
        return tool.clone();
    }

    let mut properties = tool.input_schema.properties.clone();
    let mut required = tool.input_schema.required.clone();
    if let Value::Object(map) = &mut properties {
        rewrite_properties(map, &mut required, rules);
    }

    ToolDefinition {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: ToolInputSchema {
            schema_type: tool.input_schema.schema_type.clone(),
            properties,
            required,
        },
    }
}

fn rewrite_properties(
    properties: &mut Map<String, Value>,
    required: &mut Vec<String>,
    rules: &[SchemaRule],
) {
    for (name, schema) in properties.iter_mut() {
        if rules.contains(&SchemaRule::NullableOptionals) && !required.contains(name) {
            if let Value::Object(node) = schema {
                if node.remove("default").is_some() {
                    make_nullable(node);
                    required.push(name.clone());
                }
            }
        }
        rewrite_node(schema, rules);
    }
}

fn make_nullable(node: &mut Map<String, Value>) {
    // A closed value set must admit null too
    if let Some(Value::Array(members)) = node.get_mut("enum") {
        if !members.contains(&Value::Null) {
            members.push(Value::Null);
        }
    }
    match node.get("type").cloned() {
        Some(Value::String(kind)) if kind != "null" => {
            node.insert(
                "type".to_string(),
                Value::Array(vec![Value::String(kind), Value::String("null".into())]),
            );
        }
        Some(Value::String(_)) => {}
        Some(Value::Array(mut kinds)) => {
            if !kinds.iter().any(|k| k == "null") {
                kinds.push(Value::String("null".into()));
                node.insert("type".to_string(), Value::Array(kinds));
            }
        }
        _ => {
            let mut variants = match node.remove("anyOf") {
                Some(Value::Array(variants)) => variants,
                _ => vec![],
            };
            variants.push(serde_json::json!({"type": "null"}));
            node.insert("anyOf".to_string(), Value::Array(variants));
        }
    }
}

fn is_string_type(node: &Map<String, Value>) -> bool {
    match node.get("type") {
        Some(Value::String(kind)) => kind == "string",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k == "string"),
        _ => false,
    }
}

fn rewrite_node(schema: &mut Value, rules: &[SchemaRule]) {
    let Value::Object(node) = schema else {
        return;
    };

    if rules.contains(&SchemaRule::StripStringFormats) && is_string_type(node) {
        let keep = matches!(
            node.get("format"),
            Some(Value::String(format)) if GEMINI_STRING_FORMATS.contains(&format.as_str())
        );
        if !keep {
            node.remove("format");
        }
    }

    if rules.contains(&SchemaRule::StringEnums) {
        if let Some(Value::Array(members)) = node.remove("enum") {
            let members: Vec<Value> = members
                .into_iter()
                .map(|member| match member {
                    Value::String(_) => member,
                    Value::Null => Value::String("null".to_string()),
                    other => Value::String(other.to_string()),
                })
                .collect();
            node.insert("enum".to_string(), Value::Array(members));
            node.insert("type".to_string(), Value::String("string".into()));
        }
    }

    // Nested object properties
    if node.contains_key("properties") {
        let mut required: Vec<String> = node
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| {
                r.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let before = required.len();
        if let Some(Value::Object(props)) = node.get_mut("properties") {
            rewrite_properties(props, &mut required, rules);
        }
        if required.len() != before {
            node.insert(
                "required".to_string(),
                Value::Array(required.into_iter().map(Value::String).collect()),
            );
        }
    }

    if let Some(items) = node.get_mut("items") {
        rewrite_node(items, rules);
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(variants)) = node.get_mut(key) {
            for variant in variants.iter_mut() {
                rewrite_node(variant, rules);
            }
        }
    }
}
