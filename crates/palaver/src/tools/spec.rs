//! Structured tool descriptions with usage guidance.
//!
//! `ToolSpec` assembles a tool's description from structured parts (purpose,
//! when to use, when not to use, examples, output format) so every built-in
//! tool describes itself to the model in the same shape.

use crate::ToolDef;
use serde_json::Value;

/// A structured tool specification.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name (must be unique within a registry).
    pub name: String,
    /// One-sentence imperative purpose: "Evaluate an arithmetic expression".
    pub purpose: String,
    pub when_to_use: Option<String>,
    /// When this tool should NOT be used (prevents confusion with similar tools).
    pub when_not_to_use: Option<String>,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
    /// Usage examples as (input, expected behavior) pairs.
    pub examples: Vec<UsageExample>,
    pub output_format: Option<String>,
}

/// A usage example for a tool.
#[derive(Debug, Clone)]
pub struct UsageExample {
    pub input: String,
    pub output: String,
}

impl ToolSpec {
    /// Start a builder. Name and purpose are the only required fields.
    pub fn builder(name: impl Into<String>, purpose: impl Into<String>) -> ToolSpecBuilder {
        ToolSpecBuilder {
            spec: ToolSpec {
                name: name.into(),
                purpose: purpose.into(),
                when_to_use: None,
                when_not_to_use: None,
                parameters: serde_json::json!({"type": "object", "properties": {}}),
                examples: Vec::new(),
                output_format: None,
            },
        }
    }

    /// Render the structured fields as a description string for the model.
    pub fn to_description(&self) -> String {
        let mut desc = format!("{}.", self.purpose.trim_end_matches('.'));
        if let Some(when) = &self.when_to_use {
            desc.push_str(&format!("\nWhen to use: {when}"));
        }
        if let Some(when_not) = &self.when_not_to_use {
            desc.push_str(&format!("\nWhen NOT to use: {when_not}"));
        }
        if !self.examples.is_empty() {
            desc.push_str("\nExamples:");
            for ex in &self.examples {
                desc.push_str(&format!("\n  - Input: {} -> {}", ex.input, ex.output));
            }
        }
        if let Some(format) = &self.output_format {
            desc.push_str(&format!("\nOutput format: {format}"));
        }
        desc
    }

    /// Convert to the `ToolDef` sent to the API.
    pub fn to_tool_def(&self) -> ToolDef {
        ToolDef::new(
            self.name.clone(),
            self.to_description(),
            self.parameters.clone(),
        )
    }
}

/// Builder for [`ToolSpec`].
#[derive(Debug, Clone)]
pub struct ToolSpecBuilder {
    spec: ToolSpec,
}

impl ToolSpecBuilder {
    pub fn when_to_use(mut self, when: impl Into<String>) -> Self {
        self.spec.when_to_use = Some(when.into());
        self
    }

    pub fn when_not_to_use(mut self, when_not: impl Into<String>) -> Self {
        self.spec.when_not_to_use = Some(when_not.into());
        self
    }

    pub fn parameters(mut self, params: Value) -> Self {
        self.spec.parameters = params;
        self
    }

    /// Derive JSON Schema parameters from a type implementing `schemars::JsonSchema`.
    ///
    /// The schema is generated from the same type the tool deserializes its
    /// arguments into, so the two cannot drift apart.
    pub fn parameters_for<T: schemars::JsonSchema>(self) -> Self {
        self.parameters(crate::json_schema_for::<T>())
    }

    pub fn example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.spec.examples.push(UsageExample {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.spec.output_format = Some(format.into());
        self
    }

    pub fn build(self) -> ToolSpec {
        self.spec
    }

    /// Shortcut for `.build().to_tool_def()`.
    pub fn to_tool_def(self) -> ToolDef {
        self.spec.to_tool_def()
    }
}
