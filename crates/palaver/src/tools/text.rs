//! `text_transform`: simple string transformations and counts.

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Operation performed by `text_transform`.
#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TextOperation {
    Uppercase,
    Lowercase,
    Reverse,
    WordCount,
    CharCount,
    Capitalize,
}

/// Typed arguments for `text_transform`.
#[derive(Deserialize, JsonSchema)]
pub struct TextTransformArgs {
    /// The text to transform.
    pub text: String,
    /// Operation to perform.
    pub operation: TextOperation,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextTransform;

impl Tool for TextTransform {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder(
            "text_transform",
            "Transform text (uppercase, lowercase, reverse, capitalize) or count its words or characters",
        )
        .parameters_for::<TextTransformArgs>()
        .example(
            r#"{"text": "hello world", "operation": "capitalize"}"#,
            "Capitalized: Hello World",
        )
        .output_format("'<Label>: <result>'")
        .to_tool_def()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        let args = parse_tool_args::<TextTransformArgs>(arguments);
        Box::pin(async move {
            let args = args?;
            Ok(Value::String(transform(&args.text, args.operation)))
        })
    }
}

pub fn transform(text: &str, operation: TextOperation) -> String {
    match operation {
        TextOperation::Uppercase => format!("Uppercase: {}", text.to_uppercase()),
        TextOperation::Lowercase => format!("Lowercase: {}", text.to_lowercase()),
        TextOperation::Reverse => format!("Reversed: {}", text.chars().rev().collect::<String>()),
        TextOperation::WordCount => format!("Word count: {}", text.split_whitespace().count()),
        TextOperation::CharCount => format!(
            "Character count: {} (including spaces)",
            text.chars().count()
        ),
        TextOperation::Capitalize => format!("Capitalized: {}", title_case(text)),
    }
}

/// Uppercase the first letter of every run of letters, lowercase the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn each_operation() {
        assert_eq!(transform("Hi there", TextOperation::Uppercase), "Uppercase: HI THERE");
        assert_eq!(transform("Hi there", TextOperation::Lowercase), "Lowercase: hi there");
        assert_eq!(transform("abc", TextOperation::Reverse), "Reversed: cba");
        assert_eq!(transform("  one two\tthree ", TextOperation::WordCount), "Word count: 3");
        assert_eq!(
            transform("héllo", TextOperation::CharCount),
            "Character count: 5 (including spaces)"
        );
        assert_eq!(
            transform("hELLO wORLD o'neil", TextOperation::Capitalize),
            "Capitalized: Hello World O'Neil"
        );
    }

    #[test]
    fn schema_lists_operations() {
        let def = TextTransform.definition();
        let schema = def.function.parameters.to_string();
        for op in ["uppercase", "word_count", "capitalize"] {
            assert!(schema.contains(op), "schema missing {op}");
        }
    }

    #[tokio::test]
    async fn unknown_operation_is_an_error() {
        let mut args = Map::new();
        args.insert("text".into(), json!("x"));
        args.insert("operation".into(), json!("shout"));
        let err = TextTransform.execute(&args).await.unwrap_err();
        assert!(err.starts_with("invalid tool arguments"));
    }
}
