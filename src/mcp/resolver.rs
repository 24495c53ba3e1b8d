//! Content normalization for MCP payloads
//!
//! Servers are loose about the shapes they send: schemas may be missing or
//! serialized, content may be typed items, bare strings or nested lists.
//! Everything here is pure and does no I/O; the capability client calls it
//! to turn wire payloads into a handful of canonical values.
//!
//! Three rule sets live here:
//!
//! - schema normalization ([`normalize_schema`], [`normalize_typed_schema`])
//! - content-to-text flattening ([`classify`], [`content_to_text`],
//!   [`flatten_prompt`])
//! - first-entry resolution ([`resolve_resource_content`],
//!   [`resolve_tool_content`])

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Schema used when a tool declares none: an object accepting anything.
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Schema used when a tool declares something that is not an object.
pub fn untyped_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// Normalize a wire `inputSchema` into a concrete JSON object.
///
/// Rules, first match wins:
///
/// 1. absent or `null` → [`empty_object_schema`]
/// 2. already an object → unchanged
/// 3. a string holding a serialized object → the parsed object
/// 4. anything else → [`untyped_object_schema`]
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::resolver::normalize_schema;
/// use serde_json::json;
///
/// assert_eq!(normalize_schema(None), json!({"type": "object", "properties": {}}));
/// assert_eq!(normalize_schema(Some(&json!(7))), json!({"type": "object"}));
/// ```
pub fn normalize_schema(schema: Option<&Value>) -> Value {
    match schema {
        None | Some(Value::Null) => empty_object_schema(),
        Some(object @ Value::Object(_)) => object.clone(),
        Some(Value::String(serialized)) => match serde_json::from_str::<Value>(serialized) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => untyped_object_schema(),
        },
        Some(_) => untyped_object_schema(),
    }
}

/// Normalize a strongly typed schema through its `Serialize` impl, then apply
/// the same rules as [`normalize_schema`].
pub fn normalize_typed_schema<T: Serialize>(schema: &T) -> Value {
    match serde_json::to_value(schema) {
        Ok(value) => normalize_schema(Some(&value)),
        Err(_) => untyped_object_schema(),
    }
}

/// The shape of one content value, checked in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentShape<'a> {
    /// `{"type": "text", "text": "..."}`
    TypedText(&'a str),
    /// A list of further content values
    Nested(&'a [Value]),
    /// Any other object carrying a string `text` member
    TextLike(&'a str),
    /// A bare JSON string
    Plain(&'a str),
    /// Anything else
    Opaque(&'a Value),
}

/// Classify a content value.
///
/// Order matters: a typed text item is also text-like, so the typed check
/// runs first.
pub fn classify(value: &Value) -> ContentShape<'_> {
    match value {
        Value::Object(map) => {
            let text = map.get("text").and_then(Value::as_str);
            match (map.get("type").and_then(Value::as_str), text) {
                (Some("text"), Some(text)) => ContentShape::TypedText(text),
                (_, Some(text)) => ContentShape::TextLike(text),
                _ => ContentShape::Opaque(value),
            }
        }
        Value::Array(items) => ContentShape::Nested(items),
        Value::String(text) => ContentShape::Plain(text),
        other => ContentShape::Opaque(other),
    }
}

/// Flatten a content value to text. Every leaf contributes its text followed
/// by a newline; lists are flattened recursively.
///
/// Unrecognized values contribute their compact JSON form.
///
/// # Examples
///
/// ```
/// use mcp_bridge::mcp::resolver::content_to_text;
/// use serde_json::json;
///
/// let content = json!([{"type": "text", "text": "a"}, ["b", {"text": "c"}]]);
/// assert_eq!(content_to_text(&content), "a\nb\nc\n");
/// ```
pub fn content_to_text(value: &Value) -> String {
    let mut out = String::new();
    push_text(value, &mut out);
    out
}

fn push_text(value: &Value, out: &mut String) {
    match classify(value) {
        ContentShape::Nested(items) => {
            for item in items {
                push_text(item, out);
            }
        }
        ContentShape::TypedText(text) | ContentShape::TextLike(text) | ContentShape::Plain(text) => {
            out.push_str(text);
            out.push('\n');
        }
        ContentShape::Opaque(other) => {
            out.push_str(&other.to_string());
            out.push('\n');
        }
    }
}

/// The content carried by a prompt message: its `content` member when it
/// has one, otherwise the message itself.
pub fn message_content(message: &Value) -> &Value {
    message.get("content").unwrap_or(message)
}

/// Concatenate the text of every prompt message and trim the result.
///
/// Zero messages yield an empty string.
pub fn flatten_prompt(messages: &[Value]) -> String {
    let mut out = String::new();
    for message in messages {
        push_text(message_content(message), &mut out);
    }
    out.trim().to_string()
}

/// First content entry of a resource read.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceContent {
    /// Textual resource
    Text(String),
    /// Binary resource, already base64-decoded
    Binary(Vec<u8>),
    /// An entry that is neither text nor blob, passed through untouched
    Opaque(Value),
}

impl fmt::Display for ResourceContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceContent::Text(text) => write!(f, "{}", text),
            ResourceContent::Binary(bytes) => write!(f, "<{} bytes of binary content>", bytes.len()),
            ResourceContent::Opaque(value) => write!(f, "{}", value),
        }
    }
}

/// Resolve the first entry of a `resources/read` result.
///
/// Only entry zero is inspected; callers needing further parts must read
/// them separately.
///
/// # Errors
///
/// - [`BridgeError::NoContent`] when `entries` is empty.
/// - [`BridgeError::Mcp`] when a `blob` is not valid base64.
pub fn resolve_resource_content(uri: &str, entries: &[Value]) -> Result<ResourceContent> {
    let Some(first) = entries.first() else {
        return Err(BridgeError::NoContent(uri.to_string()).into());
    };

    if let Some(text) = first.get("text").and_then(Value::as_str) {
        return Ok(ResourceContent::Text(text.to_string()));
    }

    if let Some(blob) = first.get("blob").and_then(Value::as_str) {
        let bytes = STANDARD.decode(blob.trim()).map_err(|e| {
            BridgeError::Mcp(format!("resource {} has an invalid base64 blob: {}", uri, e))
        })?;
        return Ok(ResourceContent::Binary(bytes));
    }

    Ok(ResourceContent::Opaque(first.clone()))
}

/// Resolved result of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// The first content entry was a typed text item
    Text(String),
    /// Any other first entry, passed through untouched
    Opaque(Value),
}

impl ToolOutput {
    /// The text, when the output is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolOutput::Text(text) => Some(text),
            ToolOutput::Opaque(_) => None,
        }
    }

    /// JSON form suitable for feeding back into a conversation.
    pub fn into_value(self) -> Value {
        match self {
            ToolOutput::Text(text) => Value::String(text),
            ToolOutput::Opaque(value) => value,
        }
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutput::Text(text) => write!(f, "{}", text),
            ToolOutput::Opaque(value) => write!(f, "{}", value),
        }
    }
}

/// Resolve the first entry of a `tools/call` result.
///
/// `None` means the tool produced no content, which is a normal outcome.
pub fn resolve_tool_content(entries: &[Value]) -> Option<ToolOutput> {
    let first = entries.first()?;
    Some(match classify(first) {
        ContentShape::TypedText(text) => ToolOutput::Text(text.to_string()),
        _ => ToolOutput::Opaque(first.clone()),
    })
}
