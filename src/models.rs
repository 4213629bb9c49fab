//! Request Data Model
//!
//! Wire structures for chat-completion requests as they pass through the
//! router. The model is deliberately lenient: fields the router does not
//! understand are preserved verbatim through `extra` maps, and content
//! shapes it cannot interpret fall back to raw JSON so that a request is
//! never rejected for carrying something new.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A chat-completion request. The router reads it, mutates `model` and
/// (sometimes) `system` in place, and annotates `session_id`; everything
/// else is carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Requested model, possibly in compound `"provider,model"` form.
    #[serde(default)]
    pub model: String,

    /// Ordered message history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    /// System prompt: a plain string or an ordered list of segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Declared tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDecl>>,

    /// Extended-thinking configuration, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    /// Request metadata; `user_id` may encode a session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Session id derived from `metadata.user_id`, written by the router.
    /// Rides the wire as `sessionId`.
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,

    /// Fields this router does not interpret, preserved round-trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One message of the history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Message content: plain text, a list of typed parts, or any other shape
/// (kept verbatim, counted as zero tokens).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Other(Value),
}

/// A typed content part. `kind` discriminates; unknown kinds pass through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Tool invocation arguments (`tool_use` parts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// Tool output (`tool_result` parts); a string or structured JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// System prompt: a bare string or a list of segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Segments(Vec<SystemSegment>),
    Other(Value),
}

/// One system prompt segment. A segment with no wire `type` field keeps
/// an empty `kind` and is carried through without being counted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSegment {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub text: SystemText,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Segment text: a single string or a list of strings (entries may be
/// null on the wire and count as empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemText {
    One(String),
    Many(Vec<Option<String>>),
}

impl Default for SystemText {
    fn default() -> Self {
        SystemText::One(String::new())
    }
}

/// A declared tool, or any shape we do not recognize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolDecl {
    Tool(Tool),
    Other(Value),
}

/// Tool declaration. `kind` carries the wire `type` field (e.g.
/// `web_search_20250305`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tool {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Extended-thinking request configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Request metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Caller account identifier; a `_session_` infix marks the session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
