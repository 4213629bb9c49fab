//! Token Estimation
//!
//! Estimates the token cost of a request's message history, system prompt,
//! and tool declarations. Counting never fails: shapes the estimator does
//! not recognize contribute zero tokens.
//!
//! Encoding goes through the [`TokenEncoder`] seam; the production encoder
//! is the shared o200k BPE, which takes a few hundred milliseconds to build
//! and is therefore primed once at startup via [`preload_tokenizer`].

use crate::models::{ChatRequest, Message, MessageContent, SystemPrompt, SystemText, ToolDecl};
use std::sync::Arc;

/// Turns text into a token count. Implementations must be cheap to call on
/// the request path.
pub trait TokenEncoder: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn encoded_len(&self, text: &str) -> u64;
}

/// o200k BPE encoder backed by the process-wide singleton.
#[derive(Debug, Clone, Copy, Default)]
pub struct O200kEncoder;

impl TokenEncoder for O200kEncoder {
    fn encoded_len(&self, text: &str) -> u64 {
        tiktoken_rs::o200k_base_singleton()
            .encode_with_special_tokens(text)
            .len() as u64
    }
}

/// Build the lazily-initialized BPE tables now, outside the request path.
pub fn preload_tokenizer() {
    let _ = tiktoken_rs::o200k_base_singleton();
}

/// Request token estimator.
#[derive(Clone)]
pub struct TokenEstimator {
    encoder: Arc<dyn TokenEncoder>,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(Arc::new(O200kEncoder))
    }
}

impl TokenEstimator {
    /// Create an estimator over the given encoder.
    pub fn new(encoder: Arc<dyn TokenEncoder>) -> Self {
        Self { encoder }
    }

    /// Estimate the token cost of a whole request.
    pub fn estimate_request(&self, req: &ChatRequest) -> u64 {
        self.estimate(
            req.messages.as_deref().unwrap_or_default(),
            req.system.as_ref(),
            req.tools.as_deref().unwrap_or_default(),
        )
    }

    /// Estimate the combined token cost of messages, system prompt, and
    /// tool declarations. Total is always ≥ 0 and deterministic for
    /// unchanged inputs.
    pub fn estimate(
        &self,
        messages: &[Message],
        system: Option<&SystemPrompt>,
        tools: &[ToolDecl],
    ) -> u64 {
        let mut total = 0u64;

        for message in messages {
            total += self.count_content(message.content.as_ref());
        }

        total += self.count_system(system);

        for tool in tools {
            let ToolDecl::Tool(tool) = tool else {
                continue;
            };
            if let Some(description) = tool.description.as_deref() {
                total += self
                    .encoder
                    .encoded_len(&format!("{}{}", tool.name, description));
            }
            if let Some(schema) = tool.input_schema.as_ref() {
                total += self.count_json(schema);
            }
        }

        total
    }

    fn count_content(&self, content: Option<&MessageContent>) -> u64 {
        match content {
            Some(MessageContent::Text(text)) => self.encoder.encoded_len(text),
            Some(MessageContent::Parts(parts)) => {
                let mut sum = 0u64;
                for part in parts {
                    match part.kind.as_str() {
                        "text" => {
                            if let Some(text) = part.text.as_deref() {
                                sum += self.encoder.encoded_len(text);
                            }
                        }
                        "tool_use" => {
                            if let Some(input) = part.input.as_ref() {
                                sum += self.count_json(input);
                            }
                        }
                        "tool_result" => match part.content.as_ref() {
                            Some(serde_json::Value::String(text)) => {
                                sum += self.encoder.encoded_len(text);
                            }
                            Some(other) => sum += self.count_json(other),
                            None => {}
                        },
                        _ => {}
                    }
                }
                sum
            }
            _ => 0,
        }
    }

    fn count_system(&self, system: Option<&SystemPrompt>) -> u64 {
        match system {
            Some(SystemPrompt::Text(text)) => self.encoder.encoded_len(text),
            Some(SystemPrompt::Segments(segments)) => {
                let mut sum = 0u64;
                for segment in segments {
                    if segment.kind != "text" {
                        continue;
                    }
                    match &segment.text {
                        SystemText::One(text) => sum += self.encoder.encoded_len(text),
                        SystemText::Many(entries) => {
                            for entry in entries {
                                sum += self.encoder.encoded_len(entry.as_deref().unwrap_or(""));
                            }
                        }
                    }
                }
                sum
            }
            _ => 0,
        }
    }

    fn count_json(&self, value: &serde_json::Value) -> u64 {
        serde_json::to_string(value)
            .map(|text| self.encoder.encoded_len(&text))
            .unwrap_or(0)
    }
}
