//! Local inference engine interface.
//!
//! The agent talks to the engine only through [`InferenceEngine`], so tests can
//! substitute [`MockEngine`] for the real [`OllamaClient`].

mod mock;
mod ollama;

pub use mock::MockEngine;
pub use ollama::OllamaClient;
pub(crate) use ollama::model_matches;

use crate::config::SamplingSettings;
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", "assistant" or "tool".
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Name of the tool whose result this message carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role("assistant", content)
    }

    /// An assistant message that requested tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role("assistant", content)
        }
    }

    /// The result of one tool invocation.
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::with_role("tool", content)
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details. `arguments` is not guaranteed to match any schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// Tool descriptor offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDescriptor,
}

/// Function specification inside a [`ToolDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: serde_json::Value,
}

/// Sampling options sent with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub num_predict: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl From<&SamplingSettings> for SamplingOptions {
    fn from(s: &SamplingSettings) -> Self {
        Self {
            temperature: s.temperature,
            num_predict: s.num_predict,
            top_k: s.top_k,
            top_p: s.top_p,
        }
    }
}

/// Body of a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
    pub stream: bool,
    pub options: SamplingOptions,
}

/// A non-streaming chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

impl ChatResponse {
    /// Tool calls in the order the model emitted them.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// Lazy sequence of content deltas from a streamed completion.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A chat-capable local inference engine.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Single non-streaming completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Streaming completion yielding non-empty content deltas.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream>;

    /// Whether the engine is reachable and has `model` available.
    async fn is_model_available(&self, model: &str) -> bool;

    /// Download `model` into the engine.
    async fn pull_model(&self, model: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization_skips_empty_tools() {
        let request = ChatRequest {
            model: "qwen2.5:7b".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: Vec::new(),
            stream: true,
            options: SamplingOptions {
                temperature: 0.7,
                num_predict: 512,
                top_k: None,
                top_p: None,
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "qwen2.5:7b",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "options": {"temperature": 0.7, "num_predict": 512}
            })
        );
    }

    #[test]
    fn test_response_with_tool_calls() {
        let response: ChatResponse = serde_json::from_value(json!({
            "model": "qwen2.5:7b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "getStudentCount", "arguments": {}}},
                    {"function": {"name": "listCourses", "arguments": {"limit": 3}}}
                ]
            },
            "done": true
        }))
        .unwrap();

        let names: Vec<_> = response
            .tool_calls()
            .iter()
            .map(|c| c.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["getStudentCount", "listCourses"]);
    }

    #[test]
    fn test_response_without_tool_calls() {
        let response: ChatResponse = serde_json::from_value(json!({
            "message": {"role": "assistant", "content": "Hello"}
        }))
        .unwrap();
        assert!(response.tool_calls().is_empty());
        assert_eq!(response.message.content, "Hello");
    }
}
