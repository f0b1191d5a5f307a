//! Ollama client over its native `/api/chat` tool-calling interface.

use super::{ChatRequest, ChatResponse, DeltaStream, InferenceEngine};
use crate::config::OllamaSettings;
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}

/// One NDJSON line of a streamed chat.
#[derive(Debug, Default, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a client from settings.
    pub fn from_settings(settings: &OllamaSettings) -> Result<Self> {
        Self::new(
            settings.host.clone(),
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models the server has locally.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| LmsError::EngineUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LmsError::EngineUnavailable(format!(
                "/api/tags returned {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn error_from(response: reqwest::Response) -> LmsError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        LmsError::Inference(format!("Ollama returned {}: {}", status, body.trim()))
    }
}

/// Whether `wanted` names one of `available` exactly or as a tag prefix.
pub(crate) fn model_matches(available: &[String], wanted: &str) -> bool {
    available
        .iter()
        .any(|name| name == wanted || name.starts_with(wanted))
}

/// Split complete lines off the front of `buffer`, leaving any partial line.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(line);
    }
    lines
}

/// Parse one NDJSON line into `(content, done)`.
fn parse_stream_line(line: &[u8]) -> Result<Option<(String, bool)>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let parsed: StreamLine = serde_json::from_str(text)?;
    if let Some(error) = parsed.error {
        return Err(LmsError::Inference(error));
    }
    let content = parsed.message.map(|m| m.content).unwrap_or_default();
    Ok(Some((content, parsed.done)))
}

#[async_trait]
impl InferenceEngine for OllamaClient {
    #[instrument(skip_all, fields(model = %request.model, tools = request.tools.len()))]
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = request.clone();
        body.stream = false;

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Err(LmsError::Inference("Empty response from Ollama".to_string()));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        debug!(
            "Decide round returned {} tool call(s)",
            parsed.tool_calls().len()
        );
        Ok(parsed)
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        let mut body = request.clone();
        body.stream = true;

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();

            'outer: while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        yield Err(LmsError::from(e));
                        return;
                    }
                }

                for line in drain_lines(&mut buffer) {
                    match parse_stream_line(&line) {
                        Ok(Some((content, done))) => {
                            if !content.is_empty() {
                                yield Ok(content);
                            }
                            if done {
                                break 'outer;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // Trailing line without a newline.
            match parse_stream_line(&buffer) {
                Ok(Some((content, _))) if !content.is_empty() => {
                    yield Ok(content);
                }
                Ok(_) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn is_model_available(&self, model: &str) -> bool {
        match self.list_models().await {
            Ok(models) => model_matches(&models, model),
            Err(e) => {
                warn!("Ollama availability check failed: {}", e);
                false
            }
        }
    }

    #[instrument(skip(self))]
    async fn pull_model(&self, model: &str) -> Result<()> {
        info!("Pulling model {}", model);
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({ "model": model, "stream": false }))
            .send()
            .await
            .map_err(|e| LmsError::EngineUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let status: serde_json::Value = response.json().await?;
        if let Some(error) = status.get("error").and_then(|e| e.as_str()) {
            return Err(LmsError::Inference(error.to_string()));
        }

        info!("Model {} pulled successfully", model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matches_exact_and_prefix() {
        let available = vec!["qwen2.5:7b".to_string(), "llama3.1:latest".to_string()];
        assert!(model_matches(&available, "qwen2.5:7b"));
        assert!(model_matches(&available, "llama3.1"));
        assert!(!model_matches(&available, "mistral"));
        assert!(!model_matches(&[], "qwen2.5:7b"));
    }

    #[test]
    fn test_drain_lines_keeps_partial_tail() {
        let mut buffer = b"{\"a\":1}\n{\"b\":2}\n{\"c\"".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 2);
        assert_eq!(buffer, b"{\"c\"".to_vec());

        buffer.extend_from_slice(b":3}\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"c\":3}\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_parse_stream_line() {
        let line = br#"{"model":"qwen2.5:7b","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(
            parse_stream_line(line).unwrap(),
            Some(("Hi".to_string(), false))
        );

        let done = br#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":12}"#;
        assert_eq!(
            parse_stream_line(done).unwrap(),
            Some((String::new(), true))
        );

        assert_eq!(parse_stream_line(b"  \n").unwrap(), None);
    }

    #[test]
    fn test_parse_stream_line_error() {
        let err = parse_stream_line(br#"{"error":"model not found"}"#).unwrap_err();
        assert!(matches!(err, LmsError::Inference(msg) if msg == "model not found"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_unavailable() {
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!client.is_model_available("qwen2.5:7b").await);
    }
}
