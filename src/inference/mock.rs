//! Scripted inference engine for tests and offline runs.

use super::{ChatMessage, ChatRequest, ChatResponse, DeltaStream, InferenceEngine, ToolCall};
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

enum Scripted<T> {
    Ok(T),
    Fail(String),
}

/// One scripted streamed completion.
struct ScriptedStream {
    deltas: Vec<String>,
    /// Error raised after the deltas, if any.
    trailing_error: Option<String>,
}

/// An [`InferenceEngine`] that replays queued responses and records requests.
pub struct MockEngine {
    available: AtomicBool,
    replies: Mutex<VecDeque<Scripted<ChatResponse>>>,
    streams: Mutex<VecDeque<Scripted<ScriptedStream>>>,
    requests: Mutex<Vec<ChatRequest>>,
    pulled: Mutex<Vec<String>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockEngine {
    /// An available engine with nothing scripted.
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            pulled: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Queue a plain-text decide reply.
    pub fn push_text(&self, content: impl Into<String>) -> &Self {
        self.push_reply(ChatResponse {
            message: ChatMessage::assistant(content),
        })
    }

    /// Queue a decide reply requesting the given tool calls.
    pub fn push_tool_calls(&self, calls: Vec<ToolCall>) -> &Self {
        self.push_reply(ChatResponse {
            message: ChatMessage::assistant_tool_calls("", calls),
        })
    }

    pub fn push_reply(&self, reply: ChatResponse) -> &Self {
        guard(&self.replies).push_back(Scripted::Ok(reply));
        self
    }

    /// Queue a failing decide round.
    pub fn push_chat_error(&self, message: impl Into<String>) -> &Self {
        guard(&self.replies).push_back(Scripted::Fail(message.into()));
        self
    }

    /// Queue a streamed follow-up yielding `deltas`.
    pub fn push_stream<S: Into<String>>(&self, deltas: Vec<S>) -> &Self {
        guard(&self.streams).push_back(Scripted::Ok(ScriptedStream {
            deltas: deltas.into_iter().map(Into::into).collect(),
            trailing_error: None,
        }));
        self
    }

    /// Queue a streamed follow-up that breaks after `deltas`.
    pub fn push_broken_stream<S: Into<String>>(
        &self,
        deltas: Vec<S>,
        message: impl Into<String>,
    ) -> &Self {
        guard(&self.streams).push_back(Scripted::Ok(ScriptedStream {
            deltas: deltas.into_iter().map(Into::into).collect(),
            trailing_error: Some(message.into()),
        }));
        self
    }

    /// Queue a follow-up whose request itself fails.
    pub fn push_stream_error(&self, message: impl Into<String>) -> &Self {
        guard(&self.streams).push_back(Scripted::Fail(message.into()));
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        guard(&self.requests).clone()
    }

    /// Models pulled so far.
    pub fn pulled(&self) -> Vec<String> {
        guard(&self.pulled).clone()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceEngine for MockEngine {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        guard(&self.requests).push(request.clone());
        match guard(&self.replies).pop_front() {
            Some(Scripted::Ok(reply)) => Ok(reply),
            Some(Scripted::Fail(message)) => Err(LmsError::Inference(message)),
            None => Err(LmsError::Inference("No scripted reply".to_string())),
        }
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<DeltaStream> {
        guard(&self.requests).push(request.clone());
        let script = match guard(&self.streams).pop_front() {
            Some(Scripted::Ok(script)) => script,
            Some(Scripted::Fail(message)) => return Err(LmsError::Inference(message)),
            None => return Err(LmsError::Inference("No scripted stream".to_string())),
        };

        let stream = async_stream::stream! {
            for delta in script.deltas {
                tokio::task::yield_now().await;
                yield Ok(delta);
            }
            if let Some(message) = script.trailing_error {
                yield Err(LmsError::Inference(message));
            }
        };
        Ok(Box::pin(stream))
    }

    async fn is_model_available(&self, _model: &str) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn pull_model(&self, model: &str) -> Result<()> {
        guard(&self.pulled).push(model.to_string());
        self.set_available(true);
        Ok(())
    }
}
