//! Two-round agent loop.
//!
//! Round one offers the tool catalog and lets the model decide. Each requested
//! tool runs at most once, in order, and a successful result is handed back to
//! the model in a streamed follow-up round.

use super::tools::ToolRegistry;
use crate::config::{DirectEmit, Settings};
use crate::error::LmsError;
use crate::inference::{ChatMessage, ChatRequest, InferenceEngine, SamplingOptions, ToolCall};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lazy, consume-once sequence of text fragments for the client.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A message of the caller-supplied history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(default)]
    pub role: String,
    /// Usually a string; anything else is sent to the model as JSON text.
    #[serde(default)]
    pub content: Value,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(content.into()),
        }
    }

    /// Convert for the engine: `user` stays `user`, every other role becomes `assistant`.
    fn normalized(&self) -> ChatMessage {
        let content = match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if self.role == "user" {
            ChatMessage::user(content)
        } else {
            ChatMessage::assistant(content)
        }
    }
}

/// What happened to one requested tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// The tool ran; `result` goes to the follow-up round.
    Succeeded { tool: String, result: String },
    /// Unknown tool, invalid arguments or an execution failure.
    Failed { tool: String, error: String },
}

/// Tunables for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub decide: SamplingOptions,
    pub follow_up: SamplingOptions,
    pub direct_emit: DirectEmit,
    pub char_delay: Duration,
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.ollama.model.clone(),
            decide: SamplingOptions::from(&settings.ollama.decide),
            follow_up: SamplingOptions::from(&settings.ollama.follow_up),
            direct_emit: settings.agent.direct_emit,
            char_delay: Duration::from_millis(settings.agent.char_delay_ms),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Agent that answers a conversation, calling LMS tools when asked to.
#[derive(Clone)]
pub struct Agent {
    engine: Arc<dyn InferenceEngine>,
    registry: Arc<ToolRegistry>,
    config: AgentConfig,
}

/// Marked fragment for a round that produced no text.
pub const EMPTY_RESPONSE: &str = "\nError: The model returned an empty response.\n";

/// Final fragment for failures that end the turn.
pub fn apology(error: &LmsError) -> String {
    format!(
        "\n\nError: {}\n\nPlease try again or rephrase your request.",
        error
    )
}

impl Agent {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    /// System prompt followed by the normalized history.
    pub fn compose(system_prompt: &str, history: &[ConversationMessage]) -> Vec<ChatMessage> {
        std::iter::once(ChatMessage::system(system_prompt))
            .chain(history.iter().map(ConversationMessage::normalized))
            .collect()
    }

    /// Look up, validate and execute one tool call.
    pub async fn invoke(&self, call: &ToolCall) -> InvocationOutcome {
        let name = call.function.name.clone();

        let Some(tool) = self.registry.get(&name) else {
            warn!("Model requested unknown tool {}", name);
            return InvocationOutcome::Failed {
                error: format!("Function '{}' not found.", name),
                tool: name,
            };
        };

        info!(tool = %name, arguments = %call.function.arguments, "Executing tool");

        let args = match tool.validate(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %name, "Rejected tool arguments: {}", e);
                return InvocationOutcome::Failed {
                    tool: name,
                    error: e.to_string(),
                };
            }
        };

        match tool.handler.execute(args).await {
            Ok(result) => {
                debug!(tool = %name, "Tool result: {}", result);
                InvocationOutcome::Succeeded { tool: name, result }
            }
            Err(e) => {
                error!(tool = %name, "Tool execution failed: {}", e);
                InvocationOutcome::Failed {
                    tool: name,
                    error: e.to_string(),
                }
            }
        }
    }

    fn request(&self, messages: Vec<ChatMessage>, with_tools: bool) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            tools: if with_tools {
                self.registry.descriptors()
            } else {
                Vec::new()
            },
            stream: !with_tools,
            options: if with_tools {
                self.config.decide.clone()
            } else {
                self.config.follow_up.clone()
            },
        }
    }

    /// Drive one user turn, yielding fragments as they are produced.
    pub fn run(&self, system_prompt: &str, history: Vec<ConversationMessage>) -> FragmentStream {
        let agent = self.clone();
        let messages = Self::compose(system_prompt, &history);

        Box::pin(async_stream::stream! {
            info!(
                model = %agent.config.model,
                tools = agent.registry.len(),
                "Starting agent turn"
            );

            let decision = match agent.engine.chat(&agent.request(messages.clone(), true)).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Decide round failed: {}", e);
                    yield apology(&e);
                    return;
                }
            };

            let calls = decision.tool_calls().to_vec();

            if calls.is_empty() {
                debug!("No tool calls, emitting answer directly");
                let content = decision.message.content;
                if content.trim().is_empty() {
                    warn!("Model returned neither content nor tool calls");
                    yield EMPTY_RESPONSE.to_string();
                    return;
                }
                match agent.config.direct_emit {
                    DirectEmit::Whole => {
                        yield content;
                    }
                    DirectEmit::PerChar => {
                        for ch in content.chars() {
                            yield ch.to_string();
                            if !agent.config.char_delay.is_zero() {
                                tokio::time::sleep(agent.config.char_delay).await;
                            }
                        }
                    }
                }
                return;
            }

            info!("Model requested {} tool call(s)", calls.len());
            let assistant = ChatMessage::assistant_tool_calls(
                decision.message.content.clone(),
                calls.clone(),
            );

            for call in &calls {
                let (tool, result) = match agent.invoke(call).await {
                    InvocationOutcome::Succeeded { tool, result } => (tool, result),
                    InvocationOutcome::Failed { error, .. } => {
                        yield format!("\nError: {}\n", error);
                        continue;
                    }
                };

                let mut transcript = messages.clone();
                transcript.push(assistant.clone());
                transcript.push(ChatMessage::tool(tool, result));

                let mut deltas = match agent.engine.chat_stream(&agent.request(transcript, false)).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        error!("Follow-up round failed: {}", e);
                        yield apology(&e);
                        return;
                    }
                };

                let mut produced = false;
                while let Some(delta) = deltas.next().await {
                    match delta {
                        Ok(text) => {
                            if !text.is_empty() {
                                produced = true;
                                yield text;
                            }
                        }
                        Err(e) => {
                            error!("Follow-up stream broke: {}", e);
                            yield apology(&e);
                            return;
                        }
                    }
                }
                if !produced {
                    warn!(tool = %call.function.name, "Follow-up round produced no content");
                    yield EMPTY_RESPONSE.to_string();
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::lms_tools::lms_registry;
    use crate::agent::{SchemaNode, ToolDefinition, ToolHandler, ValidatedArgs};
    use crate::inference::MockEngine;
    use crate::store::{LmsStore, MemoryStore};
    use serde_json::json;

    fn config(direct_emit: DirectEmit) -> AgentConfig {
        let mut config = AgentConfig::from_settings(&Settings::default());
        config.direct_emit = direct_emit;
        config.char_delay = Duration::ZERO;
        config
    }

    fn agent(engine: Arc<MockEngine>, store: Arc<MemoryStore>) -> Agent {
        let registry = Arc::new(lms_registry(store).unwrap());
        Agent::new(engine, registry, config(DirectEmit::PerChar))
    }

    async fn collect(stream: FragmentStream) -> Vec<String> {
        stream.collect().await
    }

    #[test]
    fn test_compose_normalizes_roles_and_content() {
        let history = vec![
            ConversationMessage::user("hi"),
            ConversationMessage {
                role: "system".to_string(),
                content: json!({"note": 1}),
            },
            ConversationMessage::assistant("hello"),
        ];
        let messages = Agent::compose("SYS", &history);
        let roles: Vec<_> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "assistant"]);
        assert_eq!(messages[0].content, "SYS");
        assert_eq!(messages[2].content, "{\"note\":1}");
    }

    #[tokio::test]
    async fn test_direct_answer_per_char() {
        let engine = Arc::new(MockEngine::new());
        engine.push_text("Hi!");
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("hello")])).await;
        assert_eq!(fragments, vec!["H", "i", "!"]);

        let requests = engine.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].stream);
        assert_eq!(requests[0].tools.len(), 8);
        assert_eq!(requests[0].options.num_predict, 2048);
        assert_eq!(requests[0].options.top_k, Some(40));
    }

    #[tokio::test]
    async fn test_direct_answer_whole() {
        let engine = Arc::new(MockEngine::new());
        engine.push_text("Hello there");
        let registry = Arc::new(lms_registry(Arc::new(MemoryStore::new())).unwrap());
        let agent = Agent::new(engine, registry, config(DirectEmit::Whole));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("hey")])).await;
        assert_eq!(fragments, vec!["Hello there"]);
    }

    #[tokio::test]
    async fn test_tool_call_feeds_follow_up() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![ToolCall::new("getStudentCount", json!({}))]);
        engine.push_stream(vec!["There are ", "0 students."]);
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run(
            "SYS",
            vec![ConversationMessage::user("How many students are there?")],
        ))
        .await;
        assert_eq!(fragments, vec!["There are ", "0 students."]);

        let requests = engine.requests();
        assert_eq!(requests.len(), 2);
        let follow_up = &requests[1];
        assert!(follow_up.stream);
        assert!(follow_up.tools.is_empty());
        assert_eq!(follow_up.options.num_predict, 512);

        let roles: Vec<_> = follow_up.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        assert_eq!(
            follow_up.messages[3].content,
            "There are currently 0 students in the system."
        );
        assert_eq!(
            follow_up.messages[2].tool_calls.as_ref().map(|c| c.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_inline_error() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new("dropDatabase", json!({})),
            ToolCall::new("getCourseCount", json!({})),
        ]);
        engine.push_stream(vec!["No courses yet."]);
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(
            fragments,
            vec![
                "\nError: Function 'dropDatabase' not found.\n".to_string(),
                "No courses yet.".to_string()
            ]
        );
        // Unknown tool never reached the model a second time.
        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_only_that_follow_up() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new("createSection", json!({"name": "Section A"})),
            ToolCall::new(
                "createSection",
                json!({"name": "Section B", "program": "B.Tech", "batch": "2024-2028"}),
            ),
        ]);
        engine.push_stream(vec!["Created Section B."]);
        let agent = agent(engine.clone(), store.clone());

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].starts_with("\nError: Invalid arguments: "));
        assert!(fragments[0].contains("program: Required"));
        assert_eq!(fragments[1], "Created Section B.");

        let sections = store.list_sections().await.unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, "Section B");
    }

    #[tokio::test]
    async fn test_each_invocation_runs_once_in_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new(
                "createSection",
                json!({"name": "S1", "program": "P", "batch": "B"}),
            ),
            ToolCall::new(
                "createSection",
                json!({"name": "S2", "program": "P", "batch": "B"}),
            ),
        ]);
        engine.push_stream(vec!["one"]);
        engine.push_stream(vec!["two"]);
        let agent = agent(engine.clone(), store.clone());

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(fragments, vec!["one", "two"]);

        let names: Vec<_> = store
            .list_sections()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["S1", "S2"]);

        let requests = engine.requests();
        assert_eq!(requests.len(), 3);
        // Each follow-up carries only its own tool result.
        assert!(requests[1].messages.last().unwrap().content.contains("\"S1\""));
        assert!(requests[2].messages.last().unwrap().content.contains("\"S2\""));
        assert_eq!(requests[2].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_decide_failure_apologizes() {
        let engine = Arc::new(MockEngine::new());
        engine.push_chat_error("connection refused");
        let agent = agent(engine, Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(
            fragments,
            vec![
                "\n\nError: Inference engine error: connection refused\n\nPlease try again or rephrase your request."
            ]
        );
    }

    #[tokio::test]
    async fn test_broken_follow_up_ends_with_apology() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new("getCourseCount", json!({})),
            ToolCall::new("getStudentCount", json!({})),
        ]);
        engine.push_broken_stream(vec!["There are"], "stream dropped");
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], "There are");
        assert!(fragments[1].contains("stream dropped"));
        assert!(fragments[1].ends_with("Please try again or rephrase your request."));
        // The second tool never ran its follow-up.
        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_domain_error_still_gets_follow_up() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![ToolCall::new(
            "createCourse",
            json!({"title": "X", "courseCode": "X1", "instructorEmail": "nobody@uni.edu"}),
        )]);
        engine.push_stream(vec!["I couldn't find that professor."]);
        let agent = agent(engine.clone(), store.clone());

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(fragments, vec!["I couldn't find that professor."]);
        assert_eq!(
            engine.requests()[1].messages[3].content,
            "Error: No professor found with email nobody@uni.edu"
        );
        assert_eq!(store.count_courses().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invoke_string_encoded_arguments() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(Arc::new(MockEngine::new()), store);
        let outcome = agent
            .invoke(&ToolCall::new("listCourses", json!("{\"limit\": \"3\"}")))
            .await;
        assert_eq!(
            outcome,
            InvocationOutcome::Succeeded {
                tool: "listCourses".to_string(),
                result: "No courses found in the system.".to_string()
            }
        );
    }

    struct Unreachable;

    #[async_trait::async_trait]
    impl ToolHandler for Unreachable {
        async fn execute(&self, _args: ValidatedArgs) -> crate::error::Result<String> {
            Err(LmsError::Store("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn test_empty_direct_answer_is_marked() {
        for mode in [DirectEmit::PerChar, DirectEmit::Whole] {
            let engine = Arc::new(MockEngine::new());
            engine.push_text("");
            let registry = Arc::new(lms_registry(Arc::new(MemoryStore::new())).unwrap());
            let agent = Agent::new(engine, registry, config(mode));

            let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
            assert_eq!(fragments, vec![EMPTY_RESPONSE.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_empty_follow_up_is_marked() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![ToolCall::new("getCourseCount", json!({}))]);
        engine.push_stream(Vec::<String>::new());
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(fragments, vec![EMPTY_RESPONSE.to_string()]);
        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_follow_up_request_failure_apologizes() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new("getCourseCount", json!({})),
            ToolCall::new("getStudentCount", json!({})),
        ]);
        engine.push_stream_error("model unloaded");
        let agent = agent(engine.clone(), Arc::new(MemoryStore::new()));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(
            fragments,
            vec![
                "\n\nError: Inference engine error: model unloaded\n\nPlease try again or rephrase your request."
            ]
        );
        // The second invocation never started.
        assert_eq!(engine.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_execution_failure_skips_only_its_follow_up() {
        let engine = Arc::new(MockEngine::new());
        engine.push_tool_calls(vec![
            ToolCall::new("syncRoster", json!({})),
            ToolCall::new("getCourseCount", json!({})),
        ]);
        engine.push_stream(vec!["No courses yet."]);

        let mut registry = lms_registry(Arc::new(MemoryStore::new())).unwrap();
        registry
            .register(ToolDefinition::new(
                "syncRoster",
                "Sync the roster",
                SchemaNode::empty(),
                Arc::new(Unreachable),
            ))
            .unwrap();
        let agent = Agent::new(engine.clone(), Arc::new(registry), config(DirectEmit::PerChar));

        let fragments = collect(agent.run("SYS", vec![ConversationMessage::user("x")])).await;
        assert_eq!(
            fragments,
            vec![
                "\nError: Store error: database is locked\n".to_string(),
                "No courses yet.".to_string()
            ]
        );
        let requests = engine.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].messages.last().unwrap().content,
            "There are currently 0 courses in the system."
        );
    }

}
