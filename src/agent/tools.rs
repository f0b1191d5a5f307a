//! Tool registry for the agent system.

use super::schema::{SchemaNode, ValidationError};
use crate::error::{LmsError, Result};
use crate::inference::{FunctionDescriptor, ToolDescriptor};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Deserialize into a typed argument struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| LmsError::Tool(format!("Unexpected arguments: {}", e)))
    }
}

/// Executes one tool.
///
/// `Ok` carries the text fed back to the model, including `"Error: ..."`
/// strings for domain refusals. `Err` is reserved for infrastructure failures.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: ValidatedArgs) -> Result<String>;
}

/// A named, schema-described operation the agent may invoke.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: SchemaNode,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: SchemaNode,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// Validate raw model arguments against this tool's parameters.
    pub fn validate(&self, raw: &Value) -> std::result::Result<ValidatedArgs, ValidationError> {
        match self.parameters.validate_arguments(raw)? {
            Value::Object(map) => Ok(ValidatedArgs(map)),
            _ => Ok(ValidatedArgs::default()),
        }
    }

    /// The descriptor offered to the model.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            tool_type: "function".to_string(),
            function: FunctionDescriptor {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters.to_json_schema(),
            },
        }
    }
}

/// Catalog of tools, kept in registration order. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; names must be unique.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<()> {
        if self.get(&tool.name).is_some() {
            return Err(LmsError::Conflict(format!("tool {}", tool.name)));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter()
    }

    /// Tool catalog in the engine's native tool-calling format.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(ToolDefinition::descriptor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn execute(&self, args: ValidatedArgs) -> Result<String> {
            #[derive(Deserialize)]
            struct Args {
                text: String,
                times: u32,
            }
            let args: Args = args.parse()?;
            Ok(args.text.repeat(args.times as usize))
        }
    }

    fn echo_tool(name: &str) -> ToolDefinition {
        ToolDefinition::new(
            name,
            "Repeat text",
            SchemaNode::object([
                ("text", SchemaNode::string().describe("Text to repeat")),
                ("times", SchemaNode::integer().default_value(json!(2))),
            ]),
            Arc::new(Echo),
        )
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();
        registry.register(echo_tool("shout")).unwrap();
        assert!(matches!(
            registry.register(echo_tool("echo")),
            Err(LmsError::Conflict(_))
        ));
        assert_eq!(registry.names(), vec!["echo", "shout"]);
    }

    #[test]
    fn test_descriptors() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).unwrap();

        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        let value = serde_json::to_value(&descriptors[0]).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "echo");
        assert_eq!(value["function"]["parameters"]["required"], json!(["text"]));
        assert_eq!(
            value["function"]["parameters"]["properties"]["times"]["default"],
            2
        );
    }

    #[tokio::test]
    async fn test_validate_then_execute() {
        let tool = echo_tool("echo");
        let args = tool.validate(&json!({"text": "ab", "times": "3"})).unwrap();
        assert_eq!(tool.handler.execute(args).await.unwrap(), "ababab");

        let err = tool.validate(&json!({"times": 1})).unwrap_err();
        assert_eq!(err.issues[0].path, "text");
    }
}
