//! Tool-calling agent for the LMS.
//!
//! Turns a natural-language request into at most one execution per requested
//! tool call against the LMS store, then lets the model phrase the outcome.

mod lms_tools;
mod runner;
mod schema;
mod tools;

pub use lms_tools::lms_registry;
pub(crate) use lms_tools::generate_password;
pub use runner::{
    apology, Agent, AgentConfig, ConversationMessage, FragmentStream, InvocationOutcome,
};
pub use schema::{SchemaNode, StringFormat, ValidationError, ValidationIssue};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry, ValidatedArgs};
