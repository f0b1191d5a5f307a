//! Prompt templates for the LMS agent.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub agent: AgentPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for the tool-calling agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPrompts {
    /// System prompt. `{{tools}}` expands to the registered tool names.
    pub system: String,
}

impl Default for AgentPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a direct, concise AI assistant for an LMS. When users want to create, add, list, or manage data, USE THE AVAILABLE TOOLS.

CRITICAL RULES:
1. When user wants to CREATE/ADD something → Use the appropriate tool (createUser, createCourse, etc.)
2. When user wants to LIST/VIEW something → Use the appropriate tool (listCourses, listSections, etc.)
3. When user wants to COUNT something → Use the appropriate tool (getCourseCount, getStudentCount)
4. Answer ONLY what was asked - nothing more
5. NEVER ask follow-up questions like "Would you like..." or "Is there anything else..."
6. Be brief and direct

Available tools: {{tools}}

Examples of when to use tools:
- "Add a student John" → Use createUser with role="student"
- "Add a professor Sarah" → Use createUser with role="professor"
- "Create student" → Use createUser with role="student"
- "Create professor" → Use createUser with role="professor"
- "How many students?" → Use getStudentCount tool
- "Show courses" or "List courses" → Use listCourses tool
- "Add course" or "Create a course" → Use createCourse tool
- "New section" → Use createSection tool
- "Schedule midterms on 2025-03-01" → Use createEvent tool"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let agent_path = custom_path.join("agent.toml");
            if agent_path.exists() {
                let content = std::fs::read_to_string(&agent_path)?;
                prompts.agent = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }

    /// The agent system prompt listing the given tools.
    pub fn agent_system<S: AsRef<str>>(&self, tool_names: &[S]) -> String {
        let tools = tool_names
            .iter()
            .map(|n| n.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        let mut vars = HashMap::new();
        vars.insert("tools".to_string(), tools);
        self.render_with_custom(&self.agent.system, &vars)
    }
}
