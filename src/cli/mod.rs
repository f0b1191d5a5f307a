//! CLI module for the LMS agent.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use crate::store::Role;
use clap::{Parser, Subcommand};

/// LMS Agent - natural-language actions for a learning-management system
///
/// Runs a local tool-calling assistant backed by Ollama. Staff describe what
/// they want ("add a professor Sarah", "how many students?") and the agent
/// performs it against the LMS store.
#[derive(Parser, Debug)]
#[command(name = "lms-agent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API with the streaming agent endpoint
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one agent turn and stream the answer to the terminal
    Ask {
        /// What you want done, e.g. "How many students are there?"
        message: String,

        /// Ollama model to use instead of ollama.model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print the tool catalog as sent to the model
    Tools,

    /// Manage user accounts and API tokens
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage the Ollama model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Check the inference engine, storage and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserAction {
    /// Create an account and print its API token
    Add {
        /// Full name
        #[arg(long)]
        name: String,

        /// Email address (stored lower-cased)
        #[arg(long)]
        email: String,

        /// admin, professor or student
        #[arg(long)]
        role: Role,

        /// Section id or name for a student
        #[arg(long)]
        section: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModelAction {
    /// Pull the model unless Ollama already has it
    Pull {
        /// Model to pull (defaults to ollama.model)
        model: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "ollama.model")
        key: String,
        /// Configuration value
        value: String,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
