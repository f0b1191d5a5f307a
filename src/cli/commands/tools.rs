//! Print the tool catalog exactly as the inference engine receives it.

use crate::agent::lms_registry;
use crate::store::MemoryStore;
use anyhow::Result;
use std::sync::Arc;

/// Run the tools command.
pub fn run_tools() -> Result<()> {
    // Descriptors do not depend on store contents.
    let registry = lms_registry(Arc::new(MemoryStore::new()))?;
    let json = serde_json::to_string_pretty(&registry.descriptors())?;
    println!("{}", json);
    Ok(())
}
