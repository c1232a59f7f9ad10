pub mod builtin;
pub mod registry;

use std::path::PathBuf;

use async_trait::async_trait;

/// Runtime context passed to skill execution.
///
/// Identifies the invoking caller and the base path for any per-caller
/// state a skill keeps.
pub struct SkillContext {
    /// Identifier of the conversation partner or front end invoking
    /// the skill (e.g. a session id, or "cli").
    pub caller: String,
    /// Base path for per-caller skill state.
    pub base_path: PathBuf,
}

/// A skill that the LLM can invoke via tool_use.
///
/// All skills implement this trait. The orchestration layer calls
/// `execute()` when the LLM requests a tool_use.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique identifier used in the `tools[]` array.
    /// Must be lowercase alphanumeric + underscores (e.g. "execute_code").
    fn name(&self) -> &str;

    /// Human-readable description shown to the LLM so it knows
    /// when to invoke this skill.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters this skill accepts.
    /// Used as the `input_schema` field of the tool definition.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Required capabilities (validated at startup, not yet enforced).
    /// Examples: "network:api.example.com:443", "filesystem:/tmp:read"
    fn capabilities(&self) -> Vec<String> {
        vec![]
    }

    /// Execute the skill with the given parameters and return a text result.
    /// The returned string is sent back to the LLM as a `tool_result`.
    ///
    /// Failures attributable to the caller's input come back as `Ok`
    /// text; `Err` is reserved for faults in the skill's own harness.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &SkillContext,
    ) -> anyhow::Result<String>;
}

pub use registry::{SkillRegistry, ToolDefinition};
