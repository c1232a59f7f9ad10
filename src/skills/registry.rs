//! Skill registry: discovery and lookup of invocable skills.
//!
//! The orchestration layer registers skills at startup, hands their
//! tool definitions to the LLM, and dispatches tool_use requests back
//! through `get()`.

use serde::Serialize;
use serde_json::Value;

use super::Skill;

/// Tool definition in the shape the LLM `tools[]` array expects.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Central registry of all available skills.
#[derive(Default)]
pub struct SkillRegistry {
    skills: Vec<Box<dyn Skill>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self { skills: Vec::new() }
    }

    /// Registers a skill under its own name.
    pub fn register(&mut self, skill: Box<dyn Skill>) {
        self.skills.push(skill);
    }

    /// Looks up a skill by its tool name.
    pub fn get(&self, name: &str) -> Option<&dyn Skill> {
        self.skills
            .iter()
            .find(|skill| skill.name() == name)
            .map(|skill| skill.as_ref())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Tool definitions for every registered skill, in registration
    /// order.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.skills
            .iter()
            .map(|skill| ToolDefinition {
                name: skill.name().to_string(),
                description: skill.description().to_string(),
                input_schema: skill.parameters_schema(),
            })
            .collect()
    }
}
