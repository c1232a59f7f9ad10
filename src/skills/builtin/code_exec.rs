//! Builtin skill: execute Python code under the sandbox policy.
//!
//! The LLM invokes this tool for calculations, data analysis, text
//! processing, or plot generation. The code runs in an isolated child
//! process under the module-load policy; everything the code printed
//! (including its own errors) comes back as displayable text.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::sandbox::{CodeSandbox, ExecutionRequest};
use crate::skills::{Skill, SkillContext};

/// Builtin skill wrapping the code execution sandbox.
pub struct ExecuteCodeSkill {
    sandbox: CodeSandbox,
    default_timeout_secs: f64,
}

impl ExecuteCodeSkill {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            sandbox: CodeSandbox::new(config),
            default_timeout_secs: config.default_timeout_secs,
        }
    }
}

#[async_trait]
impl Skill for ExecuteCodeSkill {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute Python code in a sandboxed environment and return the captured \
         output. Use this for calculations, data analysis, text processing, or \
         generating plots. Imports are restricted to an allow-list of trusted \
         libraries; allow-listed libraries that are missing are installed on \
         demand. Matplotlib figures are saved as numbered PNG files and the \
         result reports how many were generated."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute."
                },
                "timeout": {
                    "type": "number",
                    "description": "Maximum execution time in seconds (default: 20, max: 40)."
                },
                "save_plots": {
                    "type": "boolean",
                    "description": "Whether to save matplotlib figures as PNG files (default: true)."
                }
            },
            "required": ["code"]
        })
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "process:python:spawn".to_string(),
            "filesystem:scratch:write".to_string(),
        ]
    }

    async fn execute(&self, params: Value, _context: &SkillContext) -> anyhow::Result<String> {
        // A missing code field behaves like empty code and takes the
        // no-code path, so malformed tool calls still get displayable
        // text instead of a hard error.
        let code = params["code"].as_str().unwrap_or_default();
        let timeout = params["timeout"].as_f64().unwrap_or(self.default_timeout_secs);
        let save_plots = params["save_plots"].as_bool().unwrap_or(true);

        debug!(
            "execute_code: {} bytes of code, timeout {timeout}s, save_plots={save_plots}",
            code.len()
        );

        let request = ExecutionRequest::new(code, Some(timeout), save_plots);
        let result = self.sandbox.run(&request).await;
        match result.error {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(result.content),
        }
    }
}
