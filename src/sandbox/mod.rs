//! Policy-gated code execution sandbox.
//!
//! Accepts a block of caller-supplied Python code and runs it to
//! completion under a constrained execution policy, returning captured
//! output. The pipeline is one-way, with no state across requests:
//!
//! request → [`script::synthesize`] → [`runner::ProcessRunner`] →
//! assemble → [`ExecutionResult`]
//!
//! Isolation comes from the module-load policy inside the synthesized
//! program and from the child-process boundary; this is not an OS-level
//! sandbox and does not resist a deliberately adversarial escape.

pub mod policy;
pub mod runner;
pub mod script;

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ExecutionConfig;
use policy::PolicyTable;
use runner::{ProcessRunner, RunOutcome};
use script::ScriptOptions;

/// Hard ceiling on the wall-clock timeout, in seconds.
pub const MAX_TIMEOUT_SECS: f64 = 40.0;

/// Timeout applied when a request does not specify one, in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;

/// Maximum characters of result content before truncation.
pub const MAX_OUTPUT_CHARS: usize = 10_000;

const TRUNCATION_NOTICE: &str = "\n... (output truncated, exceeded 10000 characters)";
const NO_OUTPUT_MARKER: &str = "(No output)";
const TIMED_OUT_CONTENT: &str = "Error: Code execution timed out.";
const NO_CODE_CONTENT: &str = "Error: No code provided to execute.";

/// One code execution invocation. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    code: String,
    timeout: Duration,
    capture_plots: bool,
}

impl ExecutionRequest {
    /// Builds a request, clamping the timeout into (0, 40] seconds.
    ///
    /// Values above the ceiling become the ceiling; absent, non-finite
    /// or non-positive values fall back to the default.
    pub fn new(code: impl Into<String>, timeout_secs: Option<f64>, capture_plots: bool) -> Self {
        let requested = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let clamped = if requested.is_finite() && requested > 0.0 {
            requested.min(MAX_TIMEOUT_SECS)
        } else {
            DEFAULT_TIMEOUT_SECS
        };
        Self {
            code: code.into(),
            timeout: Duration::from_secs_f64(clamped),
            capture_plots,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The subsystem's only externally visible artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Displayable result text, possibly truncated. Caller-code faults,
    /// policy refusals and timeouts all end up here.
    pub content: String,
    /// Harness fault descriptor. Present only when the sandbox itself
    /// failed, in which case `content` is empty.
    pub error: Option<String>,
}

impl ExecutionResult {
    fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            error: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            error: Some(message.into()),
        }
    }
}

/// Sandboxed executor: synthesize, run, assemble.
///
/// Holds no per-request state; one instance serves any number of
/// concurrent requests, each in its own child process.
pub struct CodeSandbox {
    policy: PolicyTable,
    runner: ProcessRunner,
    enable_file_write: bool,
}

impl CodeSandbox {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            policy: PolicyTable::new(),
            runner: ProcessRunner::new(config.interpreter.clone()),
            enable_file_write: config.enable_file_write,
        }
    }

    /// Runs one request to completion or timeout.
    ///
    /// Anything attributable to the caller's code comes back as
    /// displayable `content`; only harness faults set `error`.
    pub async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        if request.code.trim().is_empty() {
            return ExecutionResult::content(NO_CODE_CONTENT);
        }

        let options = ScriptOptions {
            capture_plots: request.capture_plots,
            enable_file_write: self.enable_file_write,
        };
        let program = script::synthesize(&request.code, &self.policy, &options);
        debug!(
            "Executing {} bytes of caller code ({} byte program, timeout {:.1}s)",
            request.code.len(),
            program.len(),
            request.timeout.as_secs_f64()
        );

        match self.runner.run(&program, request.timeout).await {
            Ok(outcome) => assemble(&outcome, request.capture_plots),
            Err(e) => {
                warn!("Sandbox harness fault: {e:#}");
                ExecutionResult::failure(format!("Error executing code: {e:#}"))
            }
        }
    }
}

/// Merges a run outcome into the final result value.
fn assemble(outcome: &RunOutcome, capture_plots: bool) -> ExecutionResult {
    if outcome.timed_out {
        return ExecutionResult::content(TIMED_OUT_CONTENT);
    }

    let stdout = outcome.stdout.trim();
    let mut content = if stdout.is_empty() {
        NO_OUTPUT_MARKER.to_string()
    } else {
        stdout.to_string()
    };

    let stderr = outcome.stderr.trim();
    if !stderr.is_empty() {
        content.push_str("\n\nErrors:\n");
        content.push_str(stderr);
    }

    if capture_plots && !outcome.plot_files.is_empty() {
        content.push_str(&format!(
            "\n\n{} plot(s) were generated.",
            outcome.plot_files.len()
        ));
    }

    ExecutionResult::content(truncate_content(content))
}

/// Caps content at [`MAX_OUTPUT_CHARS`] characters, appending the
/// truncation notice. Counts characters, not bytes, so multi-byte
/// output never splits.
fn truncate_content(content: String) -> String {
    if content.chars().count() <= MAX_OUTPUT_CHARS {
        return content;
    }
    let mut truncated: String = content.chars().take(MAX_OUTPUT_CHARS).collect();
    truncated.push_str(TRUNCATION_NOTICE);
    truncated
}
