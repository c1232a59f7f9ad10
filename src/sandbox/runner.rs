//! Process Runner: executes a synthesized program in an isolated child
//! process.
//!
//! Each run gets a private scratch directory holding the program and a
//! package marker. The child sees a two-variable environment and has
//! its working directory pinned to the scratch dir, so plot artifacts
//! from concurrent runs can never collide. The directory is removed on
//! every path out of `run`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Module name the synthesized program is executed under
/// (`<interpreter> -m sandbox_script`).
const SCRIPT_MODULE: &str = "sandbox_script";

/// What came out of one guarded run.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    /// Plot artifacts found in the scratch directory, sorted by name.
    pub plot_files: Vec<String>,
}

pub struct ProcessRunner {
    interpreter: String,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Runs the program to completion or timeout.
    ///
    /// The child's environment contains only `PYTHONPATH` (the scratch
    /// dir) and `PYTHONUNBUFFERED`; the parent's ambient environment is
    /// not inherited. On timeout the child is terminated and the
    /// outcome is tagged `timed_out`. Errors from this function are
    /// harness faults, never caller-code faults.
    pub async fn run(&self, program: &str, timeout: Duration) -> Result<RunOutcome> {
        let scratch = tempfile::tempdir().context("creating sandbox scratch directory")?;
        let script_path = scratch.path().join(format!("{SCRIPT_MODULE}.py"));
        tokio::fs::write(&script_path, program)
            .await
            .context("writing sandbox script")?;
        tokio::fs::write(scratch.path().join("__init__.py"), b"")
            .await
            .context("writing package marker")?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-m")
            .arg(SCRIPT_MODULE)
            .env_clear()
            .env("PYTHONPATH", scratch.path())
            .env("PYTHONUNBUFFERED", "1")
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Spawning {} -m {SCRIPT_MODULE} (timeout {:.1}s)",
            self.interpreter,
            timeout.as_secs_f64()
        );

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning interpreter '{}'", self.interpreter))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(wait_result) => {
                let output = wait_result.context("waiting for sandbox process")?;
                let plot_files = collect_plot_files(scratch.path());
                debug!(
                    "Sandbox exited with status {:?}, {} plot file(s)",
                    output.status.code(),
                    plot_files.len()
                );
                Ok(RunOutcome {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                    exit_code: output.status.code(),
                    plot_files,
                })
            }
            Err(_) => {
                // The wait future owns the child; dropping it here
                // kills the process (kill_on_drop).
                warn!(
                    "Sandbox run exceeded {:.1}s, terminating child",
                    timeout.as_secs_f64()
                );
                Ok(RunOutcome {
                    timed_out: true,
                    ..Default::default()
                })
            }
        }
    }
}

/// Plot artifacts the guarded program left in the scratch directory.
fn collect_plot_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| name.starts_with("plot_") && name.ends_with(".png"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live-interpreter tests probe for python3 first and return early
    /// when it is unavailable.
    async fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_collect_plot_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plot_1.png"), b"x").unwrap();
        std::fs::write(dir.path().join("plot_0.png"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("plot_0.svg"), b"x").unwrap();
        std::fs::write(dir.path().join("__init__.py"), b"").unwrap();

        let files = collect_plot_files(dir.path());
        assert_eq!(files, vec!["plot_0.png", "plot_1.png"]);
    }

    #[test]
    fn test_collect_plot_files_missing_dir() {
        let files = collect_plot_files(Path::new("/nonexistent/sandbox/scratch"));
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        if !python_available().await {
            return;
        }
        let runner = ProcessRunner::new("python3");
        let outcome = runner
            .run("print('captured')", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "captured");
        assert!(outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        if !python_available().await {
            return;
        }
        let runner = ProcessRunner::new("python3");
        let outcome = runner
            .run(
                "import sys\nsys.stderr.write('boom')",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(outcome.stderr.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        if !python_available().await {
            return;
        }
        let runner = ProcessRunner::new("python3");
        let outcome = runner
            .run(
                "while True:\n    pass",
                Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_run_environment_is_bounded() {
        if !python_available().await {
            return;
        }
        let runner = ProcessRunner::new("python3");
        let outcome = runner
            .run(
                "import os\nprint(','.join(sorted(os.environ.keys())))",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        let keys: Vec<&str> = outcome.stdout.trim().split(',').collect();
        assert_eq!(keys, vec!["PYTHONPATH", "PYTHONUNBUFFERED"]);
    }

    #[tokio::test]
    async fn test_run_scopes_artifacts_to_scratch_dir() {
        if !python_available().await {
            return;
        }
        let runner = ProcessRunner::new("python3");
        let outcome = runner
            .run(
                "open('plot_0.png', 'wb').write(b'fake')",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        // Reported from the private scratch dir, not the process CWD.
        assert_eq!(outcome.plot_files, vec!["plot_0.png"]);
        assert!(!std::path::Path::new("plot_0.png").exists());
    }

    #[tokio::test]
    async fn test_run_spawn_failure_is_harness_fault() {
        let runner = ProcessRunner::new("definitely-not-an-interpreter");
        let result = runner.run("print('x')", Duration::from_secs(5)).await;
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("definitely-not-an-interpreter"));
    }
}
