mod config;
mod sandbox;
mod skills;

use std::io::Read;

use anyhow::{anyhow, Result};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::skills::builtin::ExecuteCodeSkill;
use crate::skills::{SkillContext, SkillRegistry};

const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";

fn print_help() {
    println!(
        "\
sage-sandbox v{}

Policy-gated Python code execution sandbox for AI agent runtimes.

USAGE:
    sage-sandbox [OPTIONS] [CODE_FILE]

ARGUMENTS:
    CODE_FILE    Path to a file of Python code, or '-' to read from stdin [default: -]

OPTIONS:
    -t, --timeout <SECONDS>    Maximum execution time (default: 20, ceiling: 40)
        --no-plots             Do not capture matplotlib figures
    -c, --config <PATH>        Path to TOML configuration file [default: {}]
    -h, --help                 Print this help message and exit
    -V, --version              Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, sage_sandbox=debug,warn)

EXAMPLES:
    echo 'print(2 + 2)' | sage-sandbox
    sage-sandbox analysis.py
    sage-sandbox -t 40 --no-plots snippet.py",
        env!("CARGO_PKG_VERSION"),
        DEFAULT_CONFIG_PATH,
    );
}

struct CliArgs {
    code_path: String,
    timeout: Option<f64>,
    save_plots: bool,
    config_path: String,
}

fn parse_args() -> Result<CliArgs> {
    let mut parsed = CliArgs {
        code_path: "-".to_string(),
        timeout: None,
        save_plots: true,
        config_path: DEFAULT_CONFIG_PATH.to_string(),
    };

    let mut args = std::env::args().skip(1);
    let mut code_path_seen = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sage-sandbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--timeout" | "-t" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("{arg} requires a value in seconds"))?;
                let seconds: f64 = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid timeout value: {value}"))?;
                parsed.timeout = Some(seconds);
            }
            "--no-plots" => {
                parsed.save_plots = false;
            }
            "--config" | "-c" => {
                parsed.config_path = args
                    .next()
                    .ok_or_else(|| anyhow!("{arg} requires a path"))?;
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(anyhow!(
                    "Unknown option: {other}\nRun with --help for usage."
                ));
            }
            other => {
                if code_path_seen {
                    return Err(anyhow!("Unexpected argument: {other}"));
                }
                parsed.code_path = other.to_string();
                code_path_seen = true;
            }
        }
    }

    Ok(parsed)
}

/// Reads the code to execute from a file, or from stdin for `-`.
fn read_code(path: &str) -> Result<String> {
    if path == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .map_err(|e| anyhow!("Failed to read code from stdin: {e}"))?;
        Ok(code)
    } else {
        std::fs::read_to_string(path).map_err(|e| anyhow!("Failed to read {path}: {e}"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sage_sandbox=info")),
        )
        .init();

    let args = parse_args()?;

    let config = Config::load_or_default(&args.config_path)?;
    info!("Agent: {}", config.agent.name);
    info!("Interpreter: {}", config.execution.interpreter);
    info!(
        "File writes: {}",
        if config.execution.enable_file_write {
            "allowed"
        } else {
            "blocked"
        }
    );

    let mut skills = SkillRegistry::new();
    skills.register(Box::new(ExecuteCodeSkill::new(&config.execution)));
    info!(
        "Skills: {} registered ({})",
        skills.len(),
        skills
            .tool_definitions()
            .iter()
            .map(|def| def.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let code = read_code(&args.code_path)?;

    let mut params = json!({
        "code": code,
        "save_plots": args.save_plots,
    });
    if let Some(seconds) = args.timeout {
        params["timeout"] = json!(seconds);
    }

    let context = SkillContext {
        caller: "cli".to_string(),
        base_path: config.agent.data_path.clone(),
    };

    let skill = skills
        .get("execute_code")
        .ok_or_else(|| anyhow!("execute_code skill not registered"))?;

    match skill.execute(params, &context).await {
        Ok(content) => {
            println!("{content}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
