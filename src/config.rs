use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Base path for per-caller skill state.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Interpreter used for guarded runs. Resolved through PATH at
    /// spawn time; the guarded run itself sees a bounded environment.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// When false (the default), the guarded run refuses any open
    /// with a write, append or read-write mode.
    #[serde(default)]
    pub enable_file_write: bool,
    /// Timeout applied when a request does not specify one.
    /// The 40-second ceiling is fixed and not configurable.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: f64,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_timeout_secs() -> f64 {
    20.0
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            enable_file_write: false,
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                name: "Sage".to_string(),
                data_path: default_data_path(),
            },
            execution: ExecutionConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${SANDBOX_INTERPRETER}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Loads the config file if it exists, otherwise falls back to the
    /// built-in defaults so the CLI works with zero configuration.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
