use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the config file when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/shiplog.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/shiplog.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_url")]
    pub api_url: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
    /// Resolved from the environment or `--github-token`; never read from TOML.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_url(),
            per_page: default_per_page(),
            token_env: default_token_env(),
            timeout_secs: default_github_timeout(),
            token: None,
        }
    }
}

fn default_github_url() -> String {
    "https://api.github.com".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_github_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Provider endpoint override; defaults depend on the provider.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Prompts per PR before falling back to a title-derived record.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Maximum number of diff characters included in a prompt.
    #[serde(default = "default_diff_budget")]
    pub diff_budget: usize,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_attempts: default_max_attempts(),
            diff_budget: default_diff_budget(),
            timeout_secs: default_ai_timeout(),
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-3-7-sonnet-20250219".to_string()
}
fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_diff_budget() -> usize {
    4000
}
fn default_ai_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_retry_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
/// read when present and built-in defaults are used otherwise. Secrets and
/// a few settings are then taken from the environment (see
/// [`Config::apply_env`]).
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                parse_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env(|key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

impl Config {
    /// Resolve tokens and overrides from environment lookups.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.github.token.is_none() {
            self.github.token = lookup(&self.github.token_env).filter(|t| !t.is_empty());
        }
        if self.ai.api_key.is_none() {
            self.ai.api_key = lookup(&self.ai.api_key_env).filter(|k| !k.is_empty());
        }
        if let Some(model) = lookup("ANTHROPIC_MODEL").filter(|m| !m.is_empty()) {
            if self.ai.provider == "anthropic" {
                self.ai.model = model;
            }
        }
        if let Some(db) = lookup("SHIPLOG_DB").filter(|p| !p.is_empty()) {
            self.db.path = PathBuf::from(db);
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if !(1..=100).contains(&config.github.per_page) {
        anyhow::bail!("github.per_page must be in 1..=100");
    }

    if config.ai.max_attempts == 0 {
        anyhow::bail!("ai.max_attempts must be >= 1");
    }

    if config.ai.diff_budget == 0 {
        anyhow::bail!("ai.diff_budget must be > 0");
    }

    if !(0.0..=1.0).contains(&config.ai.temperature) {
        anyhow::bail!("ai.temperature must be in [0.0, 1.0]");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    match config.ai.provider.as_str() {
        "anthropic" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown ai provider: '{}'. Must be anthropic or ollama.",
            other
        ),
    }

    Ok(())
}
