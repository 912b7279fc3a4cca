use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Model backend selection and tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    /// Backend name: "openai", "claude" or "ollama"
    pub name: String,
    /// Path to the JSON credential record ({"key": ..., "engine": ...})
    #[serde(default)]
    pub credentials: Option<String>,
    /// Endpoint for locally hosted backends
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Engine/model identifier for backends without a credential file
    #[serde(default)]
    pub engine: String,
    /// Largest image dimension sent over the wire
    #[serde(default = "default_max_image_size")]
    pub max_image_size: u32,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: f64,
    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Prompt strategy selection and toggles
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// Prompt strategy name
    #[serde(default = "default_prompt_name")]
    pub name: String,
    /// Ask the model to reason before giving the final answer
    #[serde(default = "default_true")]
    pub prevent_direct_answer: bool,
    /// Solicit an image description before the final answer
    #[serde(default = "default_true")]
    pub use_describe_image_prompt: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            name: default_prompt_name(),
            prevent_direct_answer: true,
            use_describe_image_prompt: true,
        }
    }
}

/// Retry behavior for backend invocations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum attempts; absent means retry forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Fixed backoff between attempts in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// Root configuration for an evaluation run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Path to the JSONL dataset
    pub data_path: String,
    /// Directory holding sample images referenced by path
    #[serde(default = "default_image_dir")]
    pub image_dir: String,
    /// Directory where result files are written
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    pub model: ModelConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_image_size() -> u32 {
    1024
}

fn default_max_tokens() -> u32 {
    512
}

fn default_prompt_name() -> String {
    "cot_multi_extract".to_string()
}

fn default_true() -> bool {
    true
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_image_dir() -> String {
    "data".to_string()
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }
}

/// Retry policy threaded into backend invocations.
///
/// `max_attempts` of `None` retries forever; tests inject a bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}
