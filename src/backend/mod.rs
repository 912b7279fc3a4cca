mod claude;
mod gemini;
mod ollama;
mod openai;

pub use claude::ClaudeBackend;
pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::config::{ModelConfig, RetryPolicy};
use anyhow::{bail, Result};
use async_trait::async_trait;
use image::DynamicImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Fixed placeholder returned when a backend's safety filter blocks the
/// response. Non-empty so the retry loop terminates; never a valid option
/// label, so it scores as incorrect downstream.
pub const FILTERED_SENTINEL: &str = "The response was filtered";

/// Valid backend names, used for selection and error messages
pub const BACKEND_NAMES: &[&str] = &[
    "openai",
    "openai_vision",
    "gemini",
    "gemini_vision",
    "claude",
    "ollama",
];

/// Failure modes of a single backend attempt
#[derive(Debug, Error)]
pub enum BackendError {
    /// The safety filter blocked the response; terminal, not retryable
    #[error("response blocked by content filter")]
    Filtered,
    /// The backend answered but produced no usable text
    #[error("empty response: {0}")]
    Empty(String),
    /// Network or API failure; retryable
    #[error("{0}")]
    Transient(String),
    /// Credential or request construction failure; fatal
    #[error("configuration error: {0}")]
    Config(String),
    /// Capability not offered by this backend
    #[error("{0}")]
    Unsupported(String),
}

/// One (prompt, image) turn of a few-shot request
#[derive(Debug, Clone)]
pub struct Shot {
    pub prompt: String,
    pub image: Option<DynamicImage>,
}

/// Uniform contract over hosted and locally hosted model backends.
///
/// Implementations perform exactly one attempt per call; the retry loop in
/// [`invoke`] owns the retry-until-success contract. Credentials are loaded
/// lazily on the first attempt and reused for the rest of the run.
#[async_trait]
pub trait ModelBackend: std::fmt::Debug + Send + Sync {
    /// Backend name for logging and error messages
    fn name(&self) -> &str;

    /// Whether requests may embed an image
    fn supports_vision(&self) -> bool;

    /// Perform one attempt. Backends without vision support silently ignore
    /// the image argument.
    async fn call_once(
        &mut self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<String, BackendError>;

    /// Perform one attempt with several (prompt, image) pairs concatenated
    /// into a single multi-part request.
    async fn call_once_few_shot(&mut self, shots: &[Shot]) -> Result<String, BackendError> {
        let _ = shots;
        Err(BackendError::Unsupported(format!(
            "{} does not support few-shot requests",
            self.name()
        )))
    }
}

/// Credential record read from a per-backend JSON file
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRecord {
    /// API key
    pub key: String,
    /// Engine/model identifier
    pub engine: String,
}

impl CredentialRecord {
    pub fn from_file(path: &str) -> Result<Self, BackendError> {
        let content = std::fs::read_to_string(Path::new(path)).map_err(|e| {
            BackendError::Config(format!("Failed to read credential file {}: {}", path, e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            BackendError::Config(format!("Malformed credential file {}: {}", path, e))
        })
    }
}

/// Look up a backend by name, failing fast on unknown names.
pub fn select_backend(config: &ModelConfig) -> Result<Box<dyn ModelBackend>> {
    match config.name.as_str() {
        "openai" => Ok(Box::new(OpenAiBackend::new(config, false))),
        "openai_vision" => Ok(Box::new(OpenAiBackend::new(config, true))),
        "gemini" => Ok(Box::new(GeminiBackend::new(config, false))),
        "gemini_vision" => Ok(Box::new(GeminiBackend::new(config, true))),
        "claude" => Ok(Box::new(ClaudeBackend::new(config))),
        "ollama" => Ok(Box::new(OllamaBackend::new(config))),
        other => bail!(
            "Unknown backend: {}. Choose from {:?}",
            other,
            BACKEND_NAMES
        ),
    }
}

/// Invoke a backend until it yields non-empty text.
///
/// Transient failures and empty responses are logged and retried after a
/// fixed backoff; with the default unbounded policy this blocks until the
/// backend succeeds. A content-filtered response short-circuits to
/// [`FILTERED_SENTINEL`] on the spot. Configuration failures abort without
/// retrying. Never returns `Ok` with an empty string.
pub async fn invoke(
    backend: &mut dyn ModelBackend,
    policy: &RetryPolicy,
    prompt: &str,
    image: Option<&DynamicImage>,
) -> Result<String> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match backend.call_once(prompt, image).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {
                warn!(backend = backend.name(), attempt, "Empty backend output, retrying");
            }
            Err(BackendError::Filtered) => {
                warn!(backend = backend.name(), "Response blocked by content filter");
                return Ok(FILTERED_SENTINEL.to_string());
            }
            Err(err @ (BackendError::Config(_) | BackendError::Unsupported(_))) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Backend {} cannot be invoked", backend.name())));
            }
            Err(err) => {
                warn!(backend = backend.name(), attempt, %err, "Backend request failed, retrying");
            }
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                bail!(
                    "Backend {} gave no usable response after {} attempts",
                    backend.name(),
                    attempt
                );
            }
        }
        sleep(policy.backoff).await;
    }
}

/// Few-shot counterpart of [`invoke`]; same retry and sentinel rules.
pub async fn invoke_few_shot(
    backend: &mut dyn ModelBackend,
    policy: &RetryPolicy,
    shots: &[Shot],
) -> Result<String> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match backend.call_once_few_shot(shots).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {
                warn!(backend = backend.name(), attempt, "Empty backend output, retrying");
            }
            Err(BackendError::Filtered) => {
                warn!(backend = backend.name(), "Response blocked by content filter");
                return Ok(FILTERED_SENTINEL.to_string());
            }
            Err(err @ (BackendError::Config(_) | BackendError::Unsupported(_))) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Backend {} cannot be invoked", backend.name())));
            }
            Err(err) => {
                warn!(backend = backend.name(), attempt, %err, "Backend request failed, retrying");
            }
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                bail!(
                    "Backend {} gave no usable response after {} attempts",
                    backend.name(),
                    attempt
                );
            }
        }
        sleep(policy.backoff).await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn test_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::bounded(max_attempts, Duration::from_millis(1))
    }

    /// Scripted backend that replays a queue of attempt outcomes.
    #[derive(Debug)]
    pub struct FakeBackend {
        pub script: VecDeque<Result<String, BackendError>>,
        pub calls: usize,
        pub vision: bool,
    }

    impl FakeBackend {
        pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
            Self {
                script: script.into(),
                calls: 0,
                vision: true,
            }
        }

        pub fn text_only(script: Vec<Result<String, BackendError>>) -> Self {
            Self {
                vision: false,
                ..Self::new(script)
            }
        }
    }

    #[async_trait]
    impl ModelBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn supports_vision(&self) -> bool {
            self.vision
        }

        async fn call_once(
            &mut self,
            _prompt: &str,
            _image: Option<&DynamicImage>,
        ) -> Result<String, BackendError> {
            self.calls += 1;
            self.script
                .pop_front()
                .unwrap_or(Err(BackendError::Transient("script exhausted".to_string())))
        }
    }

    #[tokio::test]
    async fn test_invoke_returns_first_success() {
        let mut backend = FakeBackend::new(vec![Ok("hello".to_string())]);
        let policy = test_policy(5);
        let out = invoke(&mut backend, &policy, "p", None).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(backend.calls, 1);
    }

    #[tokio::test]
    async fn test_invoke_retries_transient_until_success() {
        let mut backend = FakeBackend::new(vec![
            Err(BackendError::Transient("connection reset".to_string())),
            Err(BackendError::Transient("HTTP 503".to_string())),
            Ok("recovered".to_string()),
        ]);
        let policy = test_policy(10);
        let out = invoke(&mut backend, &policy, "p", None).await.unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(backend.calls, 3);
    }

    #[tokio::test]
    async fn test_invoke_retries_empty_output() {
        let mut backend = FakeBackend::new(vec![
            Ok("".to_string()),
            Ok("   ".to_string()),
            Ok("finally".to_string()),
        ]);
        let policy = test_policy(10);
        let out = invoke(&mut backend, &policy, "p", None).await.unwrap();
        assert_eq!(out, "finally");
        assert_eq!(backend.calls, 3);
    }

    #[tokio::test]
    async fn test_invoke_never_returns_empty() {
        let mut backend = FakeBackend::new(vec![
            Err(BackendError::Empty("no parts".to_string())),
            Ok("text".to_string()),
        ]);
        let policy = test_policy(10);
        let out = invoke(&mut backend, &policy, "p", None).await.unwrap();
        assert!(!out.trim().is_empty());
    }

    #[tokio::test]
    async fn test_invoke_filtered_returns_sentinel_without_retry() {
        let mut backend = FakeBackend::new(vec![
            Err(BackendError::Filtered),
            Ok("should never be reached".to_string()),
        ]);
        let policy = test_policy(10);
        let out = invoke(&mut backend, &policy, "p", None).await.unwrap();
        assert_eq!(out, FILTERED_SENTINEL);
        assert_eq!(backend.calls, 1);
    }

    #[tokio::test]
    async fn test_invoke_bounded_policy_exhaustion() {
        let mut backend = FakeBackend::new(vec![]);
        let policy = test_policy(3);
        let err = invoke(&mut backend, &policy, "p", None).await.unwrap_err();
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(backend.calls, 3);
    }

    #[tokio::test]
    async fn test_invoke_config_error_is_fatal() {
        let mut backend = FakeBackend::new(vec![
            Err(BackendError::Config("missing key".to_string())),
            Ok("unreachable".to_string()),
        ]);
        let policy = test_policy(10);
        let err = invoke(&mut backend, &policy, "p", None).await.unwrap_err();
        assert!(err.to_string().contains("cannot be invoked"));
        assert_eq!(backend.calls, 1);
    }

    #[tokio::test]
    async fn test_invoke_few_shot_default_unsupported() {
        let mut backend = FakeBackend::new(vec![]);
        let policy = test_policy(3);
        let shots = vec![Shot {
            prompt: "p".to_string(),
            image: None,
        }];
        let err = invoke_few_shot(&mut backend, &policy, &shots)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("few-shot"));
        assert_eq!(backend.calls, 0);
    }

    #[test]
    fn test_select_backend_unknown_name() {
        let config = ModelConfig {
            name: "palm".to_string(),
            credentials: None,
            endpoint: "http://localhost:11434".to_string(),
            engine: String::new(),
            max_image_size: 1024,
            temperature: 0.0,
            max_tokens: 512,
        };
        let err = select_backend(&config).unwrap_err().to_string();
        assert!(err.contains("palm"));
        for name in BACKEND_NAMES {
            assert!(err.contains(name));
        }
    }

    #[test]
    fn test_select_backend_known_names() {
        for name in BACKEND_NAMES {
            let config = ModelConfig {
                name: name.to_string(),
                credentials: None,
                endpoint: "http://localhost:11434".to_string(),
                engine: "test".to_string(),
                max_image_size: 1024,
                temperature: 0.0,
                max_tokens: 512,
            };
            let backend = select_backend(&config).unwrap();
            assert!(!backend.name().is_empty());
        }
    }

    #[test]
    fn test_credential_record_parsing() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"key": "sk-test", "engine": "gpt-4-vision-preview"}}"#).unwrap();

        let record = CredentialRecord::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(record.key, "sk-test");
        assert_eq!(record.engine, "gpt-4-vision-preview");
    }

    #[test]
    fn test_credential_record_missing_file() {
        let err = CredentialRecord::from_file("/nonexistent/creds.json").unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn test_credential_record_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = CredentialRecord::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }
}
