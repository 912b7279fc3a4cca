use super::{BackendError, CredentialRecord, ModelBackend, Shot};
use crate::config::ModelConfig;
use crate::imaging::{resize_to_fit, EncodedImage};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Hosted Anthropic backend over the Messages API.
///
/// Vision-capable; images travel as base64 source blocks ahead of the text
/// block, mirroring the API's recommended ordering.
#[derive(Debug)]
pub struct ClaudeBackend {
    credentials_path: String,
    endpoint: String,
    temperature: f64,
    max_tokens: u32,
    max_image_size: u32,
    engine: String,
    client: reqwest::Client,
    loaded: Option<String>,
}

// --- Request types ---

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f64,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

impl ClaudeBackend {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            credentials_path: config
                .credentials
                .clone()
                .unwrap_or_else(|| "claude_info.json".to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_image_size: config.max_image_size,
            engine: String::new(),
            client: reqwest::Client::new(),
            loaded: None,
        }
    }

    /// Point the backend at a different Messages endpoint (tests).
    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn load(&mut self) -> Result<(), BackendError> {
        if self.loaded.is_some() {
            return Ok(());
        }
        let record = CredentialRecord::from_file(&self.credentials_path)?;
        self.engine = record.engine;
        self.loaded = Some(record.key);
        Ok(())
    }

    fn build_content(
        &self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<Vec<ContentBlock>, BackendError> {
        let mut content = Vec::new();

        if let Some(image) = image {
            let normalized = resize_to_fit(image.clone(), self.max_image_size);
            let encoded = EncodedImage::from_image(&normalized)
                .map_err(|e| BackendError::Transient(format!("Image encoding failed: {}", e)))?;
            content.push(ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64".to_string(),
                    media_type: encoded.media_type,
                    data: encoded.data,
                },
            });
        }

        content.push(ContentBlock::Text {
            text: prompt.to_string(),
        });
        Ok(content)
    }

    async fn send(&self, content: Vec<ContentBlock>) -> Result<String, BackendError> {
        let api_key = self
            .loaded
            .as_ref()
            .ok_or_else(|| BackendError::Config("Client not loaded".to_string()))?;

        let body = MessagesRequest {
            model: self.engine.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("Claude request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            if text.contains("content_filter") || text.contains("response was filtered") {
                return Err(BackendError::Filtered);
            }
            return Err(BackendError::Transient(format!(
                "Claude HTTP {}: {}",
                status, text
            )));
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("Failed to parse Claude response: {}", e)))?;

        if parsed.stop_reason.as_deref() == Some("refusal") {
            return Err(BackendError::Filtered);
        }

        let text = parsed
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(BackendError::Empty("no text content".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelBackend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn call_once(
        &mut self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<String, BackendError> {
        self.load()?;
        let content = self.build_content(prompt, image)?;
        self.send(content).await
    }

    async fn call_once_few_shot(&mut self, shots: &[Shot]) -> Result<String, BackendError> {
        self.load()?;
        let mut content = Vec::new();
        for shot in shots {
            content.extend(self.build_content(&shot.prompt, shot.image.as_ref())?);
        }
        self.send(content).await
    }
}
