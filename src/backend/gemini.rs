use super::{BackendError, CredentialRecord, ModelBackend, Shot};
use crate::config::ModelConfig;
use crate::imaging::{resize_to_fit, EncodedImage};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Hosted Google backend over the Generative Language `generateContent` API.
///
/// The `gemini` and `gemini_vision` variants differ only in their default
/// credential file; both embed images when a sample carries one.
#[derive(Debug)]
pub struct GeminiBackend {
    name: &'static str,
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
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
enum Part {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inline_data")]
    InlineData(InlineData),
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "candidateCount")]
    candidate_count: u32,
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

// --- Response types ---

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl GeminiBackend {
    pub fn new(config: &ModelConfig, vision: bool) -> Self {
        let (name, default_path) = if vision {
            ("gemini_vision", "gemini_vision_info.json")
        } else {
            ("gemini", "gemini_info.json")
        };
        Self {
            name,
            credentials_path: config
                .credentials
                .clone()
                .unwrap_or_else(|| default_path.to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_image_size: config.max_image_size,
            engine: String::new(),
            client: reqwest::Client::new(),
            loaded: None,
        }
    }

    /// Point the backend at a different API root (tests).
    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
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

    fn build_parts(
        &self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<Vec<Part>, BackendError> {
        let mut parts = vec![Part::Text(prompt.to_string())];

        if let Some(image) = image {
            let normalized = resize_to_fit(image.clone(), self.max_image_size);
            let encoded = EncodedImage::from_image(&normalized)
                .map_err(|e| BackendError::Transient(format!("Image encoding failed: {}", e)))?;
            parts.push(Part::InlineData(InlineData {
                mime_type: encoded.media_type,
                data: encoded.data,
            }));
        }
        Ok(parts)
    }

    async fn send(&self, parts: Vec<Part>) -> Result<String, BackendError> {
        let api_key = self
            .loaded
            .as_ref()
            .ok_or_else(|| BackendError::Config("Client not loaded".to_string()))?;

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.engine, api_key
        );
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                candidate_count: 1,
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("Gemini request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Transient(format!(
                "Gemini HTTP {}: {}",
                status, text
            )));
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("Failed to parse Gemini response: {}", e)))?;

        if let Some(feedback) = &parsed.prompt_feedback {
            if feedback.block_reason.is_some() {
                return Err(BackendError::Filtered);
            }
        }

        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(BackendError::Empty("no candidate parts".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &str {
        self.name
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
        let parts = self.build_parts(prompt, image)?;
        self.send(parts).await
    }

    async fn call_once_few_shot(&mut self, shots: &[Shot]) -> Result<String, BackendError> {
        self.load()?;
        let mut parts = Vec::new();
        for shot in shots {
            parts.extend(self.build_parts(&shot.prompt, shot.image.as_ref())?);
        }
        self.send(parts).await
    }
}
