use super::{BackendError, ModelBackend, Shot};
use crate::config::ModelConfig;
use crate::imaging::{resize_to_fit, EncodedImage};
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Locally hosted generation backend over the Ollama HTTP API.
///
/// No credential file; the endpoint and engine come straight from the run
/// configuration. Local models have no safety filter, so this backend never
/// reports a filtered response.
#[derive(Debug)]
pub struct OllamaBackend {
    endpoint: String,
    engine: String,
    temperature: f64,
    max_tokens: u32,
    max_image_size: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaBackend {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            engine: config.engine.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_image_size: config.max_image_size,
            client: reqwest::Client::new(),
        }
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<String, BackendError> {
        let normalized = resize_to_fit(image.clone(), self.max_image_size);
        let encoded = EncodedImage::from_image(&normalized)
            .map_err(|e| BackendError::Transient(format!("Image encoding failed: {}", e)))?;
        Ok(encoded.data)
    }

    async fn send(&self, prompt: String, images: Vec<String>) -> Result<String, BackendError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: self.engine.clone(),
            prompt,
            images,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transient(format!("Ollama request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Transient(format!(
                "Ollama HTTP {}: {}",
                status, text
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Transient(format!("Failed to parse Ollama response: {}", e)))?;

        if parsed.response.trim().is_empty() {
            return Err(BackendError::Empty("model generated no text".to_string()));
        }
        Ok(parsed.response)
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn supports_vision(&self) -> bool {
        true
    }

    async fn call_once(
        &mut self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<String, BackendError> {
        if self.engine.is_empty() {
            return Err(BackendError::Config(
                "No engine configured for the ollama backend".to_string(),
            ));
        }
        let images = match image {
            Some(image) => vec![self.encode_image(image)?],
            None => Vec::new(),
        };
        self.send(prompt.to_string(), images).await
    }

    async fn call_once_few_shot(&mut self, shots: &[Shot]) -> Result<String, BackendError> {
        if self.engine.is_empty() {
            return Err(BackendError::Config(
                "No engine configured for the ollama backend".to_string(),
            ));
        }
        let mut prompts = Vec::new();
        let mut images = Vec::new();
        for shot in shots {
            prompts.push(shot.prompt.clone());
            if let Some(image) = &shot.image {
                images.push(self.encode_image(image)?);
            }
        }
        self.send(prompts.join("\n\n"), images).await
    }
}
