use super::{BackendError, CredentialRecord, ModelBackend, Shot};
use crate::config::ModelConfig;
use crate::imaging::{resize_to_fit, EncodedImage};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, FinishReason, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use image::DynamicImage;

/// Hosted OpenAI chat-completions backend.
///
/// Covers both the text-only and vision families; the vision variant embeds
/// the normalized image as a base64 data URL content part.
#[derive(Debug)]
pub struct OpenAiBackend {
    credentials_path: String,
    vision: bool,
    temperature: f64,
    max_tokens: u32,
    max_image_size: u32,
    engine: String,
    client: Option<Client<OpenAIConfig>>,
}

impl OpenAiBackend {
    pub fn new(config: &ModelConfig, vision: bool) -> Self {
        let default_path = if vision {
            "openai_vision_info.json"
        } else {
            "openai_info.json"
        };
        Self {
            credentials_path: config
                .credentials
                .clone()
                .unwrap_or_else(|| default_path.to_string()),
            vision,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_image_size: config.max_image_size,
            engine: String::new(),
            client: None,
        }
    }

    /// Load the credential record and build the client once, on first use.
    fn load(&mut self) -> Result<(), BackendError> {
        if self.client.is_some() {
            return Ok(());
        }
        let record = CredentialRecord::from_file(&self.credentials_path)?;
        self.engine = record.engine;
        self.client = Some(Client::with_config(
            OpenAIConfig::new().with_api_key(record.key),
        ));
        Ok(())
    }

    /// Build the content parts for one (prompt, image) turn.
    fn build_parts(
        &self,
        prompt: &str,
        image: Option<&DynamicImage>,
    ) -> Result<Vec<ChatCompletionRequestUserMessageContentPart>, BackendError> {
        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();

        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt.to_string())
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to build text part: {}", e)))?;
        parts.push(text_part.into());

        if let Some(image) = image {
            if self.supports_vision() {
                let normalized = resize_to_fit(image.clone(), self.max_image_size);
                let encoded = EncodedImage::from_image(&normalized)
                    .map_err(|e| BackendError::Transient(format!("Image encoding failed: {}", e)))?;
                let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(encoded.data_url())
                            .build()
                            .map_err(|e| {
                                BackendError::Config(format!("Failed to build image url: {}", e))
                            })?,
                    )
                    .build()
                    .map_err(|e| {
                        BackendError::Config(format!("Failed to build image part: {}", e))
                    })?;
                parts.push(image_part.into());
            }
        }

        Ok(parts)
    }

    /// The request builder takes a `u16` token budget; reject configured
    /// values that would otherwise truncate.
    fn max_tokens_u16(&self) -> Result<u16, BackendError> {
        u16::try_from(self.max_tokens).map_err(|_| {
            BackendError::Config(format!(
                "max_tokens {} exceeds the request limit of {}",
                self.max_tokens,
                u16::MAX
            ))
        })
    }

    /// Send one request with the given content parts.
    async fn send(
        &self,
        parts: Vec<ChatCompletionRequestUserMessageContentPart>,
    ) -> Result<String, BackendError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BackendError::Config("Client not loaded".to_string()))?;

        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to build user message: {}", e)))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.engine)
            .messages([user_message.into()])
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens_u16()?)
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to build request: {}", e)))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| BackendError::Transient(format!("OpenAI request failed: {}", e)))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| BackendError::Empty("no choices in response".to_string()))?;

        if choice.finish_reason == Some(FinishReason::ContentFilter) {
            return Err(BackendError::Filtered);
        }

        match &choice.message.content {
            Some(content) if !content.trim().is_empty() => Ok(content.clone()),
            _ => Err(BackendError::Empty("no message content".to_string())),
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &str {
        if self.vision { "openai_vision" } else { "openai" }
    }

    fn supports_vision(&self) -> bool {
        self.vision
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

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(credentials: Option<&str>) -> ModelConfig {
        ModelConfig {
            name: "openai_vision".to_string(),
            credentials: credentials.map(String::from),
            endpoint: "http://localhost:11434".to_string(),
            engine: String::new(),
            max_image_size: 512,
            temperature: 0.0,
            max_tokens: 512,
        }
    }

    #[test]
    fn test_backend_names_by_variant() {
        let text = OpenAiBackend::new(&make_config(None), false);
        let vision = OpenAiBackend::new(&make_config(None), true);
        assert_eq!(text.name(), "openai");
        assert!(!text.supports_vision());
        assert_eq!(vision.name(), "openai_vision");
        assert!(vision.supports_vision());
    }

    #[test]
    fn test_default_credential_paths() {
        let text = OpenAiBackend::new(&make_config(None), false);
        let vision = OpenAiBackend::new(&make_config(None), true);
        assert_eq!(text.credentials_path, "openai_info.json");
        assert_eq!(vision.credentials_path, "openai_vision_info.json");

        let custom = OpenAiBackend::new(&make_config(Some("my_creds.json")), true);
        assert_eq!(custom.credentials_path, "my_creds.json");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_error() {
        let mut backend = OpenAiBackend::new(&make_config(Some("/nonexistent/creds.json")), true);
        let err = backend.call_once("prompt", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn test_oversized_max_tokens_is_config_error() {
        let mut config = make_config(None);
        config.max_tokens = 70_000;
        let backend = OpenAiBackend::new(&config, false);
        let err = backend.max_tokens_u16().unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));

        config.max_tokens = 512;
        let backend = OpenAiBackend::new(&config, false);
        assert_eq!(backend.max_tokens_u16().unwrap(), 512);
    }

    #[test]
    fn test_text_variant_ignores_image() {
        let backend = OpenAiBackend::new(&make_config(None), false);
        let image = DynamicImage::new_rgb8(16, 16);
        let parts = backend.build_parts("prompt", Some(&image)).unwrap();
        // Only the text part; the image is silently dropped
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_vision_variant_embeds_image() {
        let backend = OpenAiBackend::new(&make_config(None), true);
        let image = DynamicImage::new_rgb8(16, 16);
        let parts = backend.build_parts("prompt", Some(&image)).unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_vision_variant_without_image() {
        let backend = OpenAiBackend::new(&make_config(None), true);
        let parts = backend.build_parts("prompt", None).unwrap();
        assert_eq!(parts.len(), 1);
    }
}
