//! Gemini API Client
//!
//! Thin reqwest client for `generateContent` and `embedContent`.
//! HTTP failures are mapped onto `ChatError` variants so the recovery layer
//! can decide what is worth retrying.

use crate::error::ChatError;
use crate::message::{ChatMessage, Role};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

/// Inline binary data (images, audio) sent alongside text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// generateContent request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    /// Build a request from chat history
    ///
    /// System messages are folded into the system instruction; `model` is
    /// Gemini's name for the assistant role.
    pub fn from_messages(
        messages: &[ChatMessage],
        system_parts: Vec<Part>,
        generation_config: GenerationConfig,
    ) -> Self {
        let mut system_parts = system_parts;
        let mut contents = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(Part::text(msg.content.clone())),
                Role::User | Role::Assistant => contents.push(Content {
                    role: Some(if msg.role == Role::User { "user" } else { "model" }.to_string()),
                    parts: vec![Part::text(msg.content.clone())],
                }),
            }
        }

        Self {
            contents,
            system_instruction: if system_parts.is_empty() {
                None
            } else {
                Some(Content {
                    role: None,
                    parts: system_parts,
                })
            },
            generation_config,
        }
    }

    /// Append inline parts to the last user turn
    pub fn attach_to_last_user(&mut self, parts: Vec<Part>) {
        if parts.is_empty() {
            return;
        }
        if let Some(content) = self
            .contents
            .iter_mut()
            .rev()
            .find(|c| c.role.as_deref() == Some("user"))
        {
            content.parts.extend(parts);
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    content: EmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Completion result with usage stats
#[derive(Debug, Clone)]
pub struct CompleteResult {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        embedding_model: &str,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }

    /// Create from config; None when no API key is configured
    pub fn from_config(config: &crate::config::Config) -> Result<Option<Self>, ChatError> {
        match config.gemini_api_key.as_deref() {
            Some(key) => Self::new(
                key,
                &config.gemini_base_url,
                &config.gemini_model,
                &config.embedding_model,
                config.vendor_timeout,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    /// Single non-streaming generateContent call
    pub async fn generate_content(&self, request: &GenerateContentRequest) -> Result<CompleteResult, ChatError> {
        debug!(
            "Calling Gemini API: model={}, turns={}",
            self.model,
            request.contents.len()
        );

        let response = self
            .client
            .post(self.endpoint(&self.model, "generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let result: GenerateContentResponse = response.json().await?;

        if let Some(reason) = result.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ChatError::Provider(format!("prompt blocked by safety filter: {}", reason)));
        }

        let candidate = result
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Provider("no candidate in response".to_string()))?;

        let content = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ChatError::Provider(format!(
                "empty candidate (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let usage = result.usage_metadata.unwrap_or_default();
        let complete = CompleteResult {
            content,
            model: self.model.clone(),
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason: candidate.finish_reason,
        };

        info!(
            "Gemini response: model={}, in={}, out={}, finish={}",
            complete.model,
            complete.input_tokens,
            complete.output_tokens,
            complete.finish_reason.as_deref().unwrap_or("-")
        );

        Ok(complete)
    }

    /// Embed a single text
    pub async fn embed_content(&self, text: &str) -> Result<Vec<f32>, ChatError> {
        let body = EmbedContentRequest {
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
        };

        let response = self
            .client
            .post(self.endpoint(&self.embedding_model, "embedContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let result: EmbedContentResponse = response.json().await?;
        Ok(result.embedding.values)
    }
}

/// Map a non-success status to an error whose text classifies correctly
fn status_error(status: StatusCode, body: &str) -> ChatError {
    let detail = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect());
    let detail = format!("HTTP {}: {}", status.as_u16(), detail);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ChatError::Timeout(detail),
        StatusCode::BAD_REQUEST if detail.to_lowercase().contains("api key") => ChatError::Auth(detail),
        StatusCode::BAD_REQUEST => ChatError::Validation(detail),
        _ => ChatError::Provider(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn config() -> GenerationConfig {
        GenerationConfig {
            max_output_tokens: 256,
            temperature: 0.5,
        }
    }

    #[test]
    fn test_request_maps_roles() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("Hi"),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("Help me price"),
        ];
        let request = GenerateContentRequest::from_messages(&messages, vec![Part::text("persona")], config());

        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[1].role.as_deref(), Some("model"));
        let system = request.system_instruction.unwrap();
        assert_eq!(system.parts.len(), 2);
        assert_eq!(system.parts[1].text.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest::from_messages(&[ChatMessage::user("Hi")], vec![], config());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Hi");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 256);
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_attach_to_last_user() {
        let messages = vec![ChatMessage::user("first"), ChatMessage::assistant("ok"), ChatMessage::user("see image")];
        let mut request = GenerateContentRequest::from_messages(&messages, vec![], config());
        request.attach_to_last_user(vec![Part::inline("image/png", "aGVsbG8=")]);

        let last = &request.contents[2];
        assert_eq!(last.parts.len(), 2);
        assert_eq!(last.parts[1].inline_data.as_ref().unwrap().mime_type, "image/png");
        assert_eq!(request.contents[0].parts.len(), 1);
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota)."}}"#;
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.code(), ErrorCode::RateLimit);
        assert!(err.to_string().contains("exhausted"));

        let err = status_error(StatusCode::BAD_REQUEST, r#"{"error":{"message":"API key not valid."}}"#);
        assert_eq!(err.code(), ErrorCode::Auth);

        let err = status_error(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert_eq!(err.code(), ErrorCode::AiProvider);
    }
}
