//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Exposes `complete` for text turns and `describe_image` for vision turns.
//! All OpenAI wire types are private to this module; callers never see them.
//! The same client backs the fact-check collaborator, which speaks the same
//! protocol against a different base URL.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use crate::llm::ProviderError;

/// Vision replies are short clinical descriptions.
const VISION_MAX_TOKENS: u32 = 500;

// ── Public provider ───────────────────────────────────────────────────────────

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Covers OpenAI, OpenAI-compatible local servers (Ollama, LM Studio…),
/// and hosted alternatives such as Perplexity. Constructed once at startup,
/// then cheaply cloned because `reqwest::Client` is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    vision_model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        vision_model: String,
        temperature: f32,
        max_tokens: u32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, vision_model, temperature, max_tokens, api_key })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `content` as the user message and optionally `system` as the system prompt.
    ///
    /// One round-trip only; conversation state is the caller's concern.
    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<String, ProviderError> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(Message { role: "system", content: MessageContent::Text(sys.to_string()) });
        }
        messages.push(Message { role: "user", content: MessageContent::Text(content.to_string()) });

        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature_for(&self.model),
            max_tokens: Some(self.max_tokens),
        };

        debug!(
            model = %payload.model,
            temperature = ?payload.temperature,
            content_len = content.len(),
            "sending LLM request"
        );
        self.send(payload).await
    }

    /// Send one image (as a base64 data URL) plus `instruction` to the vision model.
    pub async fn describe_image(
        &self,
        bytes: &[u8],
        mime: &str,
        instruction: &str,
    ) -> Result<String, ProviderError> {
        let data_url = format!("data:{mime};base64,{}", BASE64.encode(bytes));
        let payload = ChatCompletionRequest {
            model: self.vision_model.clone(),
            messages: vec![Message {
                role: "user",
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: instruction.to_string() },
                    ContentPart::ImageUrl { image_url: ImageUrl { url: data_url } },
                ]),
            }],
            temperature: self.temperature_for(&self.vision_model),
            max_tokens: Some(VISION_MAX_TOKENS),
        };

        debug!(model = %payload.model, image_bytes = bytes.len(), %mime, "sending vision request");
        self.send(payload).await
    }

    // Some models (gpt-5 family) do not accept a temperature parameter.
    fn temperature_for(&self, model: &str) -> Option<f32> {
        if model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        }
    }

    async fn send(&self, payload: ChatCompletionRequest) -> Result<String, ProviderError> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;

        let response = check_status(response).await?;

        let parsed = response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            ProviderError::Request(format!("failed to parse response body: {e}"))
        })?;

        debug!(choices = parsed.choices.len(), "received LLM response");
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(&parsed)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(response = %json, "full LLM response payload");
        }

        extract_text(parsed)
    }
}

fn extract_text(parsed: ChatCompletionResponse) -> Result<String, ProviderError> {
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::Request("empty or missing content in response".into()))
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// Consume the response and return it if successful, or a structured error.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env.error.code.map(|v| match v {
            serde_json::Value::String(s) => format!(" [code={s}]"),
            other => format!(" [code={other}]"),
        }).unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "upstream request returned HTTP error");
    Err(ProviderError::Request(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_message_serializes_as_parts() {
        let msg = Message {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "describe".into() },
                ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,AA==".into() } },
            ]),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["type"], "image_url");
        assert_eq!(v["content"][1]["image_url"]["url"], "data:image/png;base64,AA==");
    }

    #[test]
    fn text_message_serializes_as_string() {
        let msg = Message { role: "system", content: MessageContent::Text("hi".into()) };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["content"], "hi");
    }

    #[test]
    fn gpt5_omits_temperature() {
        let p = OpenAiCompatibleProvider::new(
            "http://localhost:0".into(),
            "gpt-5-mini".into(),
            "gpt-4o".into(),
            0.3,
            256,
            1,
            None,
        )
        .unwrap();
        assert_eq!(p.temperature_for("gpt-5-mini"), None);
        assert_eq!(p.temperature_for("gpt-4o"), Some(0.3));
    }

    #[test]
    fn empty_choice_is_error() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#).unwrap();
        assert!(extract_text(parsed).is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_error() {
        let p = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:9/v1/chat/completions".into(),
            "m".into(),
            "m".into(),
            0.0,
            16,
            1,
            None,
        )
        .unwrap();
        assert!(matches!(p.complete("hi", None).await, Err(ProviderError::Request(_))));
    }
}
