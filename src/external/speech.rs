//! Speech-to-text collaborator.
//!
//! `Transcriber` is enum-dispatched like `LlmProvider`. Whisper goes through the
//! OpenAI audio endpoint as a multipart upload; Deepgram takes the raw bytes
//! and reports its own confidence.

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::config::{Config, SpeechProvider};
use crate::llm::ProviderError;
use crate::llm::providers::openai_compatible::check_status;

/// Text recovered from an audio payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// Provider-reported confidence, when the provider has one.
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub enum Transcriber {
    Whisper(WhisperClient),
    Deepgram(DeepgramClient),
    /// Returns a fixed transcript. Used by the offline provider and tests.
    Fixed(Transcription),
}

impl Transcriber {
    /// Pick the backend from config. The offline LLM provider implies an
    /// offline transcriber so the whole pipeline runs without network access.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        if config.llm.provider == "offline" {
            return Ok(Transcriber::Fixed(Transcription {
                text: "I have had a headache and a mild fever for two days.".into(),
                confidence: None,
            }));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.llm.timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        let speech = &config.speech;
        match speech.provider {
            SpeechProvider::Whisper => Ok(Transcriber::Whisper(WhisperClient {
                client,
                url: speech.whisper_url.clone(),
                model: speech.whisper_model.clone(),
                api_key: config.credentials.openai_api_key.clone(),
            })),
            SpeechProvider::Deepgram => Ok(Transcriber::Deepgram(DeepgramClient {
                client,
                url: speech.deepgram_url.clone(),
                model: speech.deepgram_model.clone(),
                api_key: config.credentials.deepgram_api_key.clone().unwrap_or_default(),
            })),
        }
    }

    pub async fn transcribe(&self, bytes: &[u8], mime: &str) -> Result<Transcription, ProviderError> {
        if bytes.is_empty() {
            return Err(ProviderError::Request("empty audio payload".into()));
        }
        match self {
            Transcriber::Whisper(c) => c.transcribe(bytes, mime).await,
            Transcriber::Deepgram(c) => c.transcribe(bytes, mime).await,
            Transcriber::Fixed(t) => Ok(t.clone()),
        }
    }
}

// ── Whisper ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WhisperClient {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

impl WhisperClient {
    async fn transcribe(&self, bytes: &[u8], mime: &str) -> Result<Transcription, ProviderError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(format!("audio.{}", extension_for(mime)))
            .mime_str(mime)
            .map_err(|e| ProviderError::Request(format!("invalid audio mime '{mime}': {e}")))?;
        let form = Form::new().text("model", self.model.clone()).part("file", part);

        debug!(model = %self.model, audio_bytes = bytes.len(), "sending whisper request");
        let mut req = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| ProviderError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        let parsed: WhisperResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to parse whisper response: {e}")))?;
        Ok(Transcription { text: parsed.text.trim().to_string(), confidence: None })
    }
}

// ── Deepgram ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DeepgramClient {
    client: Client,
    url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for DeepgramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramClient")
            .field("url", &self.url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

impl DeepgramClient {
    async fn transcribe(&self, bytes: &[u8], mime: &str) -> Result<Transcription, ProviderError> {
        debug!(model = %self.model, audio_bytes = bytes.len(), "sending deepgram request");
        let response = self
            .client
            .post(&self.url)
            .query(&[("model", self.model.as_str()), ("smart_format", "true")])
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        let parsed: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to parse deepgram response: {e}")))?;
        first_alternative(parsed)
    }
}

fn first_alternative(parsed: DeepgramResponse) -> Result<Transcription, ProviderError> {
    let alt = parsed
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .ok_or_else(|| ProviderError::Request("deepgram returned no alternatives".into()))?;
    Ok(Transcription {
        text: alt.transcript.trim().to_string(),
        confidence: alt.confidence.map(|c| c.clamp(0.0, 1.0)),
    })
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        _ => "wav",
    }
}

/// Guess an audio mime type from a file extension.
pub fn mime_from_path(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("flac") => "audio/flac",
        _ => "audio/wav",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deepgram_payload_parses_confidence() {
        let raw = r#"{"results":{"channels":[{"alternatives":[{"transcript":" chest pain ","confidence":0.93}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(raw).unwrap();
        let t = first_alternative(parsed).unwrap();
        assert_eq!(t.text, "chest pain");
        assert_eq!(t.confidence, Some(0.93));
    }

    #[test]
    fn deepgram_without_alternatives_errors() {
        let parsed: DeepgramResponse =
            serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert!(first_alternative(parsed).is_err());
    }

    #[tokio::test]
    async fn fixed_transcriber_rejects_empty_audio() {
        let t = Transcriber::Fixed(Transcription { text: "cough".into(), confidence: Some(0.7) });
        assert!(t.transcribe(b"", "audio/wav").await.is_err());
        assert_eq!(t.transcribe(b"RIFF", "audio/wav").await.unwrap().text, "cough");
    }

    #[test]
    fn mime_guess() {
        assert_eq!(mime_from_path(std::path::Path::new("a.MP3")), "audio/mpeg");
        assert_eq!(mime_from_path(std::path::Path::new("a")), "audio/wav");
        assert_eq!(extension_for("audio/ogg"), "ogg");
    }
}
