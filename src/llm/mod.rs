//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities; clone them freely.
//! Async is delegated to the underlying provider; the methods are `async fn`
//! on the enum so callers need no trait-object machinery.

pub mod json;
pub mod providers;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new arms below.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
    Scripted(providers::scripted::ScriptedProvider),
}

impl LlmProvider {
    /// Send `content` as the user turn (with an optional system prompt) and
    /// return the model's text reply.
    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<String, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.complete(content, system).await,
            LlmProvider::Scripted(p) => p.complete(content, system).await,
        }
    }

    /// Ask the vision model to describe an image according to `instruction`.
    pub async fn describe_image(
        &self,
        bytes: &[u8],
        mime: &str,
        instruction: &str,
    ) -> Result<String, ProviderError> {
        match self {
            LlmProvider::OpenAiCompatible(p) => p.describe_image(bytes, mime, instruction).await,
            LlmProvider::Scripted(p) => p.describe_image(bytes, mime, instruction).await,
        }
    }

    /// Short backend name for logs and the health endpoint.
    pub fn name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAiCompatible(_) => "openai",
            LlmProvider::Scripted(_) => "offline",
        }
    }
}
