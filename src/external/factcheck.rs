//! Fact-check collaborator: scores a diagnosis independently of the model
//! that produced it.
//!
//! Speaks the OpenAI chat protocol (Perplexity by default), so it reuses
//! `LlmProvider` rather than carrying its own HTTP client.

use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::llm::json::parse_reply;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::providers::scripted::ScriptedProvider;
use crate::llm::{LlmProvider, ProviderError};
use crate::prompts::{self, PromptKind};
use crate::types::DiagnosisResult;

#[derive(Debug, Clone, Deserialize)]
pub struct FactCheckResult {
    pub confidence: f32,
    #[serde(default)]
    pub supported: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct FactChecker {
    provider: LlmProvider,
}

impl FactChecker {
    pub fn new(provider: LlmProvider) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        if config.llm.provider == "offline" {
            return Ok(Self::new(LlmProvider::Scripted(ScriptedProvider::offline())));
        }
        let p = OpenAiCompatibleProvider::new(
            config.factcheck.api_base_url.clone(),
            config.factcheck.model.clone(),
            config.factcheck.model.clone(),
            0.0,
            config.llm.max_tokens,
            config.llm.timeout_seconds,
            config.credentials.perplexity_api_key.clone(),
        )?;
        Ok(Self::new(LlmProvider::OpenAiCompatible(p)))
    }

    /// Score `diagnosis` against `symptoms`. An unparsable reply is an error,
    /// never a default score.
    pub async fn check(
        &self,
        symptoms: &[String],
        diagnosis: &DiagnosisResult,
    ) -> Result<FactCheckResult, ProviderError> {
        let diagnosis_text = diagnosis
            .conditions()
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { format!("primary: {c}") } else { format!("differential: {c}") })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = prompts::render(
            PromptKind::FactCheck,
            [("symptoms", symptoms.join(", ")), ("diagnosis", diagnosis_text)],
        );
        let reply = self.provider.complete(&prompt, Some(PromptKind::FactCheck.system())).await?;
        let mut result: FactCheckResult = parse_reply(&reply)
            .map_err(|e| ProviderError::Request(format!("fact-check reply unusable: {e}")))?;
        if !result.confidence.is_finite() {
            return Err(ProviderError::Request("fact-check confidence is not a number".into()));
        }
        result.confidence = result.confidence.clamp(0.0, 1.0);
        debug!(confidence = result.confidence, supported = result.supported, "fact-check complete");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DiagnosisCandidate;

    fn diagnosis() -> DiagnosisResult {
        DiagnosisResult {
            primary: DiagnosisCandidate {
                condition: "Migraine".into(),
                confidence: 0.7,
                rationale: String::new(),
            },
            differentials: vec![],
            recommended_tests: vec![],
            rationale: String::new(),
        }
    }

    #[tokio::test]
    async fn parses_scripted_verdict() {
        let p = ScriptedProvider::new().reply("fact checker", r#"```json
{"confidence": 1.4, "supported": true, "notes": "ok"}
```"#);
        let fc = FactChecker::new(LlmProvider::Scripted(p));
        let r = fc.check(&["headache".into()], &diagnosis()).await.unwrap();
        assert!((r.confidence - 1.0).abs() < f32::EPSILON);
        assert!(r.supported);
    }

    #[tokio::test]
    async fn prose_reply_is_error() {
        let p = ScriptedProvider::new().reply("fact checker", "I think it is fine.");
        let fc = FactChecker::new(LlmProvider::Scripted(p));
        assert!(fc.check(&["headache".into()], &diagnosis()).await.is_err());
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let p = ScriptedProvider::new().fail("fact checker", "503");
        let fc = FactChecker::new(LlmProvider::Scripted(p));
        assert!(fc.check(&[], &diagnosis()).await.is_err());
    }
}
