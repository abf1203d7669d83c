//! Scripted LLM provider: deterministic replies chosen by prompt substring.
//!
//! Backs the `offline` provider (canned clinical JSON, no network) and the
//! test suite, which scripts per-step replies, failures and hangs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::llm::ProviderError;

/// What a matching rule does when called.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
    /// Never resolves; used to exercise step timeouts and cancellation.
    Hang,
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    replies: Vec<ScriptedReply>,
}

/// Rules are matched in insertion order against the system prompt, or the
/// content when no system prompt is given.
/// A rule with several replies returns them in sequence and then repeats the last.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    rules: Vec<Rule>,
    image_description: Option<String>,
    counters: Arc<Mutex<HashMap<String, usize>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.replies(needle, &[text])
    }

    pub fn replies(mut self, needle: &str, texts: &[&str]) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            replies: texts.iter().map(|t| ScriptedReply::Text(t.to_string())).collect(),
        });
        self
    }

    pub fn fail(mut self, needle: &str, message: &str) -> Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            replies: vec![ScriptedReply::Fail(message.to_string())],
        });
        self
    }

    pub fn hang(mut self, needle: &str) -> Self {
        self.rules.push(Rule { needle: needle.to_string(), replies: vec![ScriptedReply::Hang] });
        self
    }

    pub fn image_description(mut self, text: &str) -> Self {
        self.image_description = Some(text.to_string());
        self
    }

    /// Append `other`'s rules after this provider's, so rules already
    /// registered here take precedence.
    pub fn merge(mut self, other: ScriptedProvider) -> Self {
        self.rules.extend(other.rules);
        if self.image_description.is_none() {
            self.image_description = other.image_description;
        }
        self
    }

    /// How many times the rule registered under `needle` has fired.
    pub fn calls(&self, needle: &str) -> usize {
        self.counters
            .lock()
            .map(|c| c.get(needle).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub async fn complete(&self, content: &str, system: Option<&str>) -> Result<String, ProviderError> {
        let haystack = system.unwrap_or(content);
        let rule = self
            .rules
            .iter()
            .find(|r| haystack.contains(&r.needle))
            .ok_or_else(|| ProviderError::Request("no scripted reply matches the prompt".into()))?;

        let index = {
            let mut counters = self
                .counters
                .lock()
                .map_err(|_| ProviderError::Request("scripted provider state poisoned".into()))?;
            let n = counters.entry(rule.needle.clone()).or_insert(0);
            let index = *n;
            *n += 1;
            index
        };

        let reply = rule
            .replies
            .get(index)
            .or_else(|| rule.replies.last())
            .cloned()
            .ok_or_else(|| ProviderError::Request(format!("rule '{}' has no replies", rule.needle)))?;

        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(msg) => Err(ProviderError::Request(msg)),
            ScriptedReply::Hang => std::future::pending().await,
        }
    }

    pub async fn describe_image(
        &self,
        bytes: &[u8],
        _mime: &str,
        _instruction: &str,
    ) -> Result<String, ProviderError> {
        if bytes.is_empty() {
            return Err(ProviderError::Request("empty image payload".into()));
        }
        self.image_description
            .clone()
            .ok_or_else(|| ProviderError::Request("no scripted image description".into()))
    }

    /// Canned replies for every workflow step, for running without an API key.
    pub fn offline() -> Self {
        Self::new()
            .reply(
                "symptom extractor",
                r#"{"symptoms":[{"name":"headache","severity":"moderate","duration":"2 days"},{"name":"fever","severity":"mild","duration":"1 day"}],"confidence":0.9}"#,
            )
            .reply(
                "context analyst",
                "Symptoms are consistent with a self-limiting viral illness; no red flags in the retrieved cases.",
            )
            .reply(
                "risk assessor",
                r#"{"risk_level":"low","risk_score":0.2,"immediate_concerns":[],"recommended_actions":["rest","fluids"],"time_sensitivity":"routine","rationale":"Mild presentation without warning signs."}"#,
            )
            .reply(
                "differential reviewer",
                r#"{"alternatives":[{"condition":"Sinusitis","confidence":0.3,"rationale":"Headache may reflect sinus involvement."}]}"#,
            )
            .reply(
                "diagnostician",
                r#"{"primary":{"condition":"Viral upper respiratory infection","confidence":0.82,"rationale":"Fever with headache of short duration."},"differentials":[{"condition":"Influenza","confidence":0.4,"rationale":"Seasonal prevalence."}],"recommended_tests":["temperature monitoring"],"rationale":"Most likely benign viral illness."}"#,
            )
            .reply(
                "clinical judge",
                r#"{"confidence":0.85,"concerns":[],"summary":"Diagnosis is consistent with the reported symptoms."}"#,
            )
            .reply(
                "care planner",
                "Rest, stay hydrated and monitor temperature. Seek care if symptoms worsen or persist beyond 5 days.",
            )
            .reply("fact checker", r#"{"confidence":0.8,"supported":true,"notes":"Consistent with guidelines."}"#)
            .image_description("The image shows mild skin redness without open wounds.")
    }
}
