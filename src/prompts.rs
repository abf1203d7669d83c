//! Prompt templates for every reasoning call.
//!
//! Each call has a short fixed system line (its role on the team, plus the
//! reply format) and a user-turn template stored under `config/prompts/`.
//! Templates on disk win so wording can be tuned without a rebuild; the
//! compiled-in copy is used when the file is missing.
//!
//! Variable substitution uses `{{key}}` syntax and is applied in a single
//! pass over the template at [`build()`](PromptBuilder::build) time.
//! Substituted values are never rescanned, so model or user text that
//! contains a placeholder is passed through literally.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const DEFAULT_PROMPTS_DIR: &str = "config/prompts";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("static placeholder pattern"));

/// One template per reasoning call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    ExtractSymptoms,
    AnalyzeContext,
    AssessRisk,
    Diagnose,
    Alternatives,
    Judge,
    Recommend,
    DescribeImage,
    FactCheck,
}

impl PromptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            PromptKind::ExtractSymptoms => "extract_symptoms.txt",
            PromptKind::AnalyzeContext => "analyze_context.txt",
            PromptKind::AssessRisk => "assess_risk.txt",
            PromptKind::Diagnose => "diagnose.txt",
            PromptKind::Alternatives => "alternatives.txt",
            PromptKind::Judge => "judge.txt",
            PromptKind::Recommend => "recommend.txt",
            PromptKind::DescribeImage => "describe_image.txt",
            PromptKind::FactCheck => "fact_check.txt",
        }
    }

    fn embedded(self) -> &'static str {
        match self {
            PromptKind::ExtractSymptoms => include_str!("../config/prompts/extract_symptoms.txt"),
            PromptKind::AnalyzeContext => include_str!("../config/prompts/analyze_context.txt"),
            PromptKind::AssessRisk => include_str!("../config/prompts/assess_risk.txt"),
            PromptKind::Diagnose => include_str!("../config/prompts/diagnose.txt"),
            PromptKind::Alternatives => include_str!("../config/prompts/alternatives.txt"),
            PromptKind::Judge => include_str!("../config/prompts/judge.txt"),
            PromptKind::Recommend => include_str!("../config/prompts/recommend.txt"),
            PromptKind::DescribeImage => include_str!("../config/prompts/describe_image.txt"),
            PromptKind::FactCheck => include_str!("../config/prompts/fact_check.txt"),
        }
    }

    /// System line naming the caller's role on the team.
    pub fn system(self) -> &'static str {
        match self {
            PromptKind::ExtractSymptoms => {
                "You are the symptom extractor of a clinical decision-support team. Reply with a single JSON object and nothing else."
            }
            PromptKind::AnalyzeContext => {
                "You are the context analyst of a clinical decision-support team. Reply in plain prose of at most five sentences."
            }
            PromptKind::AssessRisk => {
                "You are the risk assessor of a clinical decision-support team. Reply with a single JSON object and nothing else."
            }
            PromptKind::Diagnose => {
                "You are the diagnostician of a clinical decision-support team. Reply with a single JSON object and nothing else."
            }
            PromptKind::Alternatives => {
                "You are the differential reviewer of a clinical decision-support team. Reply with a single JSON object and nothing else."
            }
            PromptKind::Judge => {
                "You are the clinical judge of a clinical decision-support team. Reply with a single JSON object and nothing else."
            }
            PromptKind::Recommend => {
                "You are the care planner of a clinical decision-support team. Reply in plain prose suitable for the stated audience."
            }
            PromptKind::DescribeImage => "You are the image describer of a clinical decision-support team.",
            PromptKind::FactCheck => {
                "You are a medical fact checker. Verify claims against current clinical literature and reply with a single JSON object and nothing else."
            }
        }
    }
}

/// Loads a template and substitutes `{{vars}}`.
pub struct PromptBuilder {
    prompts_dir: PathBuf,
    template: String,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    /// Create a builder rooted at `prompts_dir` (e.g. `"config/prompts"`).
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self { prompts_dir: prompts_dir.into(), template: String::new(), vars: HashMap::new() }
    }

    /// Load the template for `kind`, preferring the on-disk copy.
    pub fn template(mut self, kind: PromptKind) -> Self {
        let path = self.prompts_dir.join(kind.file_name());
        self.template = match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => {
                tracing::debug!("prompt: '{}' not found, using built-in template", path.display());
                kind.embedded().trim().to_string()
            }
        };
        self
    }

    /// Register a single variable.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Apply variable substitution and return the rendered prompt.
    /// Unknown placeholders are left as written.
    pub fn build(self) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures<'_>| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Render `kind` from the default prompts directory.
pub fn render<'a, I>(kind: PromptKind, vars: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    vars.into_iter()
        .fold(PromptBuilder::new(DEFAULT_PROMPTS_DIR).template(kind), |b, (k, v)| b.var(k, v))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dir_falls_back_to_embedded() {
        let out = PromptBuilder::new("/nonexistent/prompts")
            .template(PromptKind::ExtractSymptoms)
            .var("narrative", "text: my head hurts")
            .build();
        assert!(out.contains("text: my head hurts"));
        assert!(!out.contains("{{narrative}}"));
    }

    #[test]
    fn disk_template_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("judge.txt"), "Custom {{diagnosis}}").unwrap();
        let out = PromptBuilder::new(dir.path())
            .template(PromptKind::Judge)
            .var("diagnosis", "flu")
            .build();
        assert_eq!(out, "Custom flu");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("judge.txt"), "S: {{symptoms}}\nD: {{diagnosis}}").unwrap();
        for _ in 0..32 {
            let out = PromptBuilder::new(dir.path())
                .template(PromptKind::Judge)
                .var("symptoms", "fever")
                .var("diagnosis", "see {{symptoms}}")
                .build();
            assert_eq!(out, "S: fever\nD: see {{symptoms}}");
        }
    }

    #[test]
    fn unknown_placeholder_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("judge.txt"), "{{diagnosis}} {{other}}").unwrap();
        let out = PromptBuilder::new(dir.path()).template(PromptKind::Judge).var("diagnosis", "flu").build();
        assert_eq!(out, "flu {{other}}");
    }

    #[test]
    fn system_lines_are_distinct() {
        let kinds = [
            PromptKind::ExtractSymptoms,
            PromptKind::AnalyzeContext,
            PromptKind::AssessRisk,
            PromptKind::Diagnose,
            PromptKind::Alternatives,
            PromptKind::Judge,
            PromptKind::Recommend,
            PromptKind::FactCheck,
        ];
        for a in kinds {
            for b in kinds {
                if a != b {
                    assert_ne!(a.system(), b.system());
                }
            }
        }
    }
}
