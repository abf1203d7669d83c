//! Step bodies: prompt assembly, one reasoning call, reply parsing.
//!
//! Each step consumes the [`CaseContext`] and hands back an updated one.
//! Replies are parsed into private wire structs first and only then mapped
//! onto the public case types, so a model that drifts from the requested
//! shape surfaces as `MalformedResponse` instead of half-filled data.

use chrono::Utc;
use serde::Deserialize;
use tracing::trace;

use crate::llm::ProviderError;
use crate::llm::json::parse_reply;
use crate::prompts::{self, PromptKind};
use crate::subsystems::knowledge;
use crate::subsystems::safety;
use crate::subsystems::validation::CaseFlags;
use crate::types::{
    CaseRecord, ConfidenceSource, DiagnosisCandidate, DiagnosisResult, EscalationReason, JudgeEvaluation,
    RecordedDiagnosis, RetrievedContext, RiskAssessment, RiskLevel, Severity, Symptom, ValidationOutcome,
};

use super::{CaseContext, StepErrorKind, StepName, WorkflowDeps};

/// Rationale phrases that mark a risk assessment as urgent on their own.
const URGENCY_KEYWORDS: &[&str] = &[
    "high risk",
    "emergency",
    "immediate",
    "urgent",
    "severe",
    "critical",
    "life-threatening",
];

pub(super) async fn execute(
    deps: &WorkflowDeps,
    step: StepName,
    ctx: CaseContext,
) -> Result<CaseContext, StepErrorKind> {
    match step {
        StepName::Screen => Ok(screen(ctx)),
        StepName::Extract => extract(deps, ctx).await,
        StepName::Retrieve => retrieve(deps, ctx).await,
        StepName::AssessRisk => assess_risk(deps, ctx).await,
        StepName::Diagnose => diagnose(deps, ctx).await,
        StepName::Alternatives => alternatives(deps, ctx).await,
        StepName::Judge => judge(deps, ctx).await,
        StepName::Validate => validate(deps, ctx).await,
        StepName::Persist => persist(deps, ctx).await,
        StepName::Recommend => recommend(deps, ctx).await,
    }
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    symptoms: Vec<SymptomWire>,
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SymptomWire {
    name: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RiskReply {
    risk_level: String,
    #[serde(default)]
    risk_score: Option<f32>,
    #[serde(default)]
    immediate_concerns: Vec<String>,
    #[serde(default)]
    recommended_actions: Vec<String>,
    #[serde(default)]
    time_sensitivity: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct CandidateWire {
    condition: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct DiagnosisReply {
    primary: CandidateWire,
    #[serde(default)]
    differentials: Vec<CandidateWire>,
    #[serde(default)]
    recommended_tests: Vec<String>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct AlternativesReply {
    #[serde(default)]
    alternatives: Vec<CandidateWire>,
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    confidence: f32,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    summary: String,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn ask(deps: &WorkflowDeps, kind: PromptKind, prompt: &str) -> Result<String, StepErrorKind> {
    trace!(prompt, "llm request");
    let reply = deps
        .llm
        .complete(prompt, Some(kind.system()))
        .await
        .map_err(|e: ProviderError| StepErrorKind::Collaborator(e.to_string()))?;
    trace!(reply = %reply, "llm reply");
    Ok(reply)
}

fn parse<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, StepErrorKind> {
    parse_reply(reply).map_err(StepErrorKind::MalformedResponse)
}

fn clamp_unit(value: f32) -> Result<f32, StepErrorKind> {
    if value.is_finite() {
        Ok(value.clamp(0.0, 1.0))
    } else {
        Err(StepErrorKind::MalformedResponse("confidence is not a number".into()))
    }
}

fn require<T>(value: Option<&T>, what: &str) -> Result<(), StepErrorKind> {
    match value {
        Some(_) => Ok(()),
        None => Err(StepErrorKind::Incomplete(format!("{what} has not been produced"))),
    }
}

fn candidate(wire: CandidateWire) -> Result<DiagnosisCandidate, StepErrorKind> {
    Ok(DiagnosisCandidate {
        condition: wire.condition.trim().to_string(),
        confidence: clamp_unit(wire.confidence)?,
        rationale: wire.rationale,
    })
}

pub fn format_symptoms(symptoms: &[Symptom]) -> String {
    symptoms
        .iter()
        .map(|s| match &s.duration {
            Some(d) => format!("- {} ({}, {})", s.name, s.severity.as_str(), d),
            None => format!("- {} ({})", s.name, s.severity.as_str()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_similar_cases(ctx: &RetrievedContext) -> String {
    if ctx.similar_cases.is_empty() {
        return "none found".into();
    }
    ctx.similar_cases
        .iter()
        .map(|c| {
            format!(
                "- shared {} symptom(s); symptoms: {}; diagnoses: {}",
                c.matching_symptoms,
                c.symptoms.join(", "),
                if c.diagnoses.is_empty() { "none recorded".to_string() } else { c.diagnoses.join(", ") }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_relations(ctx: &RetrievedContext) -> String {
    if ctx.relations.is_empty() {
        return "none found".into();
    }
    ctx.relations
        .iter()
        .map(|r| format!("- {} {} {} {}", r.symptom, r.relationship, r.related_kind, r.related_name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_risk(risk: &RiskAssessment) -> String {
    let mut out = format!(
        "level: {} (score {:.2}), time sensitivity: {}",
        risk.level, risk.score, risk.time_sensitivity
    );
    if !risk.immediate_concerns.is_empty() {
        out.push_str(&format!("\nconcerns: {}", risk.immediate_concerns.join("; ")));
    }
    if !risk.rationale.is_empty() {
        out.push_str(&format!("\nrationale: {}", risk.rationale));
    }
    if risk.requires_immediate_attention {
        out.push_str("\nrequires immediate attention");
    }
    out
}

fn format_diagnosis(dx: &DiagnosisResult) -> String {
    let mut lines = vec![format!(
        "primary: {} (confidence {:.2}) {}",
        dx.primary.condition, dx.primary.confidence, dx.primary.rationale
    )];
    for d in &dx.differentials {
        lines.push(format!("differential: {} (confidence {:.2}) {}", d.condition, d.confidence, d.rationale));
    }
    if !dx.recommended_tests.is_empty() {
        lines.push(format!("tests: {}", dx.recommended_tests.join(", ")));
    }
    lines.join("\n")
}

/// Urgent when the level is high or worse, or the rationale uses an urgency phrase.
pub fn requires_immediate_attention(level: RiskLevel, rationale: &str) -> bool {
    if level >= RiskLevel::High {
        return true;
    }
    let rationale = rationale.to_lowercase();
    URGENCY_KEYWORDS.iter().any(|k| rationale.contains(k))
}

pub fn parse_risk(reply: &str) -> Result<RiskAssessment, StepErrorKind> {
    let wire: RiskReply = parse(reply)?;
    let level = RiskLevel::from_label(&wire.risk_level)
        .ok_or_else(|| StepErrorKind::MalformedResponse(format!("unknown risk level '{}'", wire.risk_level)))?;
    let score = match wire.risk_score {
        Some(s) => clamp_unit(s)?,
        None => default_score(level),
    };
    Ok(RiskAssessment {
        requires_immediate_attention: requires_immediate_attention(level, &wire.rationale),
        level,
        score,
        immediate_concerns: wire.immediate_concerns,
        recommended_actions: wire.recommended_actions,
        time_sensitivity: wire.time_sensitivity,
        rationale: wire.rationale,
    })
}

fn default_score(level: RiskLevel) -> f32 {
    match level {
        RiskLevel::Low => 0.2,
        RiskLevel::Medium => 0.5,
        RiskLevel::High => 0.75,
        RiskLevel::Critical => 0.95,
    }
}

pub fn parse_diagnosis(reply: &str) -> Result<DiagnosisResult, StepErrorKind> {
    let wire: DiagnosisReply = parse(reply)?;
    let primary = candidate(wire.primary)?;
    if primary.condition.is_empty() {
        return Err(StepErrorKind::MalformedResponse("primary diagnosis has no condition".into()));
    }
    let differentials = wire
        .differentials
        .into_iter()
        .map(candidate)
        .collect::<Result<Vec<_>, _>>()?;
    let base = DiagnosisResult {
        primary,
        differentials: Vec::new(),
        recommended_tests: wire.recommended_tests,
        rationale: wire.rationale,
    };
    Ok(base.with_alternatives(differentials))
}

// ── Steps ─────────────────────────────────────────────────────────────────────

fn screen(mut ctx: CaseContext) -> CaseContext {
    let narrative = ctx.report.narrative();
    ctx.screen = safety::screen(&narrative);
    tracing::debug!(
        case_id = %ctx.case_id,
        chars = narrative.len(),
        pii = ctx.screen.pii.len(),
        sensitive = ctx.screen.sensitive_terms.len(),
        "input screened"
    );
    ctx
}

async fn extract(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    let prompt = prompts::render(PromptKind::ExtractSymptoms, [("narrative", ctx.screen.redacted.clone())]);
    let reply = ask(deps, PromptKind::ExtractSymptoms, &prompt).await?;
    let wire: ExtractionReply = parse(&reply)?;

    let mut symptoms: Vec<Symptom> = Vec::new();
    for s in wire.symptoms {
        let rescreen = safety::screen(s.name.trim());
        // Offsets of these matches refer to the symptom name.
        ctx.screen.pii.extend(rescreen.pii);
        for term in rescreen.sensitive_terms {
            if !ctx.screen.sensitive_terms.contains(&term) {
                ctx.screen.sensitive_terms.push(term);
            }
        }
        let name = rescreen.redacted;
        if name.is_empty() || symptoms.iter().any(|k| k.name.eq_ignore_ascii_case(&name)) {
            continue;
        }
        symptoms.push(Symptom {
            name,
            severity: s.severity.as_deref().map(Severity::from_label).unwrap_or_default(),
            duration: s.duration.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        });
    }
    if symptoms.is_empty() {
        return Err(StepErrorKind::Incomplete("no symptoms could be extracted".into()));
    }

    let confidence = clamp_unit(wire.confidence.unwrap_or(1.0))?;
    ctx.report = ctx.report.with_symptoms(symptoms, confidence);
    Ok(ctx)
}

async fn retrieve(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    let names = ctx.report.symptom_names();
    let retrieved = knowledge::retrieve(&deps.store, &names, &deps.retrieval)
        .await
        .map_err(|e| StepErrorKind::Collaborator(e.to_string()))?;
    let mut retrieved = safety::sanitize_context(retrieved, ctx.role);

    let prompt = prompts::render(
        PromptKind::AnalyzeContext,
        [
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("similar_cases", format_similar_cases(&retrieved)),
            ("relations", format_relations(&retrieved)),
        ],
    );
    retrieved.analysis = ask(deps, PromptKind::AnalyzeContext, &prompt).await?.trim().to_string();
    ctx.retrieved = retrieved;
    Ok(ctx)
}

async fn assess_risk(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    let prompt = prompts::render(
        PromptKind::AssessRisk,
        [
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("context", ctx.retrieved.analysis.clone()),
        ],
    );
    let reply = ask(deps, PromptKind::AssessRisk, &prompt).await?;
    ctx.risk = Some(parse_risk(&reply)?);
    Ok(ctx)
}

async fn diagnose(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    require(ctx.risk.as_ref(), "risk assessment")?;
    let risk = ctx.risk.as_ref().map(format_risk).unwrap_or_default();
    let feedback = match (&ctx.judge, ctx.attempt) {
        (Some(j), attempt) if attempt > 1 => {
            let mut text = format!("attempt {} was not accepted: {}", attempt - 1, j.summary);
            if !j.concerns.is_empty() {
                text.push_str(&format!("\nconcerns: {}", j.concerns.join("; ")));
            }
            text
        }
        _ => "none".to_string(),
    };
    let prompt = prompts::render(
        PromptKind::Diagnose,
        [
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("context", ctx.retrieved.analysis.clone()),
            ("risk", risk),
            ("feedback", feedback),
        ],
    );
    let reply = ask(deps, PromptKind::Diagnose, &prompt).await?;
    ctx.diagnosis = Some(parse_diagnosis(&reply)?);
    ctx.judge = None;
    ctx.verdict = None;
    Ok(ctx)
}

async fn alternatives(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    let Some(dx) = ctx.diagnosis.take() else {
        return Err(StepErrorKind::Incomplete("diagnosis has not been produced".into()));
    };
    let prompt = prompts::render(
        PromptKind::Alternatives,
        [
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("diagnosis", format_diagnosis(&dx)),
        ],
    );
    let reply = ask(deps, PromptKind::Alternatives, &prompt).await?;
    let wire: AlternativesReply = parse(&reply)?;
    let extra = wire
        .alternatives
        .into_iter()
        .map(candidate)
        .collect::<Result<Vec<_>, _>>()?;
    ctx.diagnosis = Some(dx.with_alternatives(extra));
    Ok(ctx)
}

async fn judge(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    require(ctx.diagnosis.as_ref(), "diagnosis")?;
    let prompt = prompts::render(
        PromptKind::Judge,
        [
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("diagnosis", ctx.diagnosis.as_ref().map(format_diagnosis).unwrap_or_default()),
            ("risk", ctx.risk.as_ref().map(format_risk).unwrap_or_default()),
        ],
    );
    let reply = ask(deps, PromptKind::Judge, &prompt).await?;
    let wire: JudgeReply = parse(&reply)?;
    ctx.judge = Some(JudgeEvaluation {
        confidence: clamp_unit(wire.confidence)?,
        concerns: wire.concerns,
        summary: wire.summary,
    });
    Ok(ctx)
}

async fn validate(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    let (Some(dx), Some(judge)) = (ctx.diagnosis.as_ref(), ctx.judge.as_ref()) else {
        return Err(StepErrorKind::Incomplete("diagnosis and judge evaluation are required".into()));
    };
    let symptoms = ctx.report.symptom_names();
    let flags = CaseFlags {
        role: ctx.role,
        sensitive_input: ctx.is_sensitive(),
        symptoms: &symptoms,
        risk: ctx.risk.as_ref(),
        attempt: ctx.attempt,
    };
    let verdict = deps.validator.validate(dx, judge, flags).await;
    tracing::debug!(
        case_id = %ctx.case_id,
        outcome = ?verdict.outcome,
        confidence = verdict.confidence,
        source = ?verdict.source,
        "validation verdict"
    );
    ctx.verdict = Some(verdict);
    Ok(ctx)
}

async fn persist(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    if ctx.persisted {
        return Ok(ctx);
    }
    let Some(verdict) = ctx.verdict.as_ref().filter(|v| v.is_accepted()) else {
        return Err(StepErrorKind::Incomplete("case has no accepted verdict".into()));
    };
    let Some(dx) = ctx.diagnosis.as_ref() else {
        return Err(StepErrorKind::Incomplete("diagnosis has not been produced".into()));
    };
    let record = CaseRecord {
        case_id: ctx.case_id,
        recorded_at: Utc::now(),
        symptoms: ctx.report.symptom_names(),
        diagnoses: std::iter::once(&dx.primary)
            .chain(dx.differentials.iter())
            .map(|d| RecordedDiagnosis { name: d.condition.clone(), confidence: d.confidence })
            .collect(),
        confidence: verdict.confidence,
        risk_level: ctx.risk.as_ref().map(|r| r.level.as_str()).unwrap_or("unknown").to_string(),
        user_role: ctx.role,
        sensitive_content: ctx.is_sensitive(),
    };
    deps.store
        .store_case(&record)
        .await
        .map_err(|e| StepErrorKind::Collaborator(e.to_string()))?;
    ctx.persisted = true;
    Ok(ctx)
}

async fn recommend(deps: &WorkflowDeps, mut ctx: CaseContext) -> Result<CaseContext, StepErrorKind> {
    // Re-derive the urgency flag before it reaches the final text.
    if let Some(risk) = ctx.risk.as_mut() {
        risk.requires_immediate_attention = requires_immediate_attention(risk.level, &risk.rationale);
    }
    require(ctx.diagnosis.as_ref(), "diagnosis")?;
    let prompt = prompts::render(
        PromptKind::Recommend,
        [
            ("role", ctx.role.as_str().to_string()),
            ("symptoms", format_symptoms(ctx.report.symptoms())),
            ("diagnosis", ctx.diagnosis.as_ref().map(format_diagnosis).unwrap_or_default()),
            ("risk", ctx.risk.as_ref().map(format_risk).unwrap_or_default()),
        ],
    );
    let reply = ask(deps, PromptKind::Recommend, &prompt).await?;
    let text = reply.trim();
    if text.is_empty() {
        return Err(StepErrorKind::Incomplete("recommendation is empty".into()));
    }
    ctx.recommendation = Some(text.to_string());
    hold_sensitive_recommendation(&mut ctx);
    Ok(ctx)
}

/// A patient-facing recommendation naming a sensitive term turns an
/// automatic acceptance into a sensitive-content escalation. A clinician's
/// approval stands.
fn hold_sensitive_recommendation(ctx: &mut CaseContext) {
    if ctx.role.is_clinician() {
        return;
    }
    let terms = ctx.recommendation.as_deref().map(safety::sensitive_terms).unwrap_or_default();
    if terms.is_empty() {
        return;
    }
    let Some(verdict) = ctx.verdict.as_mut() else { return };
    if verdict.source == ConfidenceSource::HumanReview {
        return;
    }
    tracing::info!(case_id = %ctx.case_id, terms = ?terms, "recommendation held for sensitive content");
    verdict.outcome = ValidationOutcome::Escalate;
    verdict.reasons = vec![EscalationReason::SensitiveContent];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_parses_and_flags_keywords() {
        let r = parse_risk(
            r#"{"risk_level":"Medium","risk_score":0.4,"rationale":"Needs urgent imaging to rule out a bleed."}"#,
        )
        .unwrap();
        assert_eq!(r.level, RiskLevel::Medium);
        assert!(r.requires_immediate_attention);
    }

    #[test]
    fn high_level_always_urgent() {
        let r = parse_risk(r#"{"risk_level":"high","rationale":"stable"}"#).unwrap();
        assert!(r.requires_immediate_attention);
        assert!((r.score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn low_risk_without_keywords_is_not_urgent() {
        let r = parse_risk(r#"{"risk_level":"low","risk_score":0.1,"rationale":"mild and improving"}"#).unwrap();
        assert!(!r.requires_immediate_attention);
    }

    #[test]
    fn unknown_risk_level_is_malformed() {
        let err = parse_risk(r#"{"risk_level":"spicy"}"#).unwrap_err();
        assert!(matches!(err, StepErrorKind::MalformedResponse(_)));
    }

    #[test]
    fn prose_is_malformed() {
        assert!(matches!(parse_risk("It looks low risk."), Err(StepErrorKind::MalformedResponse(_))));
    }

    #[test]
    fn diagnosis_dedupes_differentials_and_clamps() {
        let dx = parse_diagnosis(
            r#"```json
{"primary":{"condition":"Migraine","confidence":1.3},
 "differentials":[{"condition":"migraine","confidence":0.2},{"condition":"Tension headache","confidence":0.3}]}
```"#,
        )
        .unwrap();
        assert!((dx.primary.confidence - 1.0).abs() < f32::EPSILON);
        assert_eq!(dx.conditions(), vec!["Migraine", "Tension headache"]);
    }

    #[test]
    fn diagnosis_without_condition_is_malformed() {
        let err = parse_diagnosis(r#"{"primary":{"condition":"  "}}"#).unwrap_err();
        assert!(matches!(err, StepErrorKind::MalformedResponse(_)));
    }

    #[test]
    fn symptoms_format_includes_duration() {
        let s = vec![
            Symptom { name: "fever".into(), severity: Severity::Mild, duration: Some("1 day".into()) },
            Symptom { name: "cough".into(), severity: Severity::Unknown, duration: None },
        ];
        assert_eq!(format_symptoms(&s), "- fever (mild, 1 day)\n- cough (unknown)");
    }
}
