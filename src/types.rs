//! Case data model shared by intake, workflow, store and channels.
//!
//! Everything here is plain data: serde-friendly, cheap to clone, no I/O.
//! [`SymptomReport`] exposes no mutating methods; the extract step builds a
//! new report via [`SymptomReport::with_symptoms`] instead.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── UserRole ──────────────────────────────────────────────────────────────────

/// Who is asking. Gates which workflow branches may auto-resolve and what a
/// caller is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Patient,
    Doctor,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Patient => "patient",
            UserRole::Doctor => "doctor",
        }
    }

    /// `true` for roles allowed to approve escalated cases and see sensitive content.
    pub fn is_clinician(self) -> bool {
        matches!(self, UserRole::Doctor)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(UserRole::Patient),
            "doctor" => Ok(UserRole::Doctor),
            other => Err(format!("unknown user role: '{other}' (expected patient or doctor)")),
        }
    }
}

// ── Intake ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Voice,
    Image,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modality::Text => "text",
            Modality::Voice => "voice",
            Modality::Image => "image",
        };
        f.write_str(s)
    }
}

/// Raw input handed in by a channel, before normalisation.
///
/// `reference` names where the payload came from (a file path, or
/// `upload:<digest>` for HTTP uploads) and is carried into the report.
#[derive(Debug, Clone)]
pub enum IntakeInput {
    Text(String),
    Voice { bytes: Vec<u8>, mime: String, reference: String },
    Image { bytes: Vec<u8>, mime: String, reference: String },
}

impl IntakeInput {
    pub fn modality(&self) -> Modality {
        match self {
            IntakeInput::Text(_) => Modality::Text,
            IntakeInput::Voice { .. } => Modality::Voice,
            IntakeInput::Image { .. } => Modality::Image,
        }
    }
}

/// One normalised input: its text content plus how much we trust the conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeSegment {
    pub modality: Modality,
    pub payload_ref: String,
    pub content: String,
    /// Source-derived confidence in `[0, 1]`.
    pub confidence: f32,
}

// ── Symptoms ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
    #[default]
    Unknown,
}

impl Severity {
    /// Lenient label parser for model output ("Severe", "moderate", "high" …).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "mild" | "low" | "minor" => Severity::Mild,
            "moderate" | "medium" => Severity::Moderate,
            "severe" | "high" | "critical" => Severity::Severe,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symptom {
    pub name: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Canonical symptom report: normalised input segments plus the structured
/// symptom list once extraction has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomReport {
    segments: Vec<IntakeSegment>,
    symptoms: Vec<Symptom>,
    source_confidence: f32,
    extraction_confidence: Option<f32>,
}

impl SymptomReport {
    /// Build a report from normalised segments. Confidence is the weakest segment's.
    pub fn new(segments: Vec<IntakeSegment>) -> Self {
        let source_confidence = segments
            .iter()
            .map(|s| s.confidence)
            .fold(1.0_f32, f32::min);
        Self { segments, symptoms: Vec::new(), source_confidence, extraction_confidence: None }
    }

    /// Consume this report and return one carrying the extracted symptoms.
    pub fn with_symptoms(self, symptoms: Vec<Symptom>, extraction_confidence: f32) -> Self {
        Self {
            symptoms,
            extraction_confidence: Some(extraction_confidence.clamp(0.0, 1.0)),
            ..self
        }
    }

    pub fn segments(&self) -> &[IntakeSegment] {
        &self.segments
    }

    pub fn symptoms(&self) -> &[Symptom] {
        &self.symptoms
    }

    pub fn symptom_names(&self) -> Vec<String> {
        self.symptoms.iter().map(|s| s.name.clone()).collect()
    }

    pub fn modalities(&self) -> Vec<Modality> {
        let mut out = Vec::new();
        for seg in &self.segments {
            if !out.contains(&seg.modality) {
                out.push(seg.modality);
            }
        }
        out
    }

    /// Overall confidence: the lower of source and extraction confidence.
    pub fn confidence(&self) -> f32 {
        match self.extraction_confidence {
            Some(c) => self.source_confidence.min(c),
            None => self.source_confidence,
        }
    }

    /// All segments joined as `"<modality>: <content>"` lines.
    pub fn narrative(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("{}: {}", s.modality, s.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── Risk ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" | "moderate" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" | "emergency" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Quantitative risk in `[0, 1]`.
    pub score: f32,
    pub immediate_concerns: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub time_sensitivity: String,
    pub rationale: String,
    pub requires_immediate_attention: bool,
}

impl RiskAssessment {
    /// Every patient-visible field, flattened for sensitive-term screening.
    pub fn screening_text(&self) -> String {
        let mut parts = self.immediate_concerns.clone();
        parts.extend(self.recommended_actions.iter().cloned());
        parts.push(self.time_sensitivity.clone());
        parts.push(self.rationale.clone());
        parts.join("\n")
    }
}

// ── Diagnosis ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisCandidate {
    pub condition: String,
    pub confidence: f32,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub primary: DiagnosisCandidate,
    pub differentials: Vec<DiagnosisCandidate>,
    pub recommended_tests: Vec<String>,
    /// Rationale of the step that generated the result.
    pub rationale: String,
}

impl DiagnosisResult {
    /// Merge alternative explanations into the differential list, skipping
    /// conditions already present (case-insensitive, primary included).
    pub fn with_alternatives(mut self, alternatives: Vec<DiagnosisCandidate>) -> Self {
        for alt in alternatives {
            let key = alt.condition.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let known = self
                .conditions()
                .iter()
                .any(|c| c.trim().to_lowercase() == key);
            if !known {
                self.differentials.push(alt);
            }
        }
        self
    }

    /// Primary condition followed by every differential.
    pub fn conditions(&self) -> Vec<&str> {
        std::iter::once(self.primary.condition.as_str())
            .chain(self.differentials.iter().map(|d| d.condition.as_str()))
            .collect()
    }

    /// Flattened text used when screening the result for sensitive terms.
    pub fn screening_text(&self) -> String {
        let mut parts = vec![self.primary.condition.clone(), self.primary.rationale.clone()];
        for d in &self.differentials {
            parts.push(d.condition.clone());
            parts.push(d.rationale.clone());
        }
        parts.extend(self.recommended_tests.iter().cloned());
        parts.push(self.rationale.clone());
        parts.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeEvaluation {
    pub confidence: f32,
    pub concerns: Vec<String>,
    pub summary: String,
}

// ── Validation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Accept,
    Reject,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSource {
    LlmJudge,
    FactCheck,
    HumanReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    AutonomousModeDisabled,
    SensitiveContent,
    LowConfidence,
    FactCheckUnavailable,
}

impl EscalationReason {
    pub fn describe(self) -> &'static str {
        match self {
            EscalationReason::AutonomousModeDisabled => "autonomous mode is disabled; a clinician must review",
            EscalationReason::SensitiveContent => "the case involves sensitive medical content",
            EscalationReason::LowConfidence => "confidence is below the acceptance threshold",
            EscalationReason::FactCheckUnavailable => "the diagnosis could not be fact-checked",
        }
    }
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub outcome: ValidationOutcome,
    pub confidence: f32,
    pub source: ConfidenceSource,
    pub reasons: Vec<EscalationReason>,
    /// Number of diagnose→validate rounds that produced this verdict.
    pub attempts: u32,
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        self.outcome == ValidationOutcome::Accept
    }
}

// ── Retrieval / store DTOs ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarCase {
    pub case_id: String,
    pub symptoms: Vec<String>,
    pub diagnoses: Vec<String>,
    pub matching_symptoms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomRelation {
    pub symptom: String,
    pub relationship: String,
    pub related_kind: String,
    pub related_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comorbidity {
    pub diagnosis: String,
    pub co_occurrence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseStatistics {
    pub total_cases: u64,
    pub total_symptoms: u64,
    pub total_diagnoses: u64,
    pub cases_with_diagnosis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedDiagnosis {
    pub name: String,
    pub confidence: f32,
}

/// What the Case Store persists for a finished case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub case_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub symptoms: Vec<String>,
    pub diagnoses: Vec<RecordedDiagnosis>,
    pub confidence: f32,
    pub risk_level: String,
    pub user_role: UserRole,
    pub sensitive_content: bool,
}

/// Context assembled by the Knowledge Retriever for one case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub similar_cases: Vec<SimilarCase>,
    pub relations: Vec<SymptomRelation>,
    /// Model-written analysis of the symptoms against the retrieved items.
    pub analysis: String,
}

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    pub step: String,
    pub elapsed_ms: u64,
}

/// A fully resolved case: accepted, persisted, with a final recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub case_id: Uuid,
    pub role: UserRole,
    pub symptoms: Vec<Symptom>,
    pub risk: RiskAssessment,
    pub diagnosis: DiagnosisResult,
    pub verdict: ValidationVerdict,
    pub recommendation: String,
    pub pii_redacted: bool,
    pub similar_cases: usize,
    pub trace: Vec<StepTrace>,
}

/// Returned instead of a diagnosis when a case needs a clinician.
///
/// `diagnosis` is only populated for clinician requesters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub case_id: Uuid,
    pub role: UserRole,
    pub reasons: Vec<EscalationReason>,
    pub message: String,
    /// Set when the risk step flagged the case as needing immediate attention.
    pub urgent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<DiagnosisResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Completed(CaseReport),
    PendingReview(EscalationNotice),
    Referred(EscalationNotice),
}

impl CaseOutcome {
    pub fn case_id(&self) -> Uuid {
        match self {
            CaseOutcome::Completed(r) => r.case_id,
            CaseOutcome::PendingReview(n) | CaseOutcome::Referred(n) => n.case_id,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            CaseOutcome::Completed(_) => "completed",
            CaseOutcome::PendingReview(_) => "pending_review",
            CaseOutcome::Referred(_) => "referred",
        }
    }
}
