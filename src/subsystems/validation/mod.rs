//! Confidence validator.
//!
//! Picks a confidence source (external fact-check when `perplexity_check`
//! is on, otherwise the judge), compares it to the threshold, then applies
//! role gating to a would-be acceptance:
//!
//! | role    | sensitive | autonomous | outcome                      |
//! |---------|-----------|------------|------------------------------|
//! | doctor  | any       | any        | accept                       |
//! | patient | yes       | any        | escalate (sensitive content) |
//! | patient | no        | off        | escalate (autonomous off)    |
//! | patient | no        | on         | accept                       |
//!
//! A rejection is never upgraded here; the orchestrator decides whether to
//! retry or escalate.

use tracing::{info, warn};

use crate::config::{FeatureFlags, ValidationConfig};
use crate::external::factcheck::FactChecker;
use crate::subsystems::safety;
use crate::types::{
    ConfidenceSource, DiagnosisResult, EscalationReason, JudgeEvaluation, RiskAssessment, UserRole,
    ValidationOutcome, ValidationVerdict,
};

/// Per-case facts the validator needs besides the diagnosis itself.
#[derive(Debug, Clone, Copy)]
pub struct CaseFlags<'a> {
    pub role: UserRole,
    /// Sensitive terms were found in the patient's input.
    pub sensitive_input: bool,
    pub symptoms: &'a [String],
    /// Risk assessment shown alongside the diagnosis, if one was produced.
    pub risk: Option<&'a RiskAssessment>,
    /// 1-based diagnose→validate round.
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct Validator {
    fact_checker: FactChecker,
    features: FeatureFlags,
    config: ValidationConfig,
}

impl Validator {
    pub fn new(fact_checker: FactChecker, features: FeatureFlags, config: ValidationConfig) -> Self {
        Self { fact_checker, features, config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub async fn validate(
        &self,
        diagnosis: &DiagnosisResult,
        judge: &JudgeEvaluation,
        flags: CaseFlags<'_>,
    ) -> ValidationVerdict {
        let verdict = |outcome, confidence, source, reasons: Vec<EscalationReason>| ValidationVerdict {
            outcome,
            confidence,
            source,
            reasons,
            attempts: flags.attempt,
        };

        let (confidence, source) = if self.features.perplexity_check {
            match self.fact_checker.check(flags.symptoms, diagnosis).await {
                Ok(r) if r.supported => (r.confidence, ConfidenceSource::FactCheck),
                Ok(r) => {
                    info!(confidence = r.confidence, "fact-check did not support the diagnosis");
                    return verdict(
                        ValidationOutcome::Reject,
                        r.confidence,
                        ConfidenceSource::FactCheck,
                        vec![EscalationReason::LowConfidence],
                    );
                }
                Err(e) => {
                    warn!(error = %e, "fact-check unavailable");
                    return verdict(
                        ValidationOutcome::Reject,
                        0.0,
                        ConfidenceSource::FactCheck,
                        vec![EscalationReason::FactCheckUnavailable],
                    );
                }
            }
        } else {
            (judge.confidence.clamp(0.0, 1.0), ConfidenceSource::LlmJudge)
        };

        if confidence < self.config.confidence_threshold {
            return verdict(ValidationOutcome::Reject, confidence, source, vec![EscalationReason::LowConfidence]);
        }

        if flags.role.is_clinician() {
            return verdict(ValidationOutcome::Accept, confidence, source, vec![]);
        }

        let sensitive = flags.sensitive_input
            || !safety::sensitive_terms(&diagnosis.screening_text()).is_empty()
            || flags.risk.is_some_and(|r| !safety::sensitive_terms(&r.screening_text()).is_empty());
        if sensitive {
            return verdict(ValidationOutcome::Escalate, confidence, source, vec![EscalationReason::SensitiveContent]);
        }
        if !self.features.autonomous_mode {
            return verdict(
                ValidationOutcome::Escalate,
                confidence,
                source,
                vec![EscalationReason::AutonomousModeDisabled],
            );
        }
        verdict(ValidationOutcome::Accept, confidence, source, vec![])
    }
}
