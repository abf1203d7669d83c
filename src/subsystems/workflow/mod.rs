//! Case orchestration workflow.
//!
//! A case moves through the fixed [`STEPS`] sequence, one [`CaseContext`]
//! threaded through by value. Every step is bounded by the configured step
//! timeout and raced against the shutdown token; the first failure halts
//! the run with a [`StepFailure`] naming the step.
//!
//! `diagnose` through `validate` form a retry window: a rejected verdict
//! sends the case back to `diagnose` up to `validation.max_retries` times,
//! after which it escalates. Nothing past `validate` runs without an
//! accepted verdict. A patient recommendation that names a sensitive term
//! is held back the same way, so the case escalates instead of completing.

pub mod steps;

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, FeatureFlags, RetrievalConfig};
use crate::external::factcheck::FactChecker;
use crate::llm::LlmProvider;
use crate::store::GraphStore;
use crate::subsystems::cases::queue::ReviewQueue;
use crate::subsystems::safety::SafetyScreen;
use crate::subsystems::validation::Validator;
use crate::types::{
    CaseOutcome, CaseReport, DiagnosisResult, EscalationNotice, EscalationReason, JudgeEvaluation,
    RetrievedContext, RiskAssessment, StepTrace, SymptomReport, UserRole, ValidationOutcome,
    ValidationVerdict,
};

// ── Steps ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepName {
    Screen,
    Extract,
    Retrieve,
    AssessRisk,
    Diagnose,
    Alternatives,
    Judge,
    Validate,
    Persist,
    Recommend,
}

pub const STEPS: [StepName; 10] = [
    StepName::Screen,
    StepName::Extract,
    StepName::Retrieve,
    StepName::AssessRisk,
    StepName::Diagnose,
    StepName::Alternatives,
    StepName::Judge,
    StepName::Validate,
    StepName::Persist,
    StepName::Recommend,
];

/// Steps run after a clinician approves a parked case.
const RESUME_STEPS: [StepName; 2] = [StepName::Persist, StepName::Recommend];

impl StepName {
    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Screen => "screen",
            StepName::Extract => "extract",
            StepName::Retrieve => "retrieve",
            StepName::AssessRisk => "assess_risk",
            StepName::Diagnose => "diagnose",
            StepName::Alternatives => "alternatives",
            StepName::Judge => "judge",
            StepName::Validate => "validate",
            StepName::Persist => "persist",
            StepName::Recommend => "recommend",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepErrorKind {
    #[error("timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("collaborator failed: {0}")]
    Collaborator(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("incomplete: {0}")]
    Incomplete(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("step '{step}' failed: {kind}")]
pub struct StepFailure {
    pub step: StepName,
    pub kind: StepErrorKind,
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything one run knows about a case. Owned by exactly one run (or the
/// review queue) at a time.
#[derive(Debug, Clone)]
pub struct CaseContext {
    pub case_id: Uuid,
    pub role: UserRole,
    pub report: SymptomReport,
    pub screen: SafetyScreen,
    pub retrieved: RetrievedContext,
    pub risk: Option<RiskAssessment>,
    pub diagnosis: Option<DiagnosisResult>,
    pub judge: Option<JudgeEvaluation>,
    pub verdict: Option<ValidationVerdict>,
    pub recommendation: Option<String>,
    pub trace: Vec<StepTrace>,
    /// Current diagnose→validate round, starting at 1.
    pub attempt: u32,
    /// The case record has been written; a resumed run skips the write.
    pub persisted: bool,
}

impl CaseContext {
    pub fn new(report: SymptomReport, role: UserRole) -> Self {
        Self {
            case_id: Uuid::now_v7(),
            role,
            report,
            screen: SafetyScreen::default(),
            retrieved: RetrievedContext::default(),
            risk: None,
            diagnosis: None,
            judge: None,
            verdict: None,
            recommendation: None,
            trace: Vec::new(),
            attempt: 1,
            persisted: false,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.screen.is_sensitive()
    }

    fn urgent(&self) -> bool {
        self.risk.as_ref().is_some_and(|r| r.requires_immediate_attention)
    }

    fn into_report(self) -> Result<CaseReport, StepErrorKind> {
        let missing = |what: &str| StepErrorKind::Incomplete(format!("case has no {what}"));
        let pii_redacted = self.screen.has_pii();
        Ok(CaseReport {
            case_id: self.case_id,
            role: self.role,
            symptoms: self.report.symptoms().to_vec(),
            risk: self.risk.ok_or_else(|| missing("risk assessment"))?,
            diagnosis: self.diagnosis.ok_or_else(|| missing("diagnosis"))?,
            verdict: self.verdict.ok_or_else(|| missing("verdict"))?,
            recommendation: self.recommendation.ok_or_else(|| missing("recommendation"))?,
            pii_redacted,
            similar_cases: self.retrieved.similar_cases.len(),
            trace: self.trace,
        })
    }

    /// Notice for an escalated case. Only clinicians see the diagnosis.
    pub fn escalation_notice(&self, message: String) -> EscalationNotice {
        EscalationNotice {
            case_id: self.case_id,
            role: self.role,
            reasons: self.verdict.as_ref().map(|v| v.reasons.clone()).unwrap_or_default(),
            message,
            urgent: self.urgent(),
            diagnosis: if self.role.is_clinician() { self.diagnosis.clone() } else { None },
        }
    }
}

// ── Dependencies ──────────────────────────────────────────────────────────────

/// Collaborators shared by every run. All cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkflowDeps {
    pub llm: LlmProvider,
    pub store: GraphStore,
    pub validator: Validator,
    pub features: FeatureFlags,
    pub retrieval: RetrievalConfig,
    pub step_timeout: Duration,
}

impl WorkflowDeps {
    pub fn from_config(config: &Config, llm: LlmProvider, store: GraphStore, fact_checker: FactChecker) -> Self {
        Self {
            llm,
            store,
            validator: Validator::new(fact_checker, config.features, config.validation),
            features: config.features,
            retrieval: config.retrieval,
            step_timeout: config.workflow.step_timeout,
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Orchestrator {
    deps: WorkflowDeps,
    queue: ReviewQueue,
}

impl Orchestrator {
    pub fn new(deps: WorkflowDeps, queue: ReviewQueue) -> Self {
        Self { deps, queue }
    }

    pub fn deps(&self) -> &WorkflowDeps {
        &self.deps
    }

    pub fn queue(&self) -> &ReviewQueue {
        &self.queue
    }

    /// Run a new case from a normalised report.
    pub async fn run(
        &self,
        report: SymptomReport,
        role: UserRole,
        cancel: &CancellationToken,
    ) -> Result<CaseOutcome, StepFailure> {
        let mut ctx = CaseContext::new(report, role);
        let case_id = ctx.case_id;
        info!(%case_id, role = role.as_str(), segments = ctx.report.segments().len(), "case started");

        let mut index = 0;
        while index < STEPS.len() {
            let step = STEPS[index];
            ctx = self.run_step(step, ctx, cancel).await?;

            if step == StepName::Validate {
                let Some(verdict) = ctx.verdict.as_ref() else {
                    return Err(StepFailure {
                        step,
                        kind: StepErrorKind::Incomplete("validation produced no verdict".into()),
                    });
                };
                match verdict.outcome {
                    ValidationOutcome::Accept => {}
                    ValidationOutcome::Reject if ctx.attempt <= self.deps.validator.max_retries() => {
                        info!(%case_id, attempt = ctx.attempt, "verdict rejected, retrying diagnosis");
                        ctx.attempt += 1;
                        index = step_index(StepName::Diagnose);
                        continue;
                    }
                    ValidationOutcome::Reject => {
                        if let Some(v) = ctx.verdict.as_mut() {
                            v.outcome = ValidationOutcome::Escalate;
                            if !v.reasons.contains(&EscalationReason::LowConfidence) {
                                v.reasons.push(EscalationReason::LowConfidence);
                            }
                        }
                        return Ok(self.escalate(ctx).await);
                    }
                    ValidationOutcome::Escalate => return Ok(self.escalate(ctx).await),
                }
            }
            if step == StepName::Recommend && ctx.verdict.as_ref().is_some_and(|v| !v.is_accepted()) {
                return Ok(self.escalate(ctx).await);
            }
            index += 1;
        }

        self.complete(ctx)
    }

    /// Continue a parked case after a clinician approved it.
    pub async fn resume(
        &self,
        mut ctx: CaseContext,
        verdict: ValidationVerdict,
        cancel: &CancellationToken,
    ) -> Result<CaseOutcome, StepFailure> {
        info!(case_id = %ctx.case_id, source = ?verdict.source, "case resumed");
        ctx.verdict = Some(verdict);
        for step in RESUME_STEPS {
            ctx = self.run_step(step, ctx, cancel).await?;
        }
        self.complete(ctx)
    }

    fn complete(&self, ctx: CaseContext) -> Result<CaseOutcome, StepFailure> {
        let case_id = ctx.case_id;
        let report = ctx
            .into_report()
            .map_err(|kind| StepFailure { step: StepName::Recommend, kind })?;
        info!(%case_id, "case completed");
        Ok(CaseOutcome::Completed(report))
    }

    async fn escalate(&self, ctx: CaseContext) -> CaseOutcome {
        let reasons = ctx.verdict.as_ref().map(|v| v.reasons.clone()).unwrap_or_default();
        let summary = reasons.iter().map(|r| r.describe()).collect::<Vec<_>>().join("; ");
        info!(case_id = %ctx.case_id, reasons = ?reasons, "case escalated");

        if self.deps.features.doctor_validation {
            let notice = ctx.escalation_notice(format!(
                "This case is waiting for review by a clinician ({summary})."
            ));
            self.queue.park(ctx).await;
            CaseOutcome::PendingReview(notice)
        } else {
            let notice = ctx.escalation_notice(format!(
                "Please consult a healthcare professional about these symptoms ({summary})."
            ));
            CaseOutcome::Referred(notice)
        }
    }

    async fn run_step(
        &self,
        step: StepName,
        ctx: CaseContext,
        cancel: &CancellationToken,
    ) -> Result<CaseContext, StepFailure> {
        let case_id = ctx.case_id;
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepErrorKind::Cancelled),
            r = tokio::time::timeout(self.deps.step_timeout, steps::execute(&self.deps, step, ctx)) => {
                r.unwrap_or(Err(StepErrorKind::Timeout))
            }
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(mut ctx) => {
                info!(%case_id, step = step.as_str(), elapsed_ms, "step complete");
                ctx.trace.push(StepTrace { step: step.as_str().to_string(), elapsed_ms });
                Ok(ctx)
            }
            Err(kind) => {
                warn!(%case_id, step = step.as_str(), elapsed_ms, error = %kind, "step failed");
                Err(StepFailure { step, kind })
            }
        }
    }
}

fn step_index(step: StepName) -> usize {
    STEPS.iter().position(|s| *s == step).unwrap_or(0)
}
