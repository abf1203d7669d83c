//! Cases subsystem: owns the `cases/*` bus methods.
//!
//! Method grammar:
//! - `cases/analyze`        intake + orchestrator run, one spawned task per case
//! - `cases/review`         clinician decision on a parked case
//! - `cases/similar`        similar past cases by symptom overlap
//! - `cases/comorbidities`  diagnoses co-recorded with a diagnosis
//! - `cases/stats`          store totals (clinicians only)
//! - `cases/health`         backend names and review-queue depth
//!
//! Every request is answered from a spawned task so the supervisor loop
//! never waits on an LLM or the store. Every request is audited.

pub mod queue;

use serde_json::json;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::external::factcheck::FactChecker;
use crate::external::speech::Transcriber;
use crate::llm::providers;
use crate::store::GraphStore;
use crate::subsystems::cases::queue::ReviewQueue;
use crate::subsystems::intake::{self, IntakeDeps};
use crate::subsystems::safety;
use crate::subsystems::workflow::{Orchestrator, StepFailure, WorkflowDeps};
use crate::supervisor::bus::{
    BusError, BusPayload, BusResult, ERR_INTAKE, ERR_INTERNAL, ERR_INVALID_PARAMS, ERR_METHOD_NOT_FOUND,
    ERR_NOT_FOUND, ERR_STEP_FAILED, ERR_UNAUTHORIZED,
};
use crate::supervisor::dispatch::{BusHandler, split_method};
use crate::types::{CaseOutcome, ConfidenceSource, IntakeInput, UserRole, ValidationOutcome, ValidationVerdict};

/// Upper bound on `cases/similar` results, whatever the caller asks for.
pub const MAX_SIMILAR_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct CasesSubsystem {
    orchestrator: Orchestrator,
    intake: IntakeDeps,
    shutdown: CancellationToken,
}

impl CasesSubsystem {
    pub fn new(orchestrator: Orchestrator, intake: IntakeDeps, shutdown: CancellationToken) -> Self {
        Self { orchestrator, intake, shutdown }
    }

    /// Wire every collaborator from config: LLM, transcriber, fact checker,
    /// case store and an empty review queue.
    pub fn from_config(config: &Config, shutdown: CancellationToken) -> Result<Self, AppError> {
        let llm = providers::build(&config.llm, config.credentials.openai_api_key.clone())?;
        let transcriber = Transcriber::from_config(config)?;
        let fact_checker = FactChecker::from_config(config)?;
        let store = GraphStore::from_config(config)?;
        let deps = WorkflowDeps::from_config(config, llm.clone(), store, fact_checker);
        info!(llm = llm.name(), store = deps.store.name(), "cases subsystem configured");
        Ok(Self::new(
            Orchestrator::new(deps, ReviewQueue::new()),
            IntakeDeps { llm, transcriber },
            shutdown,
        ))
    }

    /// Connectivity check for the configured case store.
    pub async fn ping_store(&self) -> Result<(), AppError> {
        self.orchestrator.deps().store.ping().await
    }

    pub async fn analyze(&self, inputs: Vec<IntakeInput>, role: UserRole) -> BusResult {
        safety::audit(role, "cases/analyze", true);
        let report = intake::normalize(inputs, &self.intake).await.map_err(|e| match e {
            AppError::Intake(msg) => BusError::new(ERR_INTAKE, msg),
            other => BusError::new(ERR_INTERNAL, other.to_string()),
        })?;
        let outcome = self
            .orchestrator
            .run(report, role, &self.shutdown)
            .await
            .map_err(step_error)?;
        Ok(BusPayload::Outcome(Box::new(outcome)))
    }

    pub async fn review(&self, case_id: Uuid, approve: bool, role: UserRole) -> BusResult {
        let resource = format!("cases/review/{case_id}");
        if !role.is_clinician() {
            safety::audit(role, &resource, false);
            return Err(BusError::new(ERR_UNAUTHORIZED, "only a doctor may review cases"));
        }
        safety::audit(role, &resource, true);

        let queue = self.orchestrator.queue();
        let ctx = queue
            .take(&case_id)
            .await
            .ok_or_else(|| BusError::new(ERR_NOT_FOUND, format!("no pending case {case_id}")))?;

        if !approve {
            let notice = ctx.escalation_notice(
                "A clinician reviewed this case and did not approve the proposed diagnosis. \
                 Please arrange an in-person consultation."
                    .into(),
            );
            return Ok(BusPayload::Outcome(Box::new(CaseOutcome::Referred(notice))));
        }

        let prior = ctx.verdict.as_ref();
        let verdict = ValidationVerdict {
            outcome: ValidationOutcome::Accept,
            confidence: prior.map(|v| v.confidence).unwrap_or(0.0),
            source: ConfidenceSource::HumanReview,
            reasons: Vec::new(),
            attempts: prior.map(|v| v.attempts).unwrap_or(ctx.attempt),
        };
        let parked = ctx.clone();
        match self.orchestrator.resume(ctx, verdict, &self.shutdown).await {
            Ok(outcome) => Ok(BusPayload::Outcome(Box::new(outcome))),
            Err(failure) => {
                // Leave the case reviewable after a transient failure.
                queue.park(parked).await;
                Err(step_error(failure))
            }
        }
    }

    pub async fn similar(&self, symptoms: Vec<String>, role: UserRole, limit: Option<usize>) -> BusResult {
        let granted = symptoms.iter().all(|s| safety::can_access(role, s));
        safety::audit(role, "cases/similar", granted);
        if !granted {
            return json_response(&json!({ "cases": [] }));
        }
        let limit = limit
            .unwrap_or(self.orchestrator.deps().retrieval.similar_case_limit)
            .clamp(1, MAX_SIMILAR_LIMIT);
        let cases = self
            .orchestrator
            .deps()
            .store
            .find_similar_cases(&symptoms, limit)
            .await
            .map_err(internal)?;
        let cases: Vec<_> = cases
            .into_iter()
            .filter(|c| c.symptoms.iter().chain(c.diagnoses.iter()).all(|t| safety::can_access(role, t)))
            .collect();
        json_response(&json!({ "cases": cases }))
    }

    pub async fn comorbidities(&self, diagnosis: String, role: UserRole) -> BusResult {
        let granted = safety::can_access(role, &diagnosis);
        safety::audit(role, "cases/comorbidities", granted);
        if !granted {
            return json_response(&json!({ "comorbidities": [] }));
        }
        let rows = self
            .orchestrator
            .deps()
            .store
            .find_comorbidities(&diagnosis)
            .await
            .map_err(internal)?;
        let rows: Vec<_> = rows.into_iter().filter(|c| safety::can_access(role, &c.diagnosis)).collect();
        json_response(&json!({ "comorbidities": rows }))
    }

    pub async fn stats(&self, role: UserRole) -> BusResult {
        let granted = role.is_clinician();
        safety::audit(role, "cases/stats", granted);
        if !granted {
            return Err(BusError::new(ERR_UNAUTHORIZED, "statistics are available to doctors only"));
        }
        let stats = self.orchestrator.deps().store.case_statistics().await.map_err(internal)?;
        json_response(&stats)
    }

    pub async fn health(&self) -> BusResult {
        let deps = self.orchestrator.deps();
        let store_ok = deps.store.ping().await.is_ok();
        json_response(&json!({
            "status": if store_ok { "ok" } else { "degraded" },
            "llm": deps.llm.name(),
            "store": deps.store.name(),
            "store_reachable": store_ok,
            "pending_reviews": self.orchestrator.queue().pending().await.len(),
        }))
    }

    async fn dispatch(&self, action: &str, payload: BusPayload) -> BusResult {
        match (action, payload) {
            ("analyze", BusPayload::AnalyzeCase { inputs, role }) => self.analyze(inputs, role).await,
            ("review", BusPayload::ReviewCase { case_id, approve, role }) => {
                self.review(case_id, approve, role).await
            }
            ("similar", BusPayload::SimilarCases { symptoms, role, limit }) => {
                self.similar(symptoms, role, limit).await
            }
            ("comorbidities", BusPayload::Comorbidities { diagnosis, role }) => {
                self.comorbidities(diagnosis, role).await
            }
            ("stats", BusPayload::Stats { role }) => self.stats(role).await,
            ("health", _) => self.health().await,
            ("analyze" | "review" | "similar" | "comorbidities" | "stats", _) => Err(BusError::new(
                ERR_INVALID_PARAMS,
                format!("unexpected payload for cases/{action}"),
            )),
            _ => Err(BusError::new(ERR_METHOD_NOT_FOUND, format!("method not found: cases/{action}"))),
        }
    }
}

impl BusHandler for CasesSubsystem {
    fn prefix(&self) -> &str {
        "cases"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        let (_, action) = split_method(method);
        let action = action.to_string();
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.dispatch(&action, payload).await;
            if reply_tx.send(result).is_err() {
                warn!(action = %action, "cases reply dropped: requester went away");
            }
        });
    }
}

fn step_error(failure: StepFailure) -> BusError {
    BusError::new(ERR_STEP_FAILED, failure.to_string())
}

fn internal(e: AppError) -> BusError {
    BusError::new(ERR_INTERNAL, e.to_string())
}

fn json_response<T: serde::Serialize>(value: &T) -> BusResult {
    serde_json::to_string(value)
        .map(|data| BusPayload::JsonResponse { data })
        .map_err(|e| BusError::new(ERR_INTERNAL, format!("serialize response: {e}")))
}

#[cfg(all(test, feature = "store-sqlite"))]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::{FeatureFlags, RetrievalConfig, ValidationConfig};
    use crate::external::speech::Transcription;
    use crate::llm::LlmProvider;
    use crate::llm::providers::scripted::ScriptedProvider;
    use crate::store::sqlite::SqliteStore;
    use crate::subsystems::validation::Validator;

    fn subsystem(dir: &std::path::Path, autonomous: bool) -> CasesSubsystem {
        let features = FeatureFlags { autonomous_mode: autonomous, doctor_validation: true, perplexity_check: false };
        let llm = LlmProvider::Scripted(ScriptedProvider::offline());
        let deps = WorkflowDeps {
            llm: llm.clone(),
            store: GraphStore::Sqlite(SqliteStore::open(dir).unwrap()),
            validator: Validator::new(
                FactChecker::new(llm.clone()),
                features,
                ValidationConfig { confidence_threshold: 0.8, max_retries: 1 },
            ),
            features,
            retrieval: RetrievalConfig { similar_case_limit: 5, relation_limit: 10 },
            step_timeout: Duration::from_secs(5),
        };
        let intake = IntakeDeps {
            llm,
            transcriber: Transcriber::Fixed(Transcription { text: "cough".into(), confidence: None }),
        };
        CasesSubsystem::new(Orchestrator::new(deps, ReviewQueue::new()), intake, CancellationToken::new())
    }

    fn outcome(result: BusResult) -> CaseOutcome {
        match result {
            Ok(BusPayload::Outcome(o)) => *o,
            other => panic!("expected outcome, got {other:?}"),
        }
    }

    fn text(s: &str) -> Vec<IntakeInput> {
        vec![IntakeInput::Text(s.into())]
    }

    #[tokio::test]
    async fn doctor_approval_resumes_to_completed() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), false);
        let pending = outcome(cases.analyze(text("headache and fever"), UserRole::Patient).await);
        assert_eq!(pending.status(), "pending_review");

        let done = outcome(cases.review(pending.case_id(), true, UserRole::Doctor).await);
        let CaseOutcome::Completed(report) = done else { panic!("expected completed") };
        assert_eq!(report.verdict.source, ConfidenceSource::HumanReview);
        assert!(cases.orchestrator.queue().pending().await.is_empty());
    }

    #[tokio::test]
    async fn patient_cannot_review() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), false);
        let pending = outcome(cases.analyze(text("headache"), UserRole::Patient).await);
        let err = cases.review(pending.case_id(), true, UserRole::Patient).await.unwrap_err();
        assert_eq!(err.code, ERR_UNAUTHORIZED);
        assert!(cases.orchestrator.queue().contains(&pending.case_id()).await);
    }

    #[tokio::test]
    async fn rejected_review_is_referred_and_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), false);
        let pending = outcome(cases.analyze(text("headache"), UserRole::Patient).await);
        let referred = outcome(cases.review(pending.case_id(), false, UserRole::Doctor).await);
        assert_eq!(referred.status(), "referred");
        let again = cases.review(pending.case_id(), true, UserRole::Doctor).await.unwrap_err();
        assert_eq!(again.code, ERR_NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_text_is_intake_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), true);
        let err = cases.analyze(text("  "), UserRole::Doctor).await.unwrap_err();
        assert_eq!(err.code, ERR_INTAKE);
    }

    #[tokio::test]
    async fn stats_are_doctor_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), true);
        assert_eq!(cases.stats(UserRole::Patient).await.unwrap_err().code, ERR_UNAUTHORIZED);
        assert!(matches!(cases.stats(UserRole::Doctor).await, Ok(BusPayload::JsonResponse { .. })));
    }

    #[tokio::test]
    async fn patient_sensitive_similar_query_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), true);
        outcome(cases.analyze(text("headache"), UserRole::Doctor).await);

        let Ok(BusPayload::JsonResponse { data }) =
            cases.similar(vec!["hiv".into()], UserRole::Patient, None).await
        else {
            panic!("expected json");
        };
        assert_eq!(data, r#"{"cases":[]}"#);

        let Ok(BusPayload::JsonResponse { data }) =
            cases.similar(vec!["headache".into()], UserRole::Patient, None).await
        else {
            panic!("expected json");
        };
        let v: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(v["cases"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn similar_limit_is_clamped() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), true);
        outcome(cases.analyze(text("headache"), UserRole::Doctor).await);

        for limit in [usize::MAX, 0] {
            let Ok(BusPayload::JsonResponse { data }) =
                cases.similar(vec!["headache".into()], UserRole::Doctor, Some(limit)).await
            else {
                panic!("expected json for limit {limit}");
            };
            let v: serde_json::Value = serde_json::from_str(&data).unwrap();
            assert_eq!(v["cases"].as_array().unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn handler_replies_over_oneshot() {
        let dir = tempfile::TempDir::new().unwrap();
        let cases = subsystem(dir.path(), true);
        let (tx, rx) = oneshot::channel();
        cases.handle_request("cases/nope", BusPayload::Empty, tx);
        assert_eq!(rx.await.unwrap().unwrap_err().code, ERR_METHOD_NOT_FOUND);

        let (tx, rx) = oneshot::channel();
        cases.handle_request("cases/stats", BusPayload::Empty, tx);
        assert_eq!(rx.await.unwrap().unwrap_err().code, ERR_INVALID_PARAMS);
    }
}
