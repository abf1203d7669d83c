//! End-to-end runs over the supervisor bus with the offline provider and a
//! SQLite store in a temp directory.

use std::sync::Arc;

use medical_copilot::config;
use medical_copilot::subsystems::cases::CasesSubsystem;
use medical_copilot::subsystems::comms::{CommsState, RequestError};
use medical_copilot::supervisor::{self, bus::SupervisorBus};
use medical_copilot::types::{CaseOutcome, ConfidenceSource, EscalationReason, IntakeInput, UserRole};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Stack {
    comms: Arc<CommsState>,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stack(autonomous: bool) -> Stack {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("copilot.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[app]
name = "e2e"
work_dir = "{}"

[llm]
default = "offline"

[features]
autonomous_mode = {autonomous}
doctor_validation = true

[workflow]
step_timeout_seconds = 5
"#,
            dir.path().display()
        ),
    )
    .unwrap();
    let cfg = config::load_from(&path, None, None).unwrap();

    let shutdown = CancellationToken::new();
    let cases = CasesSubsystem::from_config(&cfg, shutdown.clone()).unwrap();
    let bus = SupervisorBus::new(16);
    let handle = bus.handle.clone();
    tokio::spawn(supervisor::run(bus, shutdown.clone(), vec![Box::new(cases)]));
    let (event_tx, _) = mpsc::channel(4);
    Stack {
        comms: Arc::new(CommsState::new(handle, event_tx, cfg.workflow.default_role)),
        shutdown,
        _dir: dir,
    }
}

fn text(s: &str) -> Vec<IntakeInput> {
    vec![IntakeInput::Text(s.into())]
}

fn json(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap()
}

#[tokio::test]
async fn doctor_case_completes_and_is_queryable() {
    let s = stack(true);
    let out = s.comms.analyze(text("Headache and fever since yesterday"), UserRole::Doctor).await.unwrap();
    let CaseOutcome::Completed(report) = out else { panic!("expected completed, got {out:?}") };
    assert_eq!(report.verdict.source, ConfidenceSource::LlmJudge);
    assert!(!report.recommendation.is_empty());

    let stats = json(&s.comms.stats(UserRole::Doctor).await.unwrap());
    assert_eq!(stats["total_cases"], 1);

    let similar = json(&s.comms.similar_cases(vec!["headache".into()], UserRole::Doctor, None).await.unwrap());
    assert_eq!(similar["cases"].as_array().unwrap().len(), 1);

    let comorbid =
        json(&s.comms.comorbidities("Viral upper respiratory infection".into(), UserRole::Doctor).await.unwrap());
    let names: Vec<&str> = comorbid["comorbidities"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|c| c["diagnosis"].as_str())
        .collect();
    assert!(names.contains(&"influenza"), "got {names:?}");
}

#[tokio::test]
async fn parked_patient_case_resumes_after_approval() {
    let s = stack(false);
    let pending = s.comms.analyze(text("I have a headache"), UserRole::Patient).await.unwrap();
    let CaseOutcome::PendingReview(notice) = &pending else { panic!("expected pending review") };
    assert_eq!(notice.reasons, vec![EscalationReason::AutonomousModeDisabled]);
    assert!(notice.diagnosis.is_none());

    let stats = json(&s.comms.stats(UserRole::Doctor).await.unwrap());
    assert_eq!(stats["total_cases"], 0, "nothing is persisted before review");

    let done = s.comms.review(pending.case_id(), true, UserRole::Doctor).await.unwrap();
    let CaseOutcome::Completed(report) = done else { panic!("expected completed") };
    assert_eq!(report.verdict.source, ConfidenceSource::HumanReview);
    assert_eq!(report.role, UserRole::Patient);

    let stats = json(&s.comms.stats(UserRole::Doctor).await.unwrap());
    assert_eq!(stats["total_cases"], 1);
}

#[tokio::test]
async fn voice_input_uses_offline_transcript() {
    let s = stack(true);
    let inputs = vec![IntakeInput::Voice { bytes: vec![0u8; 64], mime: "audio/wav".into(), reference: String::new() }];
    let out = s.comms.analyze(inputs, UserRole::Doctor).await.unwrap();
    assert_eq!(out.status(), "completed");
}

#[tokio::test]
async fn patients_cannot_read_statistics() {
    let s = stack(true);
    let err = s.comms.stats(UserRole::Patient).await.unwrap_err();
    assert!(matches!(err, RequestError::Rejected(_)));
}

#[tokio::test]
async fn sensitive_patient_case_is_escalated() {
    let s = stack(true);
    let out = s.comms.analyze(text("headache and I think I may have HIV"), UserRole::Patient).await.unwrap();
    let CaseOutcome::PendingReview(notice) = out else { panic!("expected pending review, got {out:?}") };
    assert!(notice.reasons.contains(&EscalationReason::SensitiveContent));
    assert!(notice.diagnosis.is_none());
}
