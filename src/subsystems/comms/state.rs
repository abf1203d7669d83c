//! Shared state for the Comms subsystem: the capability boundary for channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below. The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods or reach the case store directly.
//!
//! # Intra-subsystem events
//!
//! [`CommsState::report_event`] lets a running channel signal the comms
//! subsystem manager (e.g. "I shut down", "new session started") without
//! going through the supervisor bus. The manager owns the receiver end.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::supervisor::bus::{BusCallError, BusError, BusHandle, BusPayload};
use crate::types::{CaseOutcome, IntakeInput, UserRole};

// ── Events ────────────────────────────────────────────────────────────────────

/// Events a channel sends back to the comms subsystem manager.
#[derive(Debug)]
pub enum CommsEvent {
    /// Channel has stopped (clean exit or EOF).
    ChannelShutdown { channel_id: String },
    /// A new session/connection was established on the channel.
    SessionStarted { channel_id: String },
}

/// Why a channel request did not produce the expected reply.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The cases subsystem answered with an error.
    #[error("{0}")]
    Rejected(BusError),
    #[error("bus error: {0}")]
    Bus(#[from] BusCallError),
    #[error("unexpected reply payload")]
    UnexpectedReply,
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Shared state passed as `Arc<CommsState>` to every channel task.
pub struct CommsState {
    /// Supervisor bus, private so channels can't call arbitrary methods.
    bus: BusHandle,
    /// Back-channel to the comms subsystem manager.
    event_tx: mpsc::Sender<CommsEvent>,
    /// Role assumed when a request does not name one.
    default_role: UserRole,
}

impl CommsState {
    pub fn new(bus: BusHandle, event_tx: mpsc::Sender<CommsEvent>, default_role: UserRole) -> Self {
        Self { bus, event_tx, default_role }
    }

    pub fn default_role(&self) -> UserRole {
        self.default_role
    }

    /// Run a new case through intake and the workflow.
    pub async fn analyze(&self, inputs: Vec<IntakeInput>, role: UserRole) -> Result<CaseOutcome, RequestError> {
        self.outcome("cases/analyze", BusPayload::AnalyzeCase { inputs, role }).await
    }

    /// Approve or reject a case parked for review.
    pub async fn review(&self, case_id: Uuid, approve: bool, role: UserRole) -> Result<CaseOutcome, RequestError> {
        self.outcome("cases/review", BusPayload::ReviewCase { case_id, approve, role }).await
    }

    /// JSON body `{"cases": [...]}`.
    pub async fn similar_cases(
        &self,
        symptoms: Vec<String>,
        role: UserRole,
        limit: Option<usize>,
    ) -> Result<String, RequestError> {
        self.json("cases/similar", BusPayload::SimilarCases { symptoms, role, limit }).await
    }

    /// JSON body `{"comorbidities": [...]}`.
    pub async fn comorbidities(&self, diagnosis: String, role: UserRole) -> Result<String, RequestError> {
        self.json("cases/comorbidities", BusPayload::Comorbidities { diagnosis, role }).await
    }

    pub async fn stats(&self, role: UserRole) -> Result<String, RequestError> {
        self.json("cases/stats", BusPayload::Stats { role }).await
    }

    pub async fn health(&self) -> Result<String, RequestError> {
        self.json("cases/health", BusPayload::Empty).await
    }

    async fn outcome(&self, method: &str, payload: BusPayload) -> Result<CaseOutcome, RequestError> {
        match self.bus.request(method, payload).await? {
            Err(e) => Err(RequestError::Rejected(e)),
            Ok(BusPayload::Outcome(outcome)) => Ok(*outcome),
            Ok(_) => Err(RequestError::UnexpectedReply),
        }
    }

    async fn json(&self, method: &str, payload: BusPayload) -> Result<String, RequestError> {
        match self.bus.request(method, payload).await? {
            Err(e) => Err(RequestError::Rejected(e)),
            Ok(BusPayload::JsonResponse { data }) => Ok(data),
            Ok(_) => Err(RequestError::UnexpectedReply),
        }
    }

    /// Report an event to the comms subsystem manager.
    ///
    /// Non-blocking: drops the event and logs a warning if the manager is not
    /// keeping up (channel full) or has already exited (closed).
    pub fn report_event(&self, event: CommsEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("comms event dropped: {e}");
        }
    }
}
