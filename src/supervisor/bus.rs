//! Supervisor event bus: typed request/notification messages between
//! channels and subsystems.
//!
//! Requests carry a `oneshot` reply slot; the receiving [`BusHandler`]
//! (see [`super::dispatch`]) owns it and must resolve it exactly once.
//! Error codes follow JSON-RPC conventions where one exists.
//!
//! [`BusHandler`]: super::dispatch::BusHandler

use std::fmt;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::types::{CaseOutcome, IntakeInput, UserRole};

pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_INTERNAL: i32 = -32603;
pub const ERR_UNAUTHORIZED: i32 = -32001;
pub const ERR_NOT_FOUND: i32 = -32004;
pub const ERR_INTAKE: i32 = -32010;
pub const ERR_STEP_FAILED: i32 = -32011;

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Everything that can travel over the bus, in either direction.
#[derive(Debug)]
pub enum BusPayload {
    /// `cases/analyze`: raw inputs from a channel.
    AnalyzeCase { inputs: Vec<IntakeInput>, role: UserRole },
    /// `cases/review`: a clinician's decision on a parked case.
    ReviewCase { case_id: Uuid, approve: bool, role: UserRole },
    /// `cases/similar`
    SimilarCases { symptoms: Vec<String>, role: UserRole, limit: Option<usize> },
    /// `cases/comorbidities`
    Comorbidities { diagnosis: String, role: UserRole },
    /// `cases/stats`
    Stats { role: UserRole },
    /// Reply to `analyze` and `review`.
    Outcome(Box<CaseOutcome>),
    /// Reply carrying a serialized JSON body.
    JsonResponse { data: String },
    Empty,
}

/// Structured error returned through a request's reply slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusError {
    pub code: i32,
    pub message: String,
}

impl BusError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

pub type BusResult = Result<BusPayload, BusError>;

/// A message on the supervisor bus.
pub enum BusMessage {
    Request {
        id: Uuid,
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
    Notification { method: String, payload: BusPayload },
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Transport-level failure talking to the supervisor (not a handler error).
#[derive(Debug, Error)]
pub enum BusCallError {
    #[error("supervisor bus is closed")]
    Send,
    #[error("handler dropped the reply channel")]
    Recv,
}

/// Cloneable sending side of the bus, handed to channels and subsystems.
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Send a request and await the handler's reply.
    pub async fn request(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<BusResult, BusCallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let msg = BusMessage::Request {
            id: Uuid::new_v4(),
            method: method.into(),
            payload,
            reply_tx,
        };
        self.tx.send(msg).await.map_err(|_| BusCallError::Send)?;
        reply_rx.await.map_err(|_| BusCallError::Recv)
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: impl Into<String>, payload: BusPayload) -> Result<(), BusCallError> {
        self.tx
            .send(BusMessage::Notification { method: method.into(), payload })
            .await
            .map_err(|_| BusCallError::Send)
    }
}

/// Owns the supervisor-side receiver plus a handle to clone out.
pub struct SupervisorBus {
    pub rx: mpsc::Receiver<BusMessage>,
    pub handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self { rx, handle: BusHandle { tx } }
    }
}
