//! Axum handlers for `/api/*` routes.
//!
//! Each handler receives [`AxumState`] via [`axum::extract::State`], resolves
//! the caller's role (falling back to the configured default) and forwards to
//! the typed [`CommsState`](super::super::CommsState) methods.

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::AxumState;
use crate::subsystems::comms::RequestError;
use crate::supervisor::bus::{ERR_INTAKE, ERR_INVALID_PARAMS, ERR_NOT_FOUND, ERR_STEP_FAILED, ERR_UNAUTHORIZED};
use crate::types::{CaseOutcome, IntakeInput, UserRole};

/// Upper bound for a full case run; individual steps have their own timeout.
const CASE_TIMEOUT: Duration = Duration::from_secs(600);
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct AnalyzeRequest {
    text: Option<String>,
    audio_base64: Option<String>,
    audio_mime: Option<String>,
    image_base64: Option<String>,
    image_mime: Option<String>,
    role: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct ReviewRequest {
    approve: bool,
    role: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct SimilarQuery {
    symptoms: String,
    role: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct ComorbidityQuery {
    diagnosis: String,
    role: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct RoleQuery {
    role: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(status: StatusCode, code: &str, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": code, "message": format!("{msg}") }))).into_response()
}

fn json_body(data: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], data).into_response()
}

fn resolve_role(state: &AxumState, role: Option<&str>) -> Result<UserRole, Response> {
    match role.filter(|r| !r.trim().is_empty()) {
        None => Ok(state.comms.default_role()),
        Some(r) => r.parse().map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_role", e)),
    }
}

fn decode(field: &str, data: &str) -> Result<Vec<u8>, Response> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_payload", format!("{field}: {e}")))
}

fn request_error(state: &AxumState, e: RequestError) -> Response {
    match e {
        RequestError::Rejected(err) => {
            let (status, code) = match err.code {
                ERR_UNAUTHORIZED => (StatusCode::FORBIDDEN, "unauthorized"),
                ERR_NOT_FOUND => (StatusCode::NOT_FOUND, "not_found"),
                ERR_INTAKE | ERR_INVALID_PARAMS => (StatusCode::BAD_REQUEST, "invalid_input"),
                ERR_STEP_FAILED => (StatusCode::BAD_GATEWAY, "step_failed"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            };
            json_error(status, code, err.message)
        }
        other => {
            warn!(channel_id = %state.channel_id, "case request failed: {other}");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", other)
        }
    }
}

fn outcome_response(
    state: &AxumState,
    result: Result<Result<CaseOutcome, RequestError>, tokio::time::error::Elapsed>,
) -> Response {
    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(e)) => request_error(state, e),
        Err(_) => json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", "case run timed out"),
    }
}

fn json_result(
    state: &AxumState,
    result: Result<Result<String, RequestError>, tokio::time::error::Elapsed>,
) -> Response {
    match result {
        Ok(Ok(data)) => json_body(data),
        Ok(Err(e)) => request_error(state, e),
        Err(_) => json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", "request timed out"),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /api/health
pub(super) async fn health(State(state): State<AxumState>) -> Response {
    json_result(&state, tokio::time::timeout(QUERY_TIMEOUT, state.comms.health()).await)
}

/// POST /api/analyze
///
/// At least one of `text`, `audio_base64` or `image_base64` must be present.
/// Uploaded payloads are referenced by content digest.
pub(super) async fn analyze(State(state): State<AxumState>, Json(req): Json<AnalyzeRequest>) -> Response {
    let role = match resolve_role(&state, req.role.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let mut inputs = Vec::new();
    if let Some(text) = req.text {
        inputs.push(IntakeInput::Text(text));
    }
    if let Some(audio) = req.audio_base64.as_deref() {
        match decode("audio_base64", audio) {
            Ok(bytes) => inputs.push(IntakeInput::Voice {
                bytes,
                mime: req.audio_mime.unwrap_or_else(|| "audio/wav".into()),
                reference: String::new(),
            }),
            Err(resp) => return resp,
        }
    }
    if let Some(image) = req.image_base64.as_deref() {
        match decode("image_base64", image) {
            Ok(bytes) => inputs.push(IntakeInput::Image {
                bytes,
                mime: req.image_mime.unwrap_or_else(|| "image/jpeg".into()),
                reference: String::new(),
            }),
            Err(resp) => return resp,
        }
    }
    if inputs.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_input", "no text, audio or image supplied");
    }

    outcome_response(&state, tokio::time::timeout(CASE_TIMEOUT, state.comms.analyze(inputs, role)).await)
}

/// POST /api/cases/{case_id}/review
pub(super) async fn review(
    State(state): State<AxumState>,
    Path(case_id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Response {
    let Ok(case_id) = Uuid::parse_str(&case_id) else {
        return json_error(StatusCode::BAD_REQUEST, "invalid_case_id", "case id must be a UUID");
    };
    let role = match resolve_role(&state, req.role.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    outcome_response(
        &state,
        tokio::time::timeout(CASE_TIMEOUT, state.comms.review(case_id, req.approve, role)).await,
    )
}

/// GET /api/cases/similar?symptoms=a,b&role=&limit=
pub(super) async fn similar(State(state): State<AxumState>, Query(q): Query<SimilarQuery>) -> Response {
    let role = match resolve_role(&state, q.role.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let symptoms: Vec<String> = q
        .symptoms
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if symptoms.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_input", "symptoms must not be empty");
    }
    json_result(
        &state,
        tokio::time::timeout(QUERY_TIMEOUT, state.comms.similar_cases(symptoms, role, q.limit)).await,
    )
}

/// GET /api/cases/comorbidities?diagnosis=&role=
pub(super) async fn comorbidities(State(state): State<AxumState>, Query(q): Query<ComorbidityQuery>) -> Response {
    let role = match resolve_role(&state, q.role.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    if q.diagnosis.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_input", "diagnosis must not be empty");
    }
    json_result(
        &state,
        tokio::time::timeout(QUERY_TIMEOUT, state.comms.comorbidities(q.diagnosis, role)).await,
    )
}

/// GET /api/cases/stats?role=
pub(super) async fn stats(State(state): State<AxumState>, Query(q): Query<RoleQuery>) -> Response {
    let role = match resolve_role(&state, q.role.as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    json_result(&state, tokio::time::timeout(QUERY_TIMEOUT, state.comms.stats(role)).await)
}

#[cfg(all(test, feature = "store-sqlite"))]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::super::build_router;
    use super::*;
    use crate::config::Config;
    use crate::subsystems::cases::CasesSubsystem;
    use crate::subsystems::comms::CommsState;
    use crate::supervisor::{self, bus::SupervisorBus};

    fn router(dir: &std::path::Path) -> Router {
        let cfg = Config::test_default(dir);
        let shutdown = CancellationToken::new();
        let cases = CasesSubsystem::from_config(&cfg, shutdown.clone()).unwrap();
        let bus = SupervisorBus::new(16);
        let handle = bus.handle.clone();
        tokio::spawn(supervisor::run(bus, shutdown, vec![Box::new(cases)]));
        let (event_tx, _event_rx) = mpsc::channel(4);
        let comms = Arc::new(CommsState::new(handle, event_tx, UserRole::Patient));
        build_router(AxumState { channel_id: Arc::from("test"), comms })
    }

    async fn call(router: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = router.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_backends() {
        let dir = tempfile::TempDir::new().unwrap();
        let (status, body) = call(router(dir.path()), Request::get("/api/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["llm"], "offline");
        assert_eq!(body["store"], "sqlite");
    }

    #[tokio::test]
    async fn patient_text_case_waits_for_review() {
        let dir = tempfile::TempDir::new().unwrap();
        let (status, body) =
            call(router(dir.path()), post("/api/analyze", json!({ "text": "headache and fever since Monday" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending_review");
        assert!(body.get("diagnosis").is_none());
    }

    #[tokio::test]
    async fn empty_analyze_is_bad_request() {
        let dir = tempfile::TempDir::new().unwrap();
        let (status, _) = call(router(dir.path()), post("/api/analyze", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(router(dir.path()), post("/api/analyze", json!({ "text": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn bad_base64_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let (status, body) =
            call(router(dir.path()), post("/api/analyze", json!({ "audio_base64": "%%%" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_payload");
    }

    #[tokio::test]
    async fn stats_forbidden_for_patients() {
        let dir = tempfile::TempDir::new().unwrap();
        let req = Request::get("/api/cases/stats?role=patient").body(Body::empty()).unwrap();
        let (status, _) = call(router(dir.path()), req).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let req = Request::get("/api/cases/stats?role=doctor").body(Body::empty()).unwrap();
        let (status, body) = call(router(dir.path()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_cases"], 0);
    }

    #[tokio::test]
    async fn review_of_unknown_case_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let uri = format!("/api/cases/{}/review", Uuid::now_v7());
        let (status, _) = call(router(dir.path()), post(&uri, json!({ "approve": true, "role": "doctor" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            call(router(dir.path()), post("/api/cases/not-a-uuid/review", json!({ "approve": true }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_role_is_bad_request() {
        let dir = tempfile::TempDir::new().unwrap();
        let req = Request::get("/api/cases/similar?symptoms=fever&role=nurse").body(Body::empty()).unwrap();
        let (status, body) = call(router(dir.path()), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_role");
    }
}
