//! HTTP/SSE surface exposing the wire format: SSE generation per thread,
//! report fetch, synchronous section operations, and the usage snapshot plus
//! its push feed.

use crate::orchestrator::{
    GenerationOutcome, GenerationRequest, GenerationScope, Orchestrator, OrchestratorError,
};
use crate::store::{MoveDirection, ReportStore, StoreError};
use crate::types::{GenerateRequest, Report, Section, StreamEvent, DONE_SENTINEL};
use crate::usage::{usage_snapshot, UsageMeter, UsageSnapshot};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::{BroadcastStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn ReportStore>,
    pub meter: Arc<UsageMeter>,
    pub default_model: String,
    pub default_provider: String,
}

pub fn build_router(state: AppState, permissive_cors: bool) -> Router {
    let router = Router::new()
        .route("/api/threads/{thread_id}/reports", post(handle_generate))
        .route(
            "/api/threads/{thread_id}/reports/latest",
            get(handle_latest_report),
        )
        .route("/api/reports/{id}", get(handle_get_report))
        .route("/api/reports/{id}/usage", get(handle_usage_snapshot))
        .route("/api/reports/{id}/usage/stream", get(handle_usage_stream))
        .route(
            "/api/reports/{id}/sections/{sid}",
            patch(handle_patch_section).delete(handle_delete_section),
        )
        .route(
            "/api/reports/{id}/sections/{sid}/move",
            post(handle_move_section),
        )
        .route(
            "/api/reports/{id}/sections/{sid}/duplicate",
            post(handle_duplicate_section),
        )
        .route("/health", get(handle_health))
        .with_state(state);

    if permissive_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        let status = match &error {
            StoreError::ReportNotFound(_)
            | StoreError::SectionNotFound(_)
            | StoreError::ThreadNotFound(_) => StatusCode::NOT_FOUND,
        };
        AppError {
            status,
            code: "not_found".to_string(),
            message: error.to_string(),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::AlreadyGenerating(lane) => AppError {
                status: StatusCode::CONFLICT,
                code: "already_generating".to_string(),
                message: format!("a generation is already in flight for '{lane}'"),
            },
            OrchestratorError::Store(store_error) => store_error.into(),
            OrchestratorError::Stream(message) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "stream_failed".to_string(),
                message,
            },
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ POST /api/threads/{thread_id}/reports (SSE) ============

async fn handle_generate(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<GenerateRequest>,
) -> Result<Response, AppError> {
    if body.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let scope = resolve_scope(&state, &thread_id, &body).await?;
    let request = GenerationRequest {
        thread_id,
        prompt: body.content,
        model: body
            .model
            .unwrap_or_else(|| state.default_model.clone()),
        provider: body
            .provider
            .unwrap_or_else(|| state.default_provider.clone()),
        scope,
        mode: body.mode,
    };

    // The single-flight check happens here, synchronously, before any SSE
    // stream opens: a conflict is a 409, not a stream failure.
    let generation = state.orchestrator.begin(request)?;

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<StreamEvent>();
    let (sse_tx, sse_rx) = tokio::sync::mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let cancel = CancellationToken::new();

    let orchestrator = Arc::clone(&state.orchestrator);
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = orchestrator.run(generation, event_tx, run_cancel).await;
    });

    tokio::spawn(async move {
        let mut failed = false;
        while let Some(event) = event_rx.recv().await {
            failed = event.is_error();
            let frame = Event::default().data(
                serde_json::to_string(&event)
                    .unwrap_or_else(|_| r#"{"type":"error","error":"serialization failed"}"#.into()),
            );
            if sse_tx.send(Ok(frame)).is_err() {
                // Client went away: propagate so the upstream model call is
                // torn down rather than billed to completion.
                cancel.cancel();
                return;
            }
        }
        // Errors close the stream without the sentinel.
        if !failed {
            let _ = sse_tx.send(Ok(Event::default().data(DONE_SENTINEL)));
        }
    });

    Ok(Sse::new(UnboundedReceiverStream::new(sse_rx)).into_response())
}

/// Derive the generation scope from the optional request fields. Scoped
/// flows resolve the thread's latest report up front so a missing aggregate
/// is a 404 before any stream opens.
async fn resolve_scope(
    state: &AppState,
    thread_id: &str,
    body: &GenerateRequest,
) -> Result<GenerationScope, AppError> {
    if let Some(section_id) = &body.enhance_section_id {
        let report = state.store.latest_report_for_thread(thread_id).await?;
        let current_html = match &body.current_html {
            Some(html) => html.clone(),
            None => report
                .section(section_id)
                .map(|section| section.html_content.clone())
                .ok_or_else(|| AppError::from(StoreError::SectionNotFound(section_id.clone())))?,
        };
        return Ok(GenerationScope::EditSection {
            report_id: report.id,
            section_id: section_id.clone(),
            current_html,
        });
    }
    if let Some(position) = body.position {
        let report = state.store.latest_report_for_thread(thread_id).await?;
        return Ok(GenerationScope::AddSection {
            report_id: report.id,
            position,
        });
    }
    if body.suggest {
        let report = state.store.latest_report_for_thread(thread_id).await?;
        return Ok(GenerationScope::Suggest {
            report_id: report.id,
        });
    }
    Ok(GenerationScope::FullReport)
}

// ============ Report reads ============

async fn handle_latest_report(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let report = state.store.latest_report_for_thread(&thread_id).await?;
    Ok(Json(report))
}

async fn handle_get_report(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<Report>, AppError> {
    let report = state.store.get_report(&report_id).await?;
    Ok(Json(report))
}

// ============ Usage ============

async fn handle_usage_snapshot(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<UsageSnapshot>, AppError> {
    let report = state.store.get_report(&report_id).await?;
    Ok(Json(usage_snapshot(&report)))
}

/// Push feed: one SSE frame per recorded operation for this report.
async fn handle_usage_stream(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Response, AppError> {
    // 404 for unknown reports instead of an empty feed.
    state.store.get_report(&report_id).await?;

    let feed = BroadcastStream::new(state.meter.subscribe()).filter_map(move |update| {
        let update = update.ok()?;
        if update.report_id != report_id {
            return None;
        }
        let payload = serde_json::to_string(&update).ok()?;
        Some(Ok::<Event, Infallible>(Event::default().data(payload)))
    });

    Ok(Sse::new(feed).into_response())
}

// ============ Synchronous section operations ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveSectionBody {
    direction: MoveDirection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatchSectionBody {
    html_content: String,
    edited_by: Option<String>,
    prompt: Option<String>,
}

async fn handle_move_section(
    State(state): State<AppState>,
    Path((report_id, section_id)): Path<(String, String)>,
    Json(body): Json<MoveSectionBody>,
) -> Result<Json<Report>, AppError> {
    let report = state
        .store
        .move_section(&report_id, &section_id, body.direction)
        .await?;
    Ok(Json(report))
}

async fn handle_duplicate_section(
    State(state): State<AppState>,
    Path((report_id, section_id)): Path<(String, String)>,
) -> Result<Json<Report>, AppError> {
    let report = state.store.duplicate_section(&report_id, &section_id).await?;
    Ok(Json(report))
}

async fn handle_delete_section(
    State(state): State<AppState>,
    Path((report_id, section_id)): Path<(String, String)>,
) -> Result<Json<Report>, AppError> {
    let report = state.store.delete_section(&report_id, &section_id).await?;
    Ok(Json(report))
}

/// Manual (non-AI) section edit; same version/history semantics as the
/// streamed edit flow.
async fn handle_patch_section(
    State(state): State<AppState>,
    Path((report_id, section_id)): Path<(String, String)>,
    Json(body): Json<PatchSectionBody>,
) -> Result<Json<Section>, AppError> {
    if body.html_content.trim().is_empty() {
        return Err(bad_request("htmlContent must not be empty"));
    }
    let edited_by = body.edited_by.unwrap_or_else(|| "user".to_string());
    let section = state
        .store
        .patch_section(
            &report_id,
            &section_id,
            body.html_content,
            &edited_by,
            body.prompt,
        )
        .await?;
    Ok(Json(section))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
