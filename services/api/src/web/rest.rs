//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every handler runs behind `require_user`, which places the caller's id in the
//! request extensions.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use drishti_core::domain::{
    ChatTurn, SessionId, SessionQuery, SessionStatus, SubmittedAnswer,
};
use drishti_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_session_handler,
        list_sessions_handler,
        session_detail_handler,
        generate_quiz_handler,
        submit_answers_handler,
        generate_cards_handler,
        save_to_journal_handler,
        chat_handler,
    ),
    components(
        schemas(
            CreateSessionRequest,
            CreateSessionResponse,
            GenerateQuizRequest,
            SubmitAnswersRequest,
            JournalResponse,
            ChatRequest,
            ChatResponse,
        )
    ),
    tags(
        (name = "Drishti Perspective API", description = "Endpoints for guided perspective sessions.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    user_input: String,
}

/// The response payload sent after successfully creating a session.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

#[derive(Deserialize, IntoParams)]
pub struct ListSessionsParams {
    /// 1-based page number.
    page: Option<u32>,
    /// Page size, clamped to 1..=50.
    limit: Option<u32>,
    /// One of `awaiting_quiz`, `understanding`, `completed`.
    status: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizRequest {
    #[serde(default)]
    user_input: String,
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitAnswersRequest {
    /// `{questionId, value}` pairs; scale answers are numbers.
    #[schema(value_type = Vec<Object>)]
    answers: Vec<SubmittedAnswer>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JournalResponse {
    pub points_earned: u32,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    message: String,
    /// Prior turns of the conversation, oldest first.
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    history: Vec<ChatTurn>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    pub message: String,
}

type HandlerError = (StatusCode, String);

/// Maps a port failure to the status code the client sees.
pub fn status_for(err: &PortError) -> StatusCode {
    match err {
        PortError::Validation(_) => StatusCode::BAD_REQUEST,
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortError::OracleUnavailable(_) | PortError::OracleMalformedResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn port_error(operation: &str) -> impl FnOnce(PortError) -> HandlerError + '_ {
    move |e| {
        let status = status_for(&e);
        if status.is_server_error() {
            error!("Failed to {}: {}", operation, e);
        } else {
            warn!("Rejected {}: {}", operation, e);
        }
        (status, e.to_string())
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Start a perspective session from what the user shared.
#[utoipa::path(
    post,
    path = "/perspective/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Empty input"),
        (status = 401, description = "Missing x-user-id header"),
        (status = 503, description = "Session store unavailable")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let session_id = app_state
        .perspective
        .create_session(user_id, &body.user_input)
        .await
        .map_err(port_error("create session"))?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id })))
}

/// List the caller's sessions, newest first.
#[utoipa::path(
    get,
    path = "/perspective/sessions",
    params(
        ListSessionsParams,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "One page of session summaries"),
        (status = 400, description = "Unknown status filter")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(params): Query<ListSessionsParams>,
) -> Result<impl IntoResponse, HandlerError> {
    let status = match params.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(SessionStatus::parse(raw).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Unknown session status '{}'", raw),
            )
        })?),
    };
    let query = SessionQuery::new(
        params.page.unwrap_or(1),
        params.limit.unwrap_or(SessionQuery::DEFAULT_PAGE_SIZE),
        status,
    );
    let page = app_state
        .perspective
        .list_sessions(user_id, &query)
        .await
        .map_err(port_error("list sessions"))?;
    Ok(Json(page))
}

/// Fetch one session with its questions, answers and cards.
#[utoipa::path(
    get,
    path = "/perspective/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Session detail"),
        (status = 404, description = "No such session for this user")
    )
)]
pub async fn session_detail_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
) -> Result<impl IntoResponse, HandlerError> {
    let detail = app_state
        .perspective
        .fetch_session_detail(user_id, session_id)
        .await
        .map_err(port_error("fetch session"))?;
    Ok(Json(detail))
}

/// Generate (or return the already generated) quiz for a session.
#[utoipa::path(
    post,
    path = "/perspective/sessions/{id}/quiz",
    request_body = GenerateQuizRequest,
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "The session's questions"),
        (status = 404, description = "No such session for this user"),
        (status = 502, description = "The question generator failed")
    )
)]
pub async fn generate_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<GenerateQuizRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let questions = app_state
        .perspective
        .generate_quiz(user_id, session_id, &body.user_input)
        .await
        .map_err(port_error("generate quiz"))?;
    Ok(Json(serde_json::json!({ "questions": questions })))
}

/// Store answers; each one replaces any earlier answer to the same question.
#[utoipa::path(
    post,
    path = "/perspective/sessions/{id}/answers",
    request_body = SubmitAnswersRequest,
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 204, description = "Answers stored"),
        (status = 400, description = "Unknown question or completed session")
    )
)]
pub async fn submit_answers_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    app_state
        .perspective
        .submit_answers(user_id, session_id, &body.answers)
        .await
        .map_err(port_error("submit answers"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Generate the perspective cards and complete the session.
#[utoipa::path(
    post,
    path = "/perspective/sessions/{id}/cards",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Cards and points earned"),
        (status = 400, description = "Quiz missing or not fully answered"),
        (status = 502, description = "The card generator failed")
    )
)]
pub async fn generate_cards_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .perspective
        .generate_cards(user_id, session_id)
        .await
        .map_err(port_error("generate cards"))?;
    Ok(Json(outcome))
}

/// Save a completed session to the journal for bonus points.
#[utoipa::path(
    post,
    path = "/perspective/sessions/{id}/journal",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Bonus points awarded", body = JournalResponse),
        (status = 400, description = "Session not completed or already saved")
    )
)]
pub async fn save_to_journal_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
) -> Result<impl IntoResponse, HandlerError> {
    let points_earned = app_state
        .perspective
        .save_to_journal(user_id, session_id)
        .await
        .map_err(port_error("save to journal"))?;
    Ok(Json(JournalResponse { points_earned }))
}

/// Ask a follow-up question about a completed session's cards.
#[utoipa::path(
    post,
    path = "/perspective/sessions/{id}/chat",
    request_body = ChatRequest,
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "The assistant's reply", body = ChatResponse),
        (status = 400, description = "Empty message or session without cards")
    )
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<SessionId>,
    Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let message = app_state
        .perspective
        .chat(user_id, session_id, &body.message, &body.history)
        .await
        .map_err(port_error("chat"))?;
    Ok(Json(ChatResponse { message }))
}
