pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

pub use middleware::require_user;
pub use rest::{
    chat_handler, create_session_handler, generate_cards_handler, generate_quiz_handler,
    list_sessions_handler, save_to_journal_handler, session_detail_handler,
    submit_answers_handler,
};
pub use ws_handler::ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// Builds the protected API router: every route requires the `x-user-id` header.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/perspective/sessions",
            post(create_session_handler).get(list_sessions_handler),
        )
        .route("/perspective/sessions/{id}", get(session_detail_handler))
        .route("/perspective/sessions/{id}/quiz", post(generate_quiz_handler))
        .route("/perspective/sessions/{id}/answers", post(submit_answers_handler))
        .route("/perspective/sessions/{id}/cards", post(generate_cards_handler))
        .route("/perspective/sessions/{id}/journal", post(save_to_journal_handler))
        .route("/perspective/sessions/{id}/chat", post(chat_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_user))
        .with_state(app_state)
}
