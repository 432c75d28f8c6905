//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use drishti_core::chat::ChatThread;
use drishti_core::ports::{ChatHistoryStore, PerspectiveApi};
use drishti_core::workflow::{WorkflowConfig, WorkflowEngine};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub perspective: Arc<dyn PerspectiveApi>,
    pub chat_history: Arc<dyn ChatHistoryStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            call_timeout: self.config.call_timeout,
        }
    }
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection: one workflow engine and
/// the chat thread opened from it, if any.
pub struct ConnectionState {
    pub user_id: Uuid,
    pub engine: Arc<WorkflowEngine>,
    pub chat: Arc<Mutex<Option<ChatThread>>>,
    /// Cancelled when the client goes away, abandoning any request still in flight.
    pub cancellation_token: CancellationToken,
}

impl ConnectionState {
    pub fn new(app_state: &AppState, user_id: Uuid) -> Self {
        Self {
            user_id,
            engine: Arc::new(WorkflowEngine::new(
                app_state.perspective.clone(),
                user_id,
                app_state.workflow_config(),
            )),
            chat: Arc::new(Mutex::new(None)),
            cancellation_token: CancellationToken::new(),
        }
    }
}
