//! crates/drishti_core/src/chat.rs
//!
//! The follow-up conversation about a completed session's cards. The thread is
//! append-only and lives in client-local storage keyed by session id; the server
//! only sees the turns sent along with each new message.

use crate::domain::{ChatTurn, SessionId};
use crate::ports::{ChatHistoryStore, PerspectiveApi, PortError, PortResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub struct ChatThread {
    api: Arc<dyn PerspectiveApi>,
    history: Arc<dyn ChatHistoryStore>,
    user_id: Uuid,
    session_id: SessionId,
    turns: Vec<ChatTurn>,
    call_timeout: Duration,
}

impl ChatThread {
    /// Opens the thread for `session_id`, replaying whatever was stored for it.
    /// Unreadable history is logged and treated as an empty thread.
    pub async fn open(
        api: Arc<dyn PerspectiveApi>,
        history: Arc<dyn ChatHistoryStore>,
        user_id: Uuid,
        session_id: SessionId,
        call_timeout: Duration,
    ) -> Self {
        let turns = match history.load(session_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Failed to load chat history for session {}: {}", session_id, e);
                Vec::new()
            }
        };
        Self {
            api,
            history,
            user_id,
            session_id,
            turns,
            call_timeout,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    async fn persist(&self) {
        if let Err(e) = self.history.save(self.session_id, &self.turns).await {
            warn!("Failed to store chat history for session {}: {}", self.session_id, e);
        }
    }

    /// Sends a message with all prior turns and appends the reply.
    ///
    /// The user's turn is kept even if the reply fails, matching what they saw typed.
    pub async fn send(&mut self, message: &str) -> PortResult<&ChatTurn> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PortError::Validation("Message is required".to_string()));
        }

        let prior = self.turns.clone();
        self.turns.push(ChatTurn::user(message));
        self.persist().await;

        let call = self.api.chat(self.user_id, self.session_id, message, &prior);
        let reply = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(PortError::OracleUnavailable(format!(
                    "chat reply timed out after {:?}",
                    self.call_timeout
                )))
            }
        };

        self.turns.push(ChatTurn::assistant(reply));
        self.persist().await;
        info!(
            "Chat for session {} now has {} turns",
            self.session_id,
            self.turns.len()
        );
        self.turns
            .last()
            .ok_or_else(|| PortError::Validation("chat thread is empty".to_string()))
    }
}
