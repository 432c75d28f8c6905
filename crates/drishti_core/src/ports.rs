//! crates/drishti_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or LLM APIs.

use crate::domain::{
    CardsOutcome, ChatTurn, JournalEntry, PerspectiveCard, Question, QuestionDraft,
    ReflectionSession, SessionDetail, SessionId, SessionPage, SessionQuery, SubmittedAnswer,
};
use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("{0}")]
    Validation(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("The session store is unavailable: {0}")]
    StoreUnavailable(String),
    #[error("The perspective generator is unavailable: {0}")]
    OracleUnavailable(String),
    #[error("The perspective generator returned an unusable response: {0}")]
    OracleMalformedResponse(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// The coarse failure classes callers react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StoreUnavailable,
    OracleUnavailable,
    OracleMalformedResponse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::OracleUnavailable => "oracle_unavailable",
            ErrorKind::OracleMalformedResponse => "oracle_malformed_response",
        };
        f.write_str(name)
    }
}

impl PortError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortError::Validation(_) | PortError::NotFound(_) | PortError::Unauthorized => {
                ErrorKind::Validation
            }
            PortError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            PortError::OracleUnavailable(_) => ErrorKind::OracleUnavailable,
            PortError::OracleMalformedResponse(_) => ErrorKind::OracleMalformedResponse,
        }
    }

    /// Collaborator failures can be retried unchanged; validation failures need new input.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Validation)
    }

    pub fn session_not_found(session_id: SessionId) -> Self {
        PortError::NotFound(format!("Session {} not found", session_id))
    }
}

//=========================================================================================
// Collaborator Ports (Traits)
//=========================================================================================

/// Persistence for reflection sessions. Every operation is scoped to the owning user;
/// sessions of other users are reported as `NotFound`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn ensure_user(&self, user_id: Uuid) -> PortResult<()>;

    /// Creates a session in the `awaiting_quiz` state.
    async fn create_session(&self, user_id: Uuid, user_input: &str)
        -> PortResult<ReflectionSession>;

    async fn get_session(&self, user_id: Uuid, session_id: SessionId)
        -> PortResult<ReflectionSession>;

    /// Attaches the quiz and moves the session to `understanding`. If a quiz is already
    /// attached the stored questions are returned unchanged.
    async fn attach_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        questions: Vec<QuestionDraft>,
    ) -> PortResult<Vec<Question>>;

    /// Upserts answers key by key. Keys not mentioned are left untouched.
    async fn record_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()>;

    /// Stores the cards, marks the session `completed` and awards the points to the user.
    /// A session that is already completed is returned as stored, without a second award.
    async fn complete_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        cards: &[PerspectiveCard],
        points: u32,
    ) -> PortResult<ReflectionSession>;

    /// Writes the journal entry, flags the session as saved and awards the entry's points.
    async fn save_journal_entry(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        entry: &JournalEntry,
    ) -> PortResult<()>;

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage>;
}

/// Context handed to the oracle when generating cards.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionContext {
    pub user_input: String,
    /// `(question prompt, answer text)` in quiz order.
    pub answers: Vec<(String, String)>,
}

impl ReflectionContext {
    pub fn from_session(session: &ReflectionSession) -> Self {
        let answers = session
            .quiz_questions
            .iter()
            .map(|q| {
                let answer = session
                    .quiz_answers
                    .get(&q.id)
                    .map(|a| a.to_text())
                    .unwrap_or_default();
                (q.prompt.clone(), answer)
            })
            .collect();
        Self {
            user_input: session.user_input.clone(),
            answers,
        }
    }
}

/// Context handed to the oracle for a chat reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatContext {
    pub user_input: String,
    pub cards: Vec<PerspectiveCard>,
}

/// The external AI text generator. Treated as an opaque, possibly slow and failing oracle.
#[async_trait]
pub trait PerspectiveOracle: Send + Sync {
    async fn generate_quiz(&self, user_input: &str) -> PortResult<Vec<QuestionDraft>>;

    async fn generate_cards(&self, context: &ReflectionContext) -> PortResult<Vec<PerspectiveCard>>;

    async fn chat_reply(
        &self,
        context: &ChatContext,
        history: &[ChatTurn],
        message: &str,
    ) -> PortResult<String>;
}

/// The operations the workflow engine consumes, independent of transport.
#[async_trait]
pub trait PerspectiveApi: Send + Sync {
    async fn create_session(&self, user_id: Uuid, user_input: &str) -> PortResult<SessionId>;

    async fn generate_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        user_input: &str,
    ) -> PortResult<Vec<Question>>;

    async fn submit_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()>;

    async fn generate_cards(&self, user_id: Uuid, session_id: SessionId)
        -> PortResult<CardsOutcome>;

    /// Returns the bonus points awarded for the journal entry.
    async fn save_to_journal(&self, user_id: Uuid, session_id: SessionId) -> PortResult<u32>;

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage>;

    async fn fetch_session_detail(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<SessionDetail>;

    async fn chat(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        message: &str,
        history: &[ChatTurn],
    ) -> PortResult<String>;
}

/// Client-local persistence for chat threads, keyed by session.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    async fn load(&self, session_id: SessionId) -> PortResult<Vec<ChatTurn>>;

    async fn save(&self, session_id: SessionId, turns: &[ChatTurn]) -> PortResult<()>;
}
