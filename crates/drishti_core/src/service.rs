//! crates/drishti_core/src/service.rs
//!
//! `PerspectiveService` implements the `PerspectiveApi` operations by composing a
//! `SessionStore` with a `PerspectiveOracle`. It is what the HTTP layer serves and
//! what an in-process engine can be wired to directly.

use crate::domain::{
    CardsOutcome, ChatTurn, PerspectiveCard, Question, QuestionDraft, QuestionKind, SessionDetail,
    SessionId, SessionPage, SessionQuery, SessionStatus, SubmittedAnswer,
};
use crate::journal;
use crate::ports::{
    ChatContext, PerspectiveApi, PerspectiveOracle, PortError, PortResult, ReflectionContext,
    SessionStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Points awarded when a session's cards are generated.
pub const COMPLETION_POINTS: u32 = 50;

#[derive(Clone)]
pub struct PerspectiveService {
    store: Arc<dyn SessionStore>,
    oracle: Arc<dyn PerspectiveOracle>,
}

impl PerspectiveService {
    pub fn new(store: Arc<dyn SessionStore>, oracle: Arc<dyn PerspectiveOracle>) -> Self {
        Self { store, oracle }
    }
}

/// Rejects oracle questions the answer rules could never be satisfied for.
fn check_drafts(drafts: &[QuestionDraft]) -> PortResult<()> {
    if drafts.is_empty() {
        return Err(PortError::OracleMalformedResponse(
            "no questions were generated".to_string(),
        ));
    }
    for draft in drafts {
        if draft.prompt.trim().is_empty() {
            return Err(PortError::OracleMalformedResponse(
                "a question has no prompt".to_string(),
            ));
        }
        match &draft.kind {
            QuestionKind::MultipleChoice { options } | QuestionKind::Emoji { options }
                if options.is_empty() =>
            {
                return Err(PortError::OracleMalformedResponse(format!(
                    "{} question '{}' has no options",
                    draft.kind.type_name(),
                    draft.prompt
                )));
            }
            QuestionKind::Scale { min, max, .. } if min >= max => {
                return Err(PortError::OracleMalformedResponse(format!(
                    "scale question '{}' has an empty range {}..{}",
                    draft.prompt, min, max
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_cards(cards: &[PerspectiveCard]) -> PortResult<()> {
    if cards.is_empty() {
        return Err(PortError::OracleMalformedResponse(
            "no cards were generated".to_string(),
        ));
    }
    if cards
        .iter()
        .any(|c| c.title.trim().is_empty() || c.content.trim().is_empty())
    {
        return Err(PortError::OracleMalformedResponse(
            "a card is missing its title or content".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl PerspectiveApi for PerspectiveService {
    async fn create_session(&self, user_id: Uuid, user_input: &str) -> PortResult<SessionId> {
        let user_input = user_input.trim();
        if user_input.is_empty() {
            return Err(PortError::Validation("User input is required".to_string()));
        }
        self.store.ensure_user(user_id).await?;
        let session = self.store.create_session(user_id, user_input).await?;
        info!("Created perspective session {} for user {}", session.id, user_id);
        Ok(session.id)
    }

    async fn generate_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        user_input: &str,
    ) -> PortResult<Vec<Question>> {
        let session = self.store.get_session(user_id, session_id).await?;
        if !session.quiz_questions.is_empty() {
            info!("Session {} already has a quiz, returning it", session_id);
            return Ok(session.quiz_questions);
        }
        if session.status != SessionStatus::AwaitingQuiz {
            return Err(PortError::Validation(format!(
                "Session {} is {} and cannot take a quiz",
                session_id, session.status
            )));
        }
        if user_input.trim() != session.user_input {
            warn!(
                "Quiz requested for session {} with input that differs from the stored one; using the stored input",
                session_id
            );
        }

        let drafts = self.oracle.generate_quiz(&session.user_input).await?;
        check_drafts(&drafts)?;
        let questions = self.store.attach_quiz(user_id, session_id, drafts).await?;
        info!("Attached {} questions to session {}", questions.len(), session_id);
        Ok(questions)
    }

    async fn submit_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()> {
        let session = self.store.get_session(user_id, session_id).await?;
        if session.status == SessionStatus::Completed {
            // A replay of the answers the session was completed with changes nothing.
            let replay = answers
                .iter()
                .all(|a| session.quiz_answers.get(&a.question_id) == Some(&a.value));
            if replay {
                info!("Session {} already completed with these answers", session_id);
                return Ok(());
            }
            return Err(PortError::Validation(format!(
                "Session {} is already completed",
                session_id
            )));
        }
        if let Some(unknown) = answers
            .iter()
            .find(|a| !session.quiz_questions.iter().any(|q| q.id == a.question_id))
        {
            return Err(PortError::Validation(format!(
                "Question {} does not belong to session {}",
                unknown.question_id, session_id
            )));
        }
        self.store
            .record_answers(user_id, session_id, answers)
            .await?;
        info!("Recorded {} answers for session {}", answers.len(), session_id);
        Ok(())
    }

    async fn generate_cards(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<CardsOutcome> {
        let session = self.store.get_session(user_id, session_id).await?;
        match session.status {
            SessionStatus::Completed => {
                info!("Session {} already completed, returning stored cards", session_id);
                return Ok(CardsOutcome {
                    cards: session.cards,
                    points_earned: session.points_earned,
                });
            }
            SessionStatus::AwaitingQuiz => {
                return Err(PortError::Validation(format!(
                    "Session {} has no quiz yet",
                    session_id
                )));
            }
            SessionStatus::Understanding => {}
        }
        let missing = session.unanswered();
        if !missing.is_empty() {
            return Err(PortError::Validation(format!(
                "{} question(s) of session {} have no submitted answer",
                missing.len(),
                session_id
            )));
        }

        let context = ReflectionContext::from_session(&session);
        let cards = self.oracle.generate_cards(&context).await?;
        check_cards(&cards)?;

        let completed = self
            .store
            .complete_session(user_id, session_id, &cards, COMPLETION_POINTS)
            .await?;
        info!(
            "Session {} completed with {} cards, {} points",
            session_id,
            completed.cards.len(),
            completed.points_earned
        );
        Ok(CardsOutcome {
            cards: completed.cards,
            points_earned: completed.points_earned,
        })
    }

    async fn save_to_journal(&self, user_id: Uuid, session_id: SessionId) -> PortResult<u32> {
        let session = self.store.get_session(user_id, session_id).await?;
        if session.status != SessionStatus::Completed {
            return Err(PortError::Validation(format!(
                "Session {} is not completed",
                session_id
            )));
        }
        if session.saved_to_journal {
            return Err(PortError::Validation(
                "Session already saved to journal".to_string(),
            ));
        }

        let entry = journal::entry_for_session(&session, Utc::now().date_naive());
        self.store
            .save_journal_entry(user_id, session_id, &entry)
            .await?;
        info!(
            "Saved session {} to journal for {} points",
            session_id, entry.points_earned
        );
        Ok(entry.points_earned)
    }

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage> {
        self.store.list_sessions(user_id, query).await
    }

    async fn fetch_session_detail(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<SessionDetail> {
        let session = self.store.get_session(user_id, session_id).await?;
        Ok(session.to_detail())
    }

    async fn chat(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        message: &str,
        history: &[ChatTurn],
    ) -> PortResult<String> {
        let message = message.trim();
        if message.is_empty() {
            return Err(PortError::Validation("Message is required".to_string()));
        }
        let session = self.store.get_session(user_id, session_id).await?;
        if session.status != SessionStatus::Completed || session.cards.is_empty() {
            return Err(PortError::Validation(format!(
                "Session {} has no perspective cards to talk about yet",
                session_id
            )));
        }
        let context = ChatContext {
            user_input: session.user_input,
            cards: session.cards,
        };
        self.oracle.chat_reply(&context, history, message).await
    }
}
