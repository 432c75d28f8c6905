//! crates/drishti_core/src/memory.rs
//!
//! In-memory implementations of the storage ports, for tests and local runs.

use crate::domain::{
    ChatTurn, JournalEntry, PerspectiveCard, Question, QuestionDraft, ReflectionSession,
    SessionId, SessionPage, SessionQuery, SessionStatus, SessionSummary, SubmittedAnswer,
    QuizAnswers,
};
use crate::ports::{ChatHistoryStore, PortError, PortResult, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, ReflectionSession>,
    user_points: HashMap<Uuid, u32>,
    journals: Vec<(Uuid, SessionId, JournalEntry)>,
}

/// A `SessionStore` backed by process memory. Each operation runs under one lock, so
/// concurrent writes to the same session never interleave.
#[derive(Default)]
pub struct InMemorySessionStore {
    tables: Mutex<Tables>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user_points(&self, user_id: Uuid) -> u32 {
        self.tables().user_points.get(&user_id).copied().unwrap_or(0)
    }

    pub fn journal_entries(&self, user_id: Uuid) -> Vec<JournalEntry> {
        self.tables()
            .journals
            .iter()
            .filter(|(owner, _, _)| *owner == user_id)
            .map(|(_, _, entry)| entry.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.tables().sessions.len()
    }
}

fn owned_mut<'a>(
    tables: &'a mut Tables,
    user_id: Uuid,
    session_id: SessionId,
) -> PortResult<&'a mut ReflectionSession> {
    tables
        .sessions
        .get_mut(&session_id)
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| PortError::session_not_found(session_id))
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn ensure_user(&self, user_id: Uuid) -> PortResult<()> {
        self.tables().user_points.entry(user_id).or_insert(0);
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        user_input: &str,
    ) -> PortResult<ReflectionSession> {
        let session = ReflectionSession {
            id: Uuid::new_v4(),
            user_id,
            user_input: user_input.to_string(),
            status: SessionStatus::AwaitingQuiz,
            quiz_questions: Vec::new(),
            quiz_answers: QuizAnswers::new(),
            cards: Vec::new(),
            points_earned: 0,
            saved_to_journal: false,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.tables().sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<ReflectionSession> {
        let mut tables = self.tables();
        let session = owned_mut(&mut tables, user_id, session_id)?;
        Ok(session.clone())
    }

    async fn attach_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        questions: Vec<QuestionDraft>,
    ) -> PortResult<Vec<Question>> {
        let mut tables = self.tables();
        let session = owned_mut(&mut tables, user_id, session_id)?;
        if session.quiz_questions.is_empty() {
            session.quiz_questions = questions
                .into_iter()
                .map(|draft| Question::from_draft(Uuid::new_v4(), draft))
                .collect();
            session.status = SessionStatus::Understanding;
        }
        Ok(session.quiz_questions.clone())
    }

    async fn record_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()> {
        let mut tables = self.tables();
        let session = owned_mut(&mut tables, user_id, session_id)?;
        for answer in answers {
            session
                .quiz_answers
                .insert(answer.question_id, answer.value.clone());
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        cards: &[PerspectiveCard],
        points: u32,
    ) -> PortResult<ReflectionSession> {
        let mut tables = self.tables();
        let session = owned_mut(&mut tables, user_id, session_id)?;
        if session.status == SessionStatus::Completed {
            return Ok(session.clone());
        }
        session.cards = cards.to_vec();
        session.points_earned = points;
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());
        let completed = session.clone();
        *tables.user_points.entry(user_id).or_insert(0) += points;
        Ok(completed)
    }

    async fn save_journal_entry(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        entry: &JournalEntry,
    ) -> PortResult<()> {
        let mut tables = self.tables();
        let session = owned_mut(&mut tables, user_id, session_id)?;
        if session.saved_to_journal {
            return Err(PortError::Validation(
                "Session already saved to journal".to_string(),
            ));
        }
        session.saved_to_journal = true;
        tables.journals.push((user_id, session_id, entry.clone()));
        *tables.user_points.entry(user_id).or_insert(0) += entry.points_earned;
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage> {
        let tables = self.tables();
        let mut matching: Vec<&ReflectionSession> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| query.status.map_or(true, |status| s.status == status))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let sessions = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size as usize)
            .map(|s| SessionSummary {
                id: s.id,
                user_input: s.user_input.clone(),
                status: s.status,
                saved_to_journal: s.saved_to_journal,
                quizzes_count: s.quiz_questions.len(),
                cards_count: s.cards.len(),
                created_at: s.created_at,
                completed_at: s.completed_at,
            })
            .collect();
        Ok(SessionPage::new(sessions, query, total))
    }
}

/// A `ChatHistoryStore` that forgets everything when dropped.
#[derive(Default)]
pub struct InMemoryChatStore {
    threads: Mutex<HashMap<SessionId, Vec<ChatTurn>>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatStore {
    async fn load(&self, session_id: SessionId) -> PortResult<Vec<ChatTurn>> {
        let threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(threads.get(&session_id).cloned().unwrap_or_default())
    }

    async fn save(&self, session_id: SessionId, turns: &[ChatTurn]) -> PortResult<()> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        threads.insert(session_id, turns.to_vec());
        Ok(())
    }
}
