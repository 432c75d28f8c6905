//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `SessionStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Writes that must be all-or-nothing (attaching a quiz, completing a session,
//! saving to the journal) run in a transaction that first locks the session row,
//! so concurrent requests for the same session are applied one after another.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drishti_core::domain::{
    AnswerValue, CardType, JournalEntry, PerspectiveCard, Question, QuestionDraft, QuestionKind,
    QuizAnswers, ReflectionSession, SessionId, SessionPage, SessionQuery, SessionStatus,
    SessionSummary, SubmittedAnswer,
};
use drishti_core::ports::{PortError, PortResult, SessionStore};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{error, info};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `SessionStore` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unavailable(e: sqlx::Error) -> PortError {
    error!("Database error: {}", e);
    PortError::StoreUnavailable(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const SESSION_COLUMNS: &str =
    "id, user_id, user_input, status, points_earned, saved_to_journal, created_at, completed_at";

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    user_input: String,
    status: String,
    points_earned: i32,
    saved_to_journal: bool,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn status(&self) -> PortResult<SessionStatus> {
        SessionStatus::parse(&self.status).ok_or_else(|| {
            PortError::StoreUnavailable(format!(
                "session {} has an unknown status '{}'",
                self.id, self.status
            ))
        })
    }

    fn to_domain(
        self,
        quizzes: Vec<QuizRecord>,
        cards: Vec<CardRecord>,
    ) -> PortResult<ReflectionSession> {
        let status = self.status()?;
        let mut quiz_questions = Vec::with_capacity(quizzes.len());
        let mut quiz_answers = QuizAnswers::new();
        for quiz in quizzes {
            if let Some(answer) = quiz.answer() {
                quiz_answers.insert(quiz.id, answer);
            }
            quiz_questions.push(quiz.to_domain()?);
        }
        Ok(ReflectionSession {
            id: self.id,
            user_id: self.user_id,
            user_input: self.user_input,
            status,
            quiz_questions,
            quiz_answers,
            cards: cards.into_iter().map(CardRecord::to_domain).collect(),
            points_earned: u32::try_from(self.points_earned).unwrap_or(0),
            saved_to_journal: self.saved_to_journal,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(FromRow)]
struct QuizRecord {
    id: Uuid,
    question_text: String,
    kind_json: String,
    answer_text: Option<String>,
    answer_number: Option<i64>,
}

impl QuizRecord {
    fn to_domain(self) -> PortResult<Question> {
        let kind: QuestionKind = serde_json::from_str(&self.kind_json).map_err(|e| {
            PortError::StoreUnavailable(format!("question {} is unreadable: {}", self.id, e))
        })?;
        Ok(Question {
            id: self.id,
            prompt: self.question_text,
            kind,
        })
    }

    fn answer(&self) -> Option<AnswerValue> {
        match (self.answer_number, &self.answer_text) {
            (Some(n), _) => Some(AnswerValue::Number(n)),
            (None, Some(text)) => Some(AnswerValue::Text(text.clone())),
            (None, None) => None,
        }
    }
}

#[derive(FromRow)]
struct CardRecord {
    title: String,
    content: String,
    card_type: String,
}

impl CardRecord {
    fn to_domain(self) -> PerspectiveCard {
        PerspectiveCard {
            title: self.title,
            content: self.content,
            card_type: CardType::parse(&self.card_type),
        }
    }
}

#[derive(FromRow)]
struct SummaryRecord {
    id: Uuid,
    user_input: String,
    status: String,
    saved_to_journal: bool,
    quizzes_count: i64,
    cards_count: i64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SummaryRecord {
    fn to_domain(self) -> PortResult<SessionSummary> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            PortError::StoreUnavailable(format!(
                "session {} has an unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(SessionSummary {
            id: self.id,
            user_input: self.user_input,
            status,
            saved_to_journal: self.saved_to_journal,
            quizzes_count: usize::try_from(self.quizzes_count).unwrap_or(0),
            cards_count: usize::try_from(self.cards_count).unwrap_or(0),
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(FromRow)]
struct CountRecord {
    total: i64,
}

//=========================================================================================
// Row Helpers
//=========================================================================================

/// Locks the session row for the rest of the transaction, checking ownership.
async fn lock_session(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    session_id: SessionId,
) -> PortResult<SessionRecord> {
    let sql = format!(
        "SELECT {} FROM perspective_sessions WHERE id = $1 AND user_id = $2 FOR UPDATE",
        SESSION_COLUMNS
    );
    sqlx::query_as::<_, SessionRecord>(&sql)
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(unavailable)?
        .ok_or_else(|| PortError::session_not_found(session_id))
}

async fn load_quizzes(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
) -> PortResult<Vec<QuizRecord>> {
    sqlx::query_as::<_, QuizRecord>(
        "SELECT id, question_text, kind_json, answer_text, answer_number \
         FROM perspective_quizzes WHERE session_id = $1 ORDER BY position ASC",
    )
    .bind(session_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(unavailable)
}

async fn load_cards(
    tx: &mut Transaction<'_, Postgres>,
    session_id: SessionId,
) -> PortResult<Vec<CardRecord>> {
    sqlx::query_as::<_, CardRecord>(
        "SELECT title, content, card_type FROM perspective_cards \
         WHERE session_id = $1 ORDER BY position ASC",
    )
    .bind(session_id)
    .fetch_all(&mut **tx)
    .await
    .map_err(unavailable)
}

async fn load_session(
    tx: &mut Transaction<'_, Postgres>,
    record: SessionRecord,
) -> PortResult<ReflectionSession> {
    let quizzes = load_quizzes(tx, record.id).await?;
    let cards = load_cards(tx, record.id).await?;
    record.to_domain(quizzes, cards)
}

fn points_column(points: u32) -> i32 {
    i32::try_from(points).unwrap_or(i32::MAX)
}

//=========================================================================================
// `SessionStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionStore for DbAdapter {
    async fn ensure_user(&self, user_id: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO users (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        user_input: &str,
    ) -> PortResult<ReflectionSession> {
        let sql = format!(
            "INSERT INTO perspective_sessions (id, user_id, user_input, status) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            SESSION_COLUMNS
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(user_input)
            .bind(SessionStatus::AwaitingQuiz.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        record.to_domain(Vec::new(), Vec::new())
    }

    async fn get_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<ReflectionSession> {
        let sql = format!(
            "SELECT {} FROM perspective_sessions WHERE id = $1 AND user_id = $2",
            SESSION_COLUMNS
        );
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| PortError::session_not_found(session_id))?;
        let session = load_session(&mut tx, record).await?;
        tx.commit().await.map_err(unavailable)?;
        Ok(session)
    }

    async fn attach_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        questions: Vec<QuestionDraft>,
    ) -> PortResult<Vec<Question>> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        lock_session(&mut tx, user_id, session_id).await?;

        let existing = load_quizzes(&mut tx, session_id).await?;
        if !existing.is_empty() {
            info!("Session {} already has a quiz; keeping the stored one", session_id);
            tx.commit().await.map_err(unavailable)?;
            return existing.into_iter().map(QuizRecord::to_domain).collect();
        }

        let mut attached = Vec::with_capacity(questions.len());
        for (position, draft) in questions.into_iter().enumerate() {
            let question = Question::from_draft(Uuid::new_v4(), draft);
            let kind_json = serde_json::to_string(&question.kind)
                .map_err(|e| PortError::Validation(e.to_string()))?;
            sqlx::query(
                "INSERT INTO perspective_quizzes \
                 (id, session_id, position, question_type, question_text, kind_json) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(question.id)
            .bind(session_id)
            .bind(position as i32)
            .bind(question.kind.type_name())
            .bind(&question.prompt)
            .bind(kind_json)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
            attached.push(question);
        }

        sqlx::query("UPDATE perspective_sessions SET status = $1 WHERE id = $2")
            .bind(SessionStatus::Understanding.as_str())
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        tx.commit().await.map_err(unavailable)?;
        Ok(attached)
    }

    async fn record_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        lock_session(&mut tx, user_id, session_id).await?;
        for answer in answers {
            let (text, number) = match &answer.value {
                AnswerValue::Number(n) => (None, Some(*n)),
                AnswerValue::Text(s) => (Some(s.as_str()), None),
            };
            let updated = sqlx::query(
                "UPDATE perspective_quizzes \
                 SET answer_text = $1, answer_number = $2, answered_at = now() \
                 WHERE id = $3 AND session_id = $4",
            )
            .bind(text)
            .bind(number)
            .bind(answer.question_id)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
            if updated.rows_affected() == 0 {
                return Err(PortError::Validation(format!(
                    "Question {} does not belong to session {}",
                    answer.question_id, session_id
                )));
            }
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn complete_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        cards: &[PerspectiveCard],
        points: u32,
    ) -> PortResult<ReflectionSession> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let record = lock_session(&mut tx, user_id, session_id).await?;
        if record.status()? == SessionStatus::Completed {
            info!("Session {} was already completed; not awarding points again", session_id);
            let session = load_session(&mut tx, record).await?;
            tx.commit().await.map_err(unavailable)?;
            return Ok(session);
        }

        for (position, card) in cards.iter().enumerate() {
            sqlx::query(
                "INSERT INTO perspective_cards (id, session_id, position, title, content, card_type) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(position as i32)
            .bind(&card.title)
            .bind(&card.content)
            .bind(card.card_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        let sql = format!(
            "UPDATE perspective_sessions \
             SET status = $1, points_earned = $2, completed_at = now() \
             WHERE id = $3 RETURNING {}",
            SESSION_COLUMNS
        );
        let completed = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(SessionStatus::Completed.as_str())
            .bind(points_column(points))
            .bind(session_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("UPDATE users SET total_points = total_points + $1 WHERE user_id = $2")
            .bind(points_column(points))
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let session = load_session(&mut tx, completed).await?;
        tx.commit().await.map_err(unavailable)?;
        Ok(session)
    }

    async fn save_journal_entry(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        entry: &JournalEntry,
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let record = lock_session(&mut tx, user_id, session_id).await?;
        if record.saved_to_journal {
            return Err(PortError::Validation(
                "Session already saved to journal".to_string(),
            ));
        }

        sqlx::query(
            "INSERT INTO journals \
             (id, user_id, session_id, title, content, summary, mood_emoji, tags, points_earned) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(session_id)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.summary)
        .bind(&entry.mood_emoji)
        .bind(&entry.tags)
        .bind(points_column(entry.points_earned))
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;
        sqlx::query("UPDATE perspective_sessions SET saved_to_journal = TRUE WHERE id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("UPDATE users SET total_points = total_points + $1 WHERE user_id = $2")
            .bind(points_column(entry.points_earned))
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage> {
        let status = query.status.map(SessionStatus::as_str);

        let count = sqlx::query_as::<_, CountRecord>(
            "SELECT COUNT(*) AS total FROM perspective_sessions \
             WHERE user_id = $1 AND ($2::TEXT IS NULL OR status = $2)",
        )
        .bind(user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let records = sqlx::query_as::<_, SummaryRecord>(
            "SELECT s.id, s.user_input, s.status, s.saved_to_journal, s.created_at, s.completed_at, \
                    (SELECT COUNT(*) FROM perspective_quizzes q WHERE q.session_id = s.id) AS quizzes_count, \
                    (SELECT COUNT(*) FROM perspective_cards c WHERE c.session_id = s.id) AS cards_count \
             FROM perspective_sessions s \
             WHERE s.user_id = $1 AND ($2::TEXT IS NULL OR s.status = $2) \
             ORDER BY s.created_at DESC \
             LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(status)
        .bind(i64::from(query.page_size))
        .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let sessions = records
            .into_iter()
            .map(SummaryRecord::to_domain)
            .collect::<PortResult<Vec<_>>>()?;
        let total = u64::try_from(count.total).unwrap_or(0);
        Ok(SessionPage::new(sessions, query, total))
    }
}
