//! crates/drishti_core/src/domain.rs
//!
//! Defines the core data structures of a reflection session.
//! These types are independent of any database or transport; the serde derives
//! describe their JSON shape on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type QuestionId = Uuid;

/// Persisted lifecycle of a `ReflectionSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created from the user's input, quiz not generated yet.
    AwaitingQuiz,
    /// Quiz attached, answers still being collected.
    Understanding,
    /// Cards generated. Terminal.
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::AwaitingQuiz => "awaiting_quiz",
            SessionStatus::Understanding => "understanding",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "awaiting_quiz" => Some(SessionStatus::AwaitingQuiz),
            "understanding" => Some(SessionStatus::Understanding),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Questions and Answers
//=========================================================================================

/// The type-specific part of a clarifying question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
    },
    MultipleChoice {
        options: Vec<String>,
    },
    Scale {
        min: i64,
        max: i64,
        #[serde(default, rename = "minLabel", skip_serializing_if = "Option::is_none")]
        min_label: Option<String>,
        #[serde(default, rename = "maxLabel", skip_serializing_if = "Option::is_none")]
        max_label: Option<String>,
    },
    Emoji {
        options: Vec<String>,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::Text { .. } => "text",
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::Scale { .. } => "scale",
            QuestionKind::Emoji { .. } => "emoji",
        }
    }
}

/// A question as produced by the oracle, before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// One clarifying prompt, unique within its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

impl Question {
    pub fn from_draft(id: QuestionId, draft: QuestionDraft) -> Self {
        Self {
            id,
            prompt: draft.prompt,
            kind: draft.kind,
        }
    }
}

/// A captured answer. Scale questions are answered with numbers, everything else with text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Number(i64),
    Text(String),
}

impl AnswerValue {
    /// The textual form used for storage and for prompting the oracle.
    pub fn to_text(&self) -> String {
        match self {
            AnswerValue::Number(n) => n.to_string(),
            AnswerValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Number(n) => write!(f, "{}", n),
            AnswerValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        AnswerValue::Text(value.to_string())
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        AnswerValue::Text(value)
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        AnswerValue::Number(value)
    }
}

/// Answers keyed by question id. One value per key, last write wins.
pub type QuizAnswers = BTreeMap<QuestionId, AnswerValue>;

/// A single `{questionId, value}` pair as submitted to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

//=========================================================================================
// Cards
//=========================================================================================

/// The angle a perspective card takes. Unknown values are kept, never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    Growth,
    Compassion,
    Action,
    #[default]
    Insight,
    #[serde(other)]
    Unrecognized,
}

impl CardType {
    pub fn as_str(self) -> &'static str {
        match self {
            CardType::Growth => "growth",
            CardType::Compassion => "compassion",
            CardType::Action => "action",
            CardType::Insight => "insight",
            CardType::Unrecognized => "unrecognized",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "growth" => CardType::Growth,
            "compassion" => CardType::Compassion,
            "action" => CardType::Action,
            "insight" => CardType::Insight,
            _ => CardType::Unrecognized,
        }
    }
}

/// One generated reframing shown in the solution stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectiveCard {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub card_type: CardType,
}

//=========================================================================================
// Sessions
//=========================================================================================

/// One user's pass through the reflection flow, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionSession {
    pub id: SessionId,
    pub user_id: Uuid,
    pub user_input: String,
    pub status: SessionStatus,
    pub quiz_questions: Vec<Question>,
    pub quiz_answers: QuizAnswers,
    pub cards: Vec<PerspectiveCard>,
    pub points_earned: u32,
    pub saved_to_journal: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReflectionSession {
    /// Questions that do not yet have a stored answer, in quiz order.
    pub fn unanswered(&self) -> Vec<QuestionId> {
        self.quiz_questions
            .iter()
            .filter(|q| !self.quiz_answers.contains_key(&q.id))
            .map(|q| q.id)
            .collect()
    }

    pub fn to_detail(&self) -> SessionDetail {
        SessionDetail {
            id: self.id,
            user_input: self.user_input.clone(),
            status: self.status,
            quizzes: self.quiz_questions.clone(),
            quiz_answers: self.quiz_answers.clone(),
            cards: self.cards.clone(),
            points_earned: self.points_earned,
            saved_to_journal: self.saved_to_journal,
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Everything needed to show or resume a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub id: SessionId,
    pub user_input: String,
    pub status: SessionStatus,
    pub quizzes: Vec<Question>,
    pub quiz_answers: QuizAnswers,
    pub cards: Vec<PerspectiveCard>,
    pub points_earned: u32,
    pub saved_to_journal: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A row in the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub user_input: String,
    pub status: SessionStatus,
    pub saved_to_journal: bool,
    pub quizzes_count: usize,
    pub cards_count: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pagination and filtering for the session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionQuery {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<SessionStatus>,
}

impl SessionQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;
    pub const MAX_PAGE_SIZE: u32 = 50;

    /// Builds a query with the page clamped to `>= 1` and the size to `1..=MAX_PAGE_SIZE`.
    pub fn new(page: u32, page_size: u32, status: Option<SessionStatus>) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, Self::MAX_PAGE_SIZE),
            status,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<SessionSummary>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl SessionPage {
    pub fn new(sessions: Vec<SessionSummary>, query: &SessionQuery, total: u64) -> Self {
        let page_size = u64::from(query.page_size);
        Self {
            sessions,
            page: query.page,
            page_size: query.page_size,
            total,
            total_pages: total.div_ceil(page_size),
        }
    }
}

/// Cards and points returned when a session completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsOutcome {
    pub cards: Vec<PerspectiveCard>,
    pub points_earned: u32,
}

//=========================================================================================
// Journal and Chat
//=========================================================================================

/// A journal entry produced from a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub mood_emoji: String,
    pub tags: Vec<String>,
    pub points_earned: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One message in the follow-up conversation about a session's cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_uses_the_type_tag_and_camel_case_labels() {
        let json = r#"{
            "id": "6f1c2b4e-8f0a-4d6b-9d7e-2a1b3c4d5e6f",
            "type": "scale",
            "question": "How intense is it?",
            "min": 1,
            "max": 5,
            "minLabel": "Mild",
            "maxLabel": "Overwhelming"
        }"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.prompt, "How intense is it?");
        assert_eq!(
            q.kind,
            QuestionKind::Scale {
                min: 1,
                max: 5,
                min_label: Some("Mild".into()),
                max_label: Some("Overwhelming".into()),
            }
        );
    }

    #[test]
    fn unknown_card_type_falls_back_instead_of_failing() {
        let card: PerspectiveCard =
            serde_json::from_str(r#"{"title":"t","content":"c","card_type":"wisdom"}"#).unwrap();
        assert_eq!(card.card_type, CardType::Unrecognized);

        let card: PerspectiveCard = serde_json::from_str(r#"{"title":"t","content":"c"}"#).unwrap();
        assert_eq!(card.card_type, CardType::Insight);
    }

    #[test]
    fn answers_deserialize_as_number_or_text() {
        let n: AnswerValue = serde_json::from_str("4").unwrap();
        let s: AnswerValue = serde_json::from_str(r#""4""#).unwrap();
        assert_eq!(n, AnswerValue::Number(4));
        assert_eq!(s, AnswerValue::Text("4".into()));
    }

    #[test]
    fn query_clamps_page_and_size() {
        let q = SessionQuery::new(0, 500, None);
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, SessionQuery::MAX_PAGE_SIZE);
        assert_eq!(SessionQuery::new(3, 10, None).offset(), 20);
    }

    #[test]
    fn total_pages_rounds_up() {
        let q = SessionQuery::new(1, 10, None);
        assert_eq!(SessionPage::new(vec![], &q, 21).total_pages, 3);
        assert_eq!(SessionPage::new(vec![], &q, 0).total_pages, 0);
    }
}
