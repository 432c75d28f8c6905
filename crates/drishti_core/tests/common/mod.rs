//! Shared fakes for the core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use drishti_core::memory::InMemorySessionStore;
use drishti_core::{
    AnswerValue, CardType, CardsOutcome, ChatContext, ChatTurn, JournalEntry, PerspectiveApi,
    PerspectiveCard, PerspectiveOracle, PerspectiveService, PortError, PortResult, Question,
    QuestionDraft, QuestionKind, ReflectionContext, ReflectionSession, SessionDetail, SessionId,
    SessionPage, SessionQuery, SessionStore, SubmittedAnswer, WorkflowConfig, WorkflowEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Consumes one unit of a failure budget, returning whether this call should fail.
fn take_failure(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

pub fn three_questions() -> Vec<QuestionDraft> {
    vec![
        QuestionDraft {
            prompt: "What happened before you started feeling this way?".into(),
            kind: QuestionKind::Text {
                placeholder: Some("Share a little more...".into()),
            },
        },
        QuestionDraft {
            prompt: "Which feeling is strongest?".into(),
            kind: QuestionKind::MultipleChoice {
                options: vec!["Worried".into(), "Tired".into(), "Frustrated".into()],
            },
        },
        QuestionDraft {
            prompt: "How intense is it right now?".into(),
            kind: QuestionKind::Scale {
                min: 1,
                max: 5,
                min_label: Some("Mild".into()),
                max_label: Some("Intense".into()),
            },
        },
    ]
}

pub fn three_cards() -> Vec<PerspectiveCard> {
    vec![
        PerspectiveCard {
            title: "One exam, not your whole future".into(),
            content: "It feels huge right now, but it is one step.".into(),
            card_type: CardType::Growth,
        },
        PerspectiveCard {
            title: "Be kind to yourself".into(),
            content: "Worrying means you care.".into(),
            card_type: CardType::Compassion,
        },
        PerspectiveCard {
            title: "Tonight's plan".into(),
            content: "Review one chapter, then rest.".into(),
            card_type: CardType::Action,
        },
    ]
}

/// A valid answer for any question kind.
pub fn valid_answer(question: &Question) -> AnswerValue {
    match &question.kind {
        QuestionKind::Text { .. } => AnswerValue::Text("It started after the mock test".into()),
        QuestionKind::MultipleChoice { options } | QuestionKind::Emoji { options } => {
            AnswerValue::Text(options[0].clone())
        }
        QuestionKind::Scale { max, .. } => AnswerValue::Number(*max),
    }
}

/// An oracle that returns canned content, counts calls and fails on request.
pub struct ScriptedOracle {
    pub questions: Mutex<Vec<QuestionDraft>>,
    pub cards: Mutex<Vec<PerspectiveCard>>,
    pub quiz_calls: AtomicUsize,
    pub card_calls: AtomicUsize,
    pub chat_calls: AtomicUsize,
    pub quiz_failures: AtomicUsize,
    pub card_failures: AtomicUsize,
    pub quiz_delay: Mutex<Option<Duration>>,
    /// When set, card generation waits for a notification before answering.
    pub card_gate: Mutex<Option<Arc<Notify>>>,
    pub last_chat_history: Mutex<Vec<ChatTurn>>,
    pub last_card_context: Mutex<Option<ReflectionContext>>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self {
            questions: Mutex::new(three_questions()),
            cards: Mutex::new(three_cards()),
            quiz_calls: AtomicUsize::new(0),
            card_calls: AtomicUsize::new(0),
            chat_calls: AtomicUsize::new(0),
            quiz_failures: AtomicUsize::new(0),
            card_failures: AtomicUsize::new(0),
            quiz_delay: Mutex::new(None),
            card_gate: Mutex::new(None),
            last_chat_history: Mutex::new(Vec::new()),
            last_card_context: Mutex::new(None),
        }
    }
}

impl ScriptedOracle {
    pub fn quiz_calls(&self) -> usize {
        self.quiz_calls.load(Ordering::SeqCst)
    }

    pub fn card_calls(&self) -> usize {
        self.card_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerspectiveOracle for ScriptedOracle {
    async fn generate_quiz(&self, _user_input: &str) -> PortResult<Vec<QuestionDraft>> {
        self.quiz_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.quiz_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.quiz_failures) {
            return Err(PortError::OracleUnavailable("quiz model overloaded".into()));
        }
        Ok(self.questions.lock().unwrap().clone())
    }

    async fn generate_cards(&self, context: &ReflectionContext) -> PortResult<Vec<PerspectiveCard>> {
        self.card_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_card_context.lock().unwrap() = Some(context.clone());
        let gate = self.card_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if take_failure(&self.card_failures) {
            return Err(PortError::OracleUnavailable("card model overloaded".into()));
        }
        Ok(self.cards.lock().unwrap().clone())
    }

    async fn chat_reply(
        &self,
        context: &ChatContext,
        history: &[ChatTurn],
        message: &str,
    ) -> PortResult<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_chat_history.lock().unwrap() = history.to_vec();
        Ok(format!(
            "About '{}' ({} cards): {}",
            context.user_input,
            context.cards.len(),
            message
        ))
    }
}

/// An in-memory store that can be told to fail specific writes.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemorySessionStore,
    pub create_calls: AtomicUsize,
    pub create_failures: AtomicUsize,
    pub answer_failures: AtomicUsize,
    pub complete_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn ensure_user(&self, user_id: Uuid) -> PortResult<()> {
        self.inner.ensure_user(user_id).await
    }

    async fn create_session(&self, user_id: Uuid, user_input: &str) -> PortResult<ReflectionSession> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.create_failures) {
            return Err(PortError::StoreUnavailable("connection refused".into()));
        }
        self.inner.create_session(user_id, user_input).await
    }

    async fn get_session(&self, user_id: Uuid, session_id: SessionId) -> PortResult<ReflectionSession> {
        self.inner.get_session(user_id, session_id).await
    }

    async fn attach_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        questions: Vec<QuestionDraft>,
    ) -> PortResult<Vec<Question>> {
        self.inner.attach_quiz(user_id, session_id, questions).await
    }

    async fn record_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()> {
        if take_failure(&self.answer_failures) {
            return Err(PortError::StoreUnavailable("write timed out".into()));
        }
        self.inner.record_answers(user_id, session_id, answers).await
    }

    async fn complete_session(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        cards: &[PerspectiveCard],
        points: u32,
    ) -> PortResult<ReflectionSession> {
        if take_failure(&self.complete_failures) {
            return Err(PortError::StoreUnavailable("write timed out".into()));
        }
        self.inner
            .complete_session(user_id, session_id, cards, points)
            .await
    }

    async fn save_journal_entry(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        entry: &JournalEntry,
    ) -> PortResult<()> {
        self.inner.save_journal_entry(user_id, session_id, entry).await
    }

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage> {
        self.inner.list_sessions(user_id, query).await
    }
}

/// Forwards to the real service, but can hold back the card-generation reply after
/// the server has already finished, as a dropped connection would.
pub struct LaggingApi {
    pub inner: Arc<PerspectiveService>,
    pub card_reply_delay: Mutex<Option<Duration>>,
    pub submit_calls: AtomicUsize,
}

impl LaggingApi {
    pub fn new(inner: Arc<PerspectiveService>) -> Self {
        Self {
            inner,
            card_reply_delay: Mutex::new(None),
            submit_calls: AtomicUsize::new(0),
        }
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PerspectiveApi for LaggingApi {
    async fn create_session(&self, user_id: Uuid, user_input: &str) -> PortResult<SessionId> {
        self.inner.create_session(user_id, user_input).await
    }

    async fn generate_quiz(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        user_input: &str,
    ) -> PortResult<Vec<Question>> {
        self.inner.generate_quiz(user_id, session_id, user_input).await
    }

    async fn submit_answers(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        answers: &[SubmittedAnswer],
    ) -> PortResult<()> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.submit_answers(user_id, session_id, answers).await
    }

    async fn generate_cards(&self, user_id: Uuid, session_id: SessionId) -> PortResult<CardsOutcome> {
        let outcome = self.inner.generate_cards(user_id, session_id).await;
        let delay = *self.card_reply_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn save_to_journal(&self, user_id: Uuid, session_id: SessionId) -> PortResult<u32> {
        self.inner.save_to_journal(user_id, session_id).await
    }

    async fn list_sessions(&self, user_id: Uuid, query: &SessionQuery) -> PortResult<SessionPage> {
        self.inner.list_sessions(user_id, query).await
    }

    async fn fetch_session_detail(
        &self,
        user_id: Uuid,
        session_id: SessionId,
    ) -> PortResult<SessionDetail> {
        self.inner.fetch_session_detail(user_id, session_id).await
    }

    async fn chat(
        &self,
        user_id: Uuid,
        session_id: SessionId,
        message: &str,
        history: &[ChatTurn],
    ) -> PortResult<String> {
        self.inner.chat(user_id, session_id, message, history).await
    }
}

/// A fully wired engine over the real service with fake collaborators.
pub struct Harness {
    pub user_id: Uuid,
    pub store: Arc<FlakyStore>,
    pub oracle: Arc<ScriptedOracle>,
    pub service: Arc<PerspectiveService>,
    pub engine: Arc<WorkflowEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig::default())
    }

    pub fn with_config(config: WorkflowConfig) -> Self {
        let user_id = Uuid::new_v4();
        let store = Arc::new(FlakyStore::default());
        let oracle = Arc::new(ScriptedOracle::default());
        let service = Arc::new(PerspectiveService::new(store.clone(), oracle.clone()));
        let engine = Arc::new(WorkflowEngine::new(service.clone(), user_id, config));
        Self {
            user_id,
            store,
            oracle,
            service,
            engine,
        }
    }

    /// Submits `input` and returns once the engine is in `understanding`.
    pub async fn start(&self, input: &str) {
        self.engine.set_input(input).unwrap();
        self.engine.submit().await.unwrap();
    }

    pub fn answer_all(&self) {
        for q in self.engine.snapshot().quiz_questions {
            self.engine.answer(q.id, valid_answer(&q)).unwrap();
        }
    }
}
