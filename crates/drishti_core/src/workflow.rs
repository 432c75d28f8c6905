//! crates/drishti_core/src/workflow.rs
//!
//! The perspective workflow engine: a three-stage state machine
//! (`input` -> `understanding` -> `solution`) that sequences calls to a
//! `PerspectiveApi` and guards every stage exit.
//!
//! The engine is owned by whoever drives the flow (a WebSocket connection, a test,
//! a terminal client). Its methods take `&self` so that several surfaces can share
//! it; network-bound transitions are serialized by a single in-flight slot and a
//! second trigger while one is outstanding is rejected with `WorkflowError::Busy`.

use crate::chat::ChatThread;
use crate::domain::{
    AnswerValue, PerspectiveCard, Question, QuestionId, QuizAnswers, SessionDetail, SessionId,
    SessionStatus, SubmittedAnswer,
};
use crate::ports::{ChatHistoryStore, ErrorKind, PerspectiveApi, PortError, PortResult};
use crate::validation::{self, AnswerProblem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

//=========================================================================================
// Stages, Actions and Errors
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Input,
    Understanding,
    Solution,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Understanding => "understanding",
            Stage::Solution => "solution",
        };
        f.write_str(name)
    }
}

/// The user-triggered operations of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Answer,
    Complete,
    SaveToJournal,
    Resume,
    Back,
    Reset,
    Chat,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Submit => "submit",
            Action::Answer => "answer",
            Action::Complete => "complete",
            Action::SaveToJournal => "save to journal",
            Action::Resume => "resume",
            Action::Back => "go back",
            Action::Reset => "start over",
            Action::Chat => "chat",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("Please share what's on your mind first")]
    EmptyInput,
    #[error("Cannot {action} during the {stage} stage")]
    WrongStage { action: Action, stage: Stage },
    #[error("Please answer every question ({} remaining)", .0.len())]
    Unanswered(Vec<QuestionId>),
    #[error("Question {question_id}: {problem}")]
    InvalidAnswer {
        question_id: QuestionId,
        problem: AnswerProblem,
    },
    #[error("Question {0} is not part of this session")]
    UnknownQuestion(QuestionId),
    #[error("Answers are locked once perspectives are generated")]
    AnswersLocked,
    #[error("Already saved to your journal")]
    AlreadySaved,
    #[error("Still working on the previous request ({0})")]
    Busy(Action),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Port(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Port(e) => e.is_retryable(),
            WorkflowError::Busy(_) => true,
            _ => false,
        }
    }
}

//=========================================================================================
// Engine State
//=========================================================================================

/// The engine's working memory. Only the session fields are ever persisted, and
/// that happens through the `PerspectiveApi`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub stage: Stage,
    pub session_id: Option<SessionId>,
    pub user_input: String,
    pub quiz_questions: Vec<Question>,
    pub quiz_answers: QuizAnswers,
    pub cards: Vec<PerspectiveCard>,
    pub points_earned: u32,
    pub saved_to_journal: bool,
    pub flipped_cards: BTreeSet<usize>,
    /// The action currently waiting on the network, if any.
    pub busy: Option<Action>,
    /// The last surfaced failure, cleared when the next action starts.
    pub error: Option<String>,
}

/// One-shot payload that re-enters `understanding` for a session started earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationRequest {
    pub session_id: SessionId,
    pub user_input: String,
    pub quiz_questions: Vec<Question>,
    pub quiz_answers: QuizAnswers,
}

impl TryFrom<SessionDetail> for ContinuationRequest {
    type Error = PortError;

    fn try_from(detail: SessionDetail) -> PortResult<Self> {
        if detail.status != SessionStatus::Understanding {
            return Err(PortError::Validation(format!(
                "Only sessions in the understanding stage can be continued (session {} is {})",
                detail.id, detail.status
            )));
        }
        Ok(Self {
            session_id: detail.id,
            user_input: detail.user_input,
            quiz_questions: detail.quizzes,
            quiz_answers: detail.quiz_answers,
        })
    }
}

/// A stage change (or the lack of one) caused by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOutcome {
    Saved { bonus_points: u32 },
    /// There was no session to save. Kept as a result rather than an error.
    NoEffect,
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Upper bound for every individual collaborator call.
    pub call_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// A session that exists in the store but has no quiz yet, kept so a retry of
/// `submit` with the same input does not create a second session.
#[derive(Debug, Clone)]
struct PendingQuiz {
    session_id: SessionId,
    user_input: String,
}

#[derive(Default)]
struct Inner {
    state: WorkflowState,
    /// The input the current `session_id` was created with.
    committed_input: Option<String>,
    pending_quiz: Option<PendingQuiz>,
    /// Answers the store has confirmed for the current session. A retried `complete`
    /// with the same answers goes straight to card generation.
    stored_answers: Option<Vec<SubmittedAnswer>>,
    continuation: Option<ContinuationRequest>,
    in_flight: Option<Action>,
}

impl Inner {
    fn reject(&mut self, err: WorkflowError) -> WorkflowError {
        if !matches!(err, WorkflowError::Busy(_)) {
            self.state.error = Some(err.to_string());
        }
        err
    }
}

/// Clears the in-flight slot when the awaiting action finishes or is dropped.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.inner).in_flight = None;
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

//=========================================================================================
// The Engine
//=========================================================================================

pub struct WorkflowEngine {
    api: Arc<dyn PerspectiveApi>,
    user_id: Uuid,
    config: WorkflowConfig,
    inner: Mutex<Inner>,
}

impl WorkflowEngine {
    pub fn new(api: Arc<dyn PerspectiveApi>, user_id: Uuid, config: WorkflowConfig) -> Self {
        Self {
            api,
            user_id,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// A copy of the current state, suitable for rendering.
    pub fn snapshot(&self) -> WorkflowState {
        let inner = lock(&self.inner);
        let mut state = inner.state.clone();
        state.busy = inner.in_flight;
        state
    }

    pub fn stage(&self) -> Stage {
        lock(&self.inner).state.stage
    }

    fn begin<'a>(&'a self, inner: &mut Inner, action: Action) -> Result<InFlight<'a>, WorkflowError> {
        if let Some(current) = inner.in_flight {
            return Err(WorkflowError::Busy(current));
        }
        inner.in_flight = Some(action);
        inner.state.error = None;
        Ok(InFlight { inner: &self.inner })
    }

    fn fail(&self, action: Action, err: impl Into<WorkflowError>) -> WorkflowError {
        let err = err.into();
        warn!("Perspective {} failed for user {}: {}", action, self.user_id, err);
        lock(&self.inner).reject(err)
    }

    /// Runs one collaborator call under the configured timeout. A timeout is reported
    /// with the same error as any other failure of that collaborator.
    async fn bounded<T>(
        &self,
        what: &str,
        call: impl Future<Output = PortResult<T>>,
        on_timeout: fn(String) -> PortError,
    ) -> PortResult<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!(
                "{} timed out after {:?}",
                what, self.config.call_timeout
            ))),
        }
    }

    /// Edits the free-text input. Only meaningful before the session is submitted.
    pub fn set_input(&self, text: impl Into<String>) -> Result<(), WorkflowError> {
        let mut inner = lock(&self.inner);
        if inner.state.stage != Stage::Input {
            let stage = inner.state.stage;
            return Err(inner.reject(WorkflowError::WrongStage {
                action: Action::Submit,
                stage,
            }));
        }
        inner.state.user_input = text.into();
        Ok(())
    }

    /// `input -> understanding`: creates the session and fetches its quiz.
    ///
    /// If quiz generation fails after the session was created, the engine stays in
    /// `input` and a retry with the same text only asks for the quiz again.
    pub async fn submit(&self) -> Result<Transition, WorkflowError> {
        let (input, reuse, _guard) = {
            let mut inner = lock(&self.inner);
            if inner.state.stage != Stage::Input {
                let stage = inner.state.stage;
                return Err(inner.reject(WorkflowError::WrongStage {
                    action: Action::Submit,
                    stage,
                }));
            }
            let input = inner.state.user_input.trim().to_string();
            if input.is_empty() {
                return Err(inner.reject(WorkflowError::EmptyInput));
            }

            // Came back from `understanding` without changing anything: the quiz is known.
            if inner.state.session_id.is_some()
                && !inner.state.quiz_questions.is_empty()
                && inner.committed_input.as_deref() == Some(input.as_str())
            {
                if let Some(current) = inner.in_flight {
                    return Err(WorkflowError::Busy(current));
                }
                inner.state.error = None;
                inner.state.stage = Stage::Understanding;
                return Ok(Transition {
                    from: Stage::Input,
                    to: Stage::Understanding,
                });
            }

            let reuse = inner
                .pending_quiz
                .as_ref()
                .filter(|p| p.user_input == input)
                .map(|p| p.session_id);
            let guard = self.begin(&mut inner, Action::Submit)?;
            (input, reuse, guard)
        };

        let session_id = match reuse {
            Some(session_id) => {
                info!("Retrying quiz generation for session {}", session_id);
                session_id
            }
            None => {
                let session_id = self
                    .bounded(
                        "create session",
                        self.api.create_session(self.user_id, &input),
                        PortError::StoreUnavailable,
                    )
                    .await
                    .map_err(|e| self.fail(Action::Submit, e))?;
                lock(&self.inner).pending_quiz = Some(PendingQuiz {
                    session_id,
                    user_input: input.clone(),
                });
                session_id
            }
        };

        let questions = self
            .bounded(
                "generate quiz",
                self.api.generate_quiz(self.user_id, session_id, &input),
                PortError::OracleUnavailable,
            )
            .await
            .map_err(|e| self.fail(Action::Submit, e))?;
        if questions.is_empty() {
            return Err(self.fail(
                Action::Submit,
                PortError::OracleMalformedResponse("no questions were generated".to_string()),
            ));
        }

        let mut inner = lock(&self.inner);
        inner.state = WorkflowState {
            stage: Stage::Understanding,
            session_id: Some(session_id),
            user_input: input.clone(),
            quiz_questions: questions,
            ..WorkflowState::default()
        };
        inner.committed_input = Some(input);
        inner.pending_quiz = None;
        inner.stored_answers = None;
        inner.continuation = None;
        info!(
            "Session {} entered understanding with {} questions",
            session_id,
            inner.state.quiz_questions.len()
        );
        Ok(Transition {
            from: Stage::Input,
            to: Stage::Understanding,
        })
    }

    /// Records an answer, replacing any earlier answer to the same question.
    pub fn answer(
        &self,
        question_id: QuestionId,
        value: impl Into<AnswerValue>,
    ) -> Result<(), WorkflowError> {
        let mut inner = lock(&self.inner);
        if inner.state.stage != Stage::Understanding {
            let stage = inner.state.stage;
            return Err(inner.reject(WorkflowError::WrongStage {
                action: Action::Answer,
                stage,
            }));
        }
        if !inner.state.cards.is_empty() {
            return Err(inner.reject(WorkflowError::AnswersLocked));
        }
        // The answers in flight are the ones the cards will be generated from.
        if inner.in_flight == Some(Action::Complete) {
            return Err(WorkflowError::Busy(Action::Complete));
        }
        if !inner.state.quiz_questions.iter().any(|q| q.id == question_id) {
            return Err(inner.reject(WorkflowError::UnknownQuestion(question_id)));
        }
        inner.state.quiz_answers.insert(question_id, value.into());
        Ok(())
    }

    /// Questions still lacking a valid answer, in quiz order.
    pub fn unanswered(&self) -> Vec<QuestionId> {
        let inner = lock(&self.inner);
        validation::problems(&inner.state.quiz_questions, &inner.state.quiz_answers)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub fn can_complete(&self) -> bool {
        let inner = lock(&self.inner);
        inner.state.stage == Stage::Understanding
            && validation::is_complete(&inner.state.quiz_questions, &inner.state.quiz_answers)
    }

    /// `understanding -> solution`: submits the answers, then asks for cards.
    ///
    /// Answers are written before cards are requested because card generation reads
    /// them. Any failure leaves the engine in `understanding` and the whole step can
    /// be retried.
    pub async fn complete(&self) -> Result<Transition, WorkflowError> {
        let (session_id, answers, already_stored, _guard) = {
            let mut inner = lock(&self.inner);
            if inner.state.stage != Stage::Understanding {
                let stage = inner.state.stage;
                return Err(inner.reject(WorkflowError::WrongStage {
                    action: Action::Complete,
                    stage,
                }));
            }
            if let Some(current) = inner.in_flight {
                return Err(WorkflowError::Busy(current));
            }
            if !inner.state.cards.is_empty() {
                inner.state.error = None;
                inner.state.stage = Stage::Solution;
                return Ok(Transition {
                    from: Stage::Understanding,
                    to: Stage::Solution,
                });
            }

            let problems =
                validation::problems(&inner.state.quiz_questions, &inner.state.quiz_answers);
            let missing: Vec<QuestionId> = problems
                .iter()
                .filter(|(_, p)| *p == AnswerProblem::Missing)
                .map(|(id, _)| *id)
                .collect();
            if !missing.is_empty() {
                return Err(inner.reject(WorkflowError::Unanswered(missing)));
            }
            if let Some((question_id, problem)) = problems.into_iter().next() {
                return Err(inner.reject(WorkflowError::InvalidAnswer {
                    question_id,
                    problem,
                }));
            }
            let Some(session_id) = inner.state.session_id else {
                return Err(inner.reject(WorkflowError::Port(PortError::Validation(
                    "There is no session to complete".to_string(),
                ))));
            };

            let answers: Vec<SubmittedAnswer> = inner
                .state
                .quiz_questions
                .iter()
                .filter_map(|q| {
                    inner.state.quiz_answers.get(&q.id).map(|value| SubmittedAnswer {
                        question_id: q.id,
                        value: value.clone(),
                    })
                })
                .collect();
            let already_stored = inner.stored_answers.as_ref() == Some(&answers);
            let guard = self.begin(&mut inner, Action::Complete)?;
            (session_id, answers, already_stored, guard)
        };

        if already_stored {
            info!("Answers for session {} already stored, requesting cards", session_id);
        } else {
            self.bounded(
                "submit answers",
                self.api.submit_answers(self.user_id, session_id, &answers),
                PortError::StoreUnavailable,
            )
            .await
            .map_err(|e| self.fail(Action::Complete, e))?;
            lock(&self.inner).stored_answers = Some(answers);
        }

        let outcome = self
            .bounded(
                "generate cards",
                self.api.generate_cards(self.user_id, session_id),
                PortError::OracleUnavailable,
            )
            .await
            .map_err(|e| self.fail(Action::Complete, e))?;
        if outcome.cards.is_empty() {
            return Err(self.fail(
                Action::Complete,
                PortError::OracleMalformedResponse("no cards were generated".to_string()),
            ));
        }

        let mut inner = lock(&self.inner);
        inner.state.cards = outcome.cards;
        inner.state.points_earned = outcome.points_earned;
        inner.state.flipped_cards.clear();
        inner.state.stage = Stage::Solution;
        info!(
            "Session {} reached solution with {} cards",
            session_id,
            inner.state.cards.len()
        );
        Ok(Transition {
            from: Stage::Understanding,
            to: Stage::Solution,
        })
    }

    /// Saves the session's cards to the journal and adds the bonus to `points_earned`.
    pub async fn save_to_journal(&self) -> Result<JournalOutcome, WorkflowError> {
        let (session_id, _guard) = {
            let mut inner = lock(&self.inner);
            if inner.state.stage != Stage::Solution {
                let stage = inner.state.stage;
                return Err(inner.reject(WorkflowError::WrongStage {
                    action: Action::SaveToJournal,
                    stage,
                }));
            }
            let Some(session_id) = inner.state.session_id else {
                return Ok(JournalOutcome::NoEffect);
            };
            if inner.state.saved_to_journal {
                return Err(inner.reject(WorkflowError::AlreadySaved));
            }
            let guard = self.begin(&mut inner, Action::SaveToJournal)?;
            (session_id, guard)
        };

        let bonus_points = self
            .bounded(
                "save to journal",
                self.api.save_to_journal(self.user_id, session_id),
                PortError::StoreUnavailable,
            )
            .await
            .map_err(|e| self.fail(Action::SaveToJournal, e))?;

        let mut inner = lock(&self.inner);
        inner.state.points_earned += bonus_points;
        inner.state.saved_to_journal = true;
        info!("Session {} saved to journal (+{} points)", session_id, bonus_points);
        Ok(JournalOutcome::Saved { bonus_points })
    }

    /// Steps to the previous stage, keeping everything collected so far.
    pub fn back(&self) -> Result<Transition, WorkflowError> {
        let mut inner = lock(&self.inner);
        if let Some(current) = inner.in_flight {
            return Err(WorkflowError::Busy(current));
        }
        let from = inner.state.stage;
        let to = match from {
            Stage::Solution => Stage::Understanding,
            Stage::Understanding | Stage::Input => Stage::Input,
        };
        inner.state.stage = to;
        inner.state.error = None;
        Ok(Transition { from, to })
    }

    /// Forgets the current session entirely and returns to `input`.
    pub fn reset(&self) -> Result<Transition, WorkflowError> {
        let mut inner = lock(&self.inner);
        if let Some(current) = inner.in_flight {
            return Err(WorkflowError::Busy(current));
        }
        let from = inner.state.stage;
        *inner = Inner::default();
        info!("Perspective workflow reset for user {}", self.user_id);
        Ok(Transition {
            from,
            to: Stage::Input,
        })
    }

    /// Flips a result card. Returns whether the card is now flipped; out-of-range
    /// indexes and other stages are ignored.
    pub fn toggle_card(&self, index: usize) -> bool {
        let mut inner = lock(&self.inner);
        if inner.state.stage != Stage::Solution || index >= inner.state.cards.len() {
            return false;
        }
        let flipped = &mut inner.state.flipped_cards;
        if flipped.remove(&index) {
            false
        } else {
            flipped.insert(index);
            true
        }
    }

    //=====================================================================================
    // Resumption
    //=====================================================================================

    /// Queues a continuation to be applied by the next `apply_continuation` call.
    pub fn offer_continuation(&self, request: ContinuationRequest) {
        lock(&self.inner).continuation = Some(request);
    }

    /// Applies the queued continuation, if any, consuming it. Calling this again
    /// without a new offer does nothing.
    pub fn apply_continuation(&self) -> Result<Option<Transition>, WorkflowError> {
        let mut inner = lock(&self.inner);
        if let Some(current) = inner.in_flight {
            return Err(WorkflowError::Busy(current));
        }
        let Some(request) = inner.continuation.take() else {
            return Ok(None);
        };
        Self::enter_continuation(&mut inner, request).map(Some)
    }

    /// Offers and applies a continuation in one step.
    pub fn resume(&self, request: ContinuationRequest) -> Result<Transition, WorkflowError> {
        self.offer_continuation(request);
        self.apply_continuation()?
            .ok_or_else(|| WorkflowError::Port(PortError::Validation("Nothing to resume".into())))
    }

    /// Loads an in-progress session from the store and continues it.
    pub async fn resume_session(&self, session_id: SessionId) -> Result<Transition, WorkflowError> {
        let _guard = self.begin(&mut lock(&self.inner), Action::Resume)?;

        let detail = self
            .bounded(
                "fetch session",
                self.api.fetch_session_detail(self.user_id, session_id),
                PortError::StoreUnavailable,
            )
            .await
            .map_err(|e| self.fail(Action::Resume, e))?;
        let request =
            ContinuationRequest::try_from(detail).map_err(|e| self.fail(Action::Resume, e))?;

        let mut inner = lock(&self.inner);
        inner.continuation = None;
        Self::enter_continuation(&mut inner, request)
    }

    fn enter_continuation(
        inner: &mut Inner,
        request: ContinuationRequest,
    ) -> Result<Transition, WorkflowError> {
        if request.quiz_questions.is_empty() {
            return Err(inner.reject(WorkflowError::Port(PortError::Validation(format!(
                "Session {} has no questions to continue with",
                request.session_id
            )))));
        }
        let from = inner.state.stage;
        let quiz_answers = request
            .quiz_answers
            .into_iter()
            .filter(|(id, _)| request.quiz_questions.iter().any(|q| q.id == *id))
            .collect();
        inner.state = WorkflowState {
            stage: Stage::Understanding,
            session_id: Some(request.session_id),
            user_input: request.user_input.clone(),
            quiz_questions: request.quiz_questions,
            quiz_answers,
            ..WorkflowState::default()
        };
        inner.committed_input = Some(request.user_input);
        inner.pending_quiz = None;
        inner.stored_answers = None;
        info!("Resumed session {} in understanding", request.session_id);
        Ok(Transition {
            from,
            to: Stage::Understanding,
        })
    }

    //=====================================================================================
    // Chat
    //=====================================================================================

    /// Opens the follow-up chat for the current session. Requires the `solution` stage.
    pub async fn open_chat(
        &self,
        history: Arc<dyn ChatHistoryStore>,
    ) -> Result<ChatThread, WorkflowError> {
        let session_id = {
            let mut inner = lock(&self.inner);
            let session_id = inner.state.session_id;
            match session_id {
                Some(id) if inner.state.stage == Stage::Solution && !inner.state.cards.is_empty() => {
                    id
                }
                _ => {
                    let stage = inner.state.stage;
                    return Err(inner.reject(WorkflowError::WrongStage {
                        action: Action::Chat,
                        stage,
                    }));
                }
            }
        };
        Ok(ChatThread::open(
            self.api.clone(),
            history,
            self.user_id,
            session_id,
            self.config.call_timeout,
        )
        .await)
    }
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("user_id", &self.user_id)
            .field("state", &self.snapshot())
            .finish()
    }
}
