pub mod chat;
pub mod domain;
pub mod journal;
pub mod memory;
pub mod ports;
pub mod service;
pub mod validation;
pub mod workflow;

pub use chat::ChatThread;
pub use domain::{
    AnswerValue, CardType, CardsOutcome, ChatRole, ChatTurn, JournalEntry, PerspectiveCard,
    Question, QuestionDraft, QuestionId, QuestionKind, QuizAnswers, ReflectionSession,
    SessionDetail, SessionId, SessionPage, SessionQuery, SessionStatus, SessionSummary,
    SubmittedAnswer,
};
pub use ports::{
    ChatContext, ChatHistoryStore, ErrorKind, PerspectiveApi, PerspectiveOracle, PortError,
    PortResult, ReflectionContext, SessionStore,
};
pub use service::PerspectiveService;
pub use workflow::{
    Action, ContinuationRequest, JournalOutcome, Stage, Transition, WorkflowConfig,
    WorkflowEngine, WorkflowError, WorkflowState,
};
