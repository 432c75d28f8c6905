//! crates/drishti_core/src/validation.rs
//!
//! Answer rules for each question type.

use crate::domain::{AnswerValue, Question, QuestionId, QuestionKind, QuizAnswers};

/// Why a single answer is not acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerProblem {
    Missing,
    Blank,
    NotAnOption,
    OutOfRange { min: i64, max: i64 },
    WrongType { expected: &'static str },
}

impl std::fmt::Display for AnswerProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerProblem::Missing => write!(f, "no answer given"),
            AnswerProblem::Blank => write!(f, "answer is blank"),
            AnswerProblem::NotAnOption => write!(f, "answer is not one of the offered options"),
            AnswerProblem::OutOfRange { min, max } => {
                write!(f, "answer must be between {} and {}", min, max)
            }
            AnswerProblem::WrongType { expected } => write!(f, "expected a {} answer", expected),
        }
    }
}

/// Checks one answer against its question. A scale question only counts as answered
/// once a value has been explicitly recorded; the control's resting position does not.
pub fn check_answer(question: &Question, answer: Option<&AnswerValue>) -> Result<(), AnswerProblem> {
    let Some(answer) = answer else {
        return Err(AnswerProblem::Missing);
    };

    match (&question.kind, answer) {
        (QuestionKind::Text { .. }, AnswerValue::Text(text)) => {
            if text.trim().is_empty() {
                Err(AnswerProblem::Blank)
            } else {
                Ok(())
            }
        }
        (QuestionKind::Text { .. }, AnswerValue::Number(_)) => {
            Err(AnswerProblem::WrongType { expected: "text" })
        }
        (
            QuestionKind::MultipleChoice { options } | QuestionKind::Emoji { options },
            AnswerValue::Text(choice),
        ) => {
            if options.iter().any(|o| o == choice) {
                Ok(())
            } else {
                Err(AnswerProblem::NotAnOption)
            }
        }
        (QuestionKind::MultipleChoice { .. } | QuestionKind::Emoji { .. }, AnswerValue::Number(_)) => {
            Err(AnswerProblem::NotAnOption)
        }
        (QuestionKind::Scale { min, max, .. }, AnswerValue::Number(n)) => {
            if (*min..=*max).contains(n) {
                Ok(())
            } else {
                Err(AnswerProblem::OutOfRange {
                    min: *min,
                    max: *max,
                })
            }
        }
        (QuestionKind::Scale { min, max, .. }, AnswerValue::Text(text)) => {
            // Stored answers come back as text; accept them when they parse into range.
            match text.trim().parse::<i64>() {
                Ok(n) if (*min..=*max).contains(&n) => Ok(()),
                Ok(_) => Err(AnswerProblem::OutOfRange {
                    min: *min,
                    max: *max,
                }),
                Err(_) => Err(AnswerProblem::WrongType { expected: "number" }),
            }
        }
    }
}

/// Every question whose answer is missing or invalid, in quiz order.
pub fn problems(questions: &[Question], answers: &QuizAnswers) -> Vec<(QuestionId, AnswerProblem)> {
    questions
        .iter()
        .filter_map(|q| {
            check_answer(q, answers.get(&q.id))
                .err()
                .map(|problem| (q.id, problem))
        })
        .collect()
}

pub fn is_complete(questions: &[Question], answers: &QuizAnswers) -> bool {
    problems(questions, answers).is_empty()
}
