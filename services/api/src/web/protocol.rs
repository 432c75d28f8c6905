//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between a UI and the workflow engine the
//! server keeps for that connection.

use drishti_core::domain::{AnswerValue, ChatTurn, QuestionId, SessionId};
use drishti_core::ports::ErrorKind;
use drishti_core::workflow::{ContinuationRequest, WorkflowState};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
/// Every message is answered with a `State` message or an `Error`.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replaces the free-text input while in the input stage.
    SetInput { text: String },

    /// Creates the session and fetches its quiz.
    Submit,

    /// Records or replaces the answer to one question.
    Answer {
        question_id: QuestionId,
        value: AnswerValue,
    },

    /// Submits the answers and asks for perspective cards.
    Complete,

    Back,

    Reset,

    SaveToJournal,

    FlipCard { index: usize },

    /// Continues a stored session that is still in the understanding stage.
    Resume { session_id: SessionId },

    /// Continues with a payload the client already holds (e.g. from the history screen).
    Continue { request: ContinuationRequest },

    /// Opens the follow-up chat for the current session and replays its history.
    OpenChat,

    /// Sends a follow-up message about the current session's cards.
    Chat { message: String },

    /// Asks for the current state without changing anything.
    Sync,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The engine's state after an action.
    State { state: WorkflowState },

    /// Reports a rejected or failed action. The engine state is unchanged.
    Error {
        kind: ErrorKind,
        message: String,
        retryable: bool,
    },

    JournalSaved { bonus_points: u32 },

    /// The full chat thread, sent whenever it changes.
    Chat { turns: Vec<ChatTurn> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn answers_accept_numbers_and_text() {
        let id = Uuid::new_v4();
        let scale: ClientMessage =
            serde_json::from_value(json!({"type": "answer", "question_id": id, "value": 4}))
                .unwrap();
        assert!(matches!(
            scale,
            ClientMessage::Answer { value: AnswerValue::Number(4), .. }
        ));

        let text: ClientMessage =
            serde_json::from_value(json!({"type": "answer", "question_id": id, "value": "Tired"}))
                .unwrap();
        assert!(matches!(text, ClientMessage::Answer { value: AnswerValue::Text(t), .. } if t == "Tired"));
    }

    #[test]
    fn errors_serialize_with_their_kind() {
        let msg = ServerMessage::Error {
            kind: ErrorKind::OracleUnavailable,
            message: "try again".into(),
            retryable: true,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "error", "kind": "oracle_unavailable", "message": "try again", "retryable": true})
        );
    }

    #[test]
    fn unit_messages_need_only_a_type() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type": "save_to_journal"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SaveToJournal));
    }
}
