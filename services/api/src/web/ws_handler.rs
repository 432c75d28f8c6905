//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection owns one `WorkflowEngine`; client messages drive it and every
//! action is answered with the resulting state.
//!
//! Actions that wait on the network run as separate tasks so the loop keeps
//! reading. A second network action sent meanwhile is rejected by the engine as
//! busy. When the client disconnects, outstanding actions are cancelled.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use drishti_core::workflow::{JournalOutcome, WorkflowEngine, WorkflowError};
use drishti_core::{ChatThread, ErrorKind, PortError};
use futures::{Sink, SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where outgoing messages go: the socket's send half, shared by every task of the
/// connection.
pub trait Outgoing: Sink<Message> + Unpin + Send + 'static {}

impl<S> Outgoing for S where S: Sink<Message> + Unpin + Send + 'static {}

type WsSender<S> = Arc<Mutex<S>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender<_> = Arc::new(Mutex::new(sender));
    let connection = ConnectionState::new(&app_state, user_id);

    send_state(&ws_sender, &connection.engine).await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_text_message(text.as_str(), &app_state, &connection, &ws_sender).await;
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    // --- Cleanup ---
    connection.cancellation_token.cancel();
    info!("WebSocket connection closed for user: {}", connection.user_id);
}

//=========================================================================================
// Message Dispatch
//=========================================================================================

async fn handle_text_message<S: Outgoing>(
    text: &str,
    app_state: &Arc<AppState>,
    connection: &ConnectionState,
    ws_sender: &WsSender<S>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            send(
                ws_sender,
                &ServerMessage::Error {
                    kind: ErrorKind::Validation,
                    message: format!("Unrecognized message: {}", e),
                    retryable: false,
                },
            )
            .await;
            return;
        }
    };
    debug!("Received {:?} from user {}", client_msg, connection.user_id);

    let engine = &connection.engine;
    match client_msg {
        // --- Local actions, answered immediately ---
        ClientMessage::SetInput { text } => {
            reply(ws_sender, engine, engine.set_input(text)).await;
        }
        ClientMessage::Answer { question_id, value } => {
            reply(ws_sender, engine, engine.answer(question_id, value)).await;
        }
        ClientMessage::Back => {
            reply(ws_sender, engine, engine.back().map(drop)).await;
        }
        ClientMessage::Reset => {
            reply(ws_sender, engine, engine.reset().map(drop)).await;
        }
        ClientMessage::FlipCard { index } => {
            engine.toggle_card(index);
            send_state(ws_sender, engine).await;
        }
        ClientMessage::Continue { request } => {
            reply(ws_sender, engine, engine.resume(request).map(drop)).await;
        }
        ClientMessage::Sync => {
            send_state(ws_sender, engine).await;
        }

        // --- Network actions, run in the background ---
        ClientMessage::Submit => {
            let (engine, sender) = (engine.clone(), ws_sender.clone());
            spawn_action(connection, async move {
                let result = engine.submit().await.map(drop);
                reply(&sender, &engine, result).await;
            });
        }
        ClientMessage::Complete => {
            let (engine, sender) = (engine.clone(), ws_sender.clone());
            spawn_action(connection, async move {
                let result = engine.complete().await.map(drop);
                reply(&sender, &engine, result).await;
            });
        }
        ClientMessage::Resume { session_id } => {
            let (engine, sender) = (engine.clone(), ws_sender.clone());
            spawn_action(connection, async move {
                let result = engine.resume_session(session_id).await.map(drop);
                reply(&sender, &engine, result).await;
            });
        }
        ClientMessage::SaveToJournal => {
            let (engine, sender) = (engine.clone(), ws_sender.clone());
            spawn_action(connection, async move {
                match engine.save_to_journal().await {
                    Ok(JournalOutcome::Saved { bonus_points }) => {
                        send(&sender, &ServerMessage::JournalSaved { bonus_points }).await;
                        send_state(&sender, &engine).await;
                    }
                    Ok(JournalOutcome::NoEffect) => send_state(&sender, &engine).await,
                    Err(e) => reply(&sender, &engine, Err(e)).await,
                }
            });
        }
        ClientMessage::OpenChat => {
            let (sender, app_state) = (ws_sender.clone(), app_state.clone());
            let (engine, chat) = (engine.clone(), connection.chat.clone());
            spawn_action(connection, async move {
                let mut chat = chat.lock().await;
                match ensure_chat(&mut chat, &engine, &app_state).await {
                    Ok(thread) => {
                        let turns = thread.turns().to_vec();
                        send(&sender, &ServerMessage::Chat { turns }).await;
                    }
                    Err(e) => send_error(&sender, &e).await,
                }
            });
        }
        ClientMessage::Chat { message } => {
            let (sender, app_state) = (ws_sender.clone(), app_state.clone());
            let (engine, chat) = (engine.clone(), connection.chat.clone());
            spawn_action(connection, async move {
                let mut chat = chat.lock().await;
                let thread = match ensure_chat(&mut chat, &engine, &app_state).await {
                    Ok(thread) => thread,
                    Err(e) => return send_error(&sender, &e).await,
                };
                let result = thread.send(&message).await.map(drop);
                let turns = thread.turns().to_vec();
                send(&sender, &ServerMessage::Chat { turns }).await;
                if let Err(e) = result {
                    send_error(&sender, &WorkflowError::from(e)).await;
                }
            });
        }
    }
}

/// Returns the chat thread for the engine's current session, opening it if the
/// connection has none yet or the session changed since it was opened.
async fn ensure_chat<'a>(
    slot: &'a mut Option<ChatThread>,
    engine: &WorkflowEngine,
    app_state: &AppState,
) -> Result<&'a mut ChatThread, WorkflowError> {
    let current = engine.snapshot().session_id;
    let stale = slot.as_ref().map(|t| Some(t.session_id())) != Some(current);
    if stale {
        let thread = engine.open_chat(app_state.chat_history.clone()).await?;
        *slot = Some(thread);
    }
    slot.as_mut().ok_or_else(|| {
        WorkflowError::Port(PortError::Validation(
            "No chat is open".to_string(),
        ))
    })
}

/// Runs a network-bound action until it finishes or the connection closes.
fn spawn_action<F>(connection: &ConnectionState, action: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = connection.cancellation_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => debug!("Connection closed; abandoning the action in flight."),
            _ = action => {}
        }
    });
}

//=========================================================================================
// Outgoing Messages
//=========================================================================================

async fn send<S: Outgoing>(ws_sender: &WsSender<S>, msg: &ServerMessage) {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return;
        }
    };
    if ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_err()
    {
        warn!("Failed to send message; the client is gone.");
    }
}

async fn send_state<S: Outgoing>(ws_sender: &WsSender<S>, engine: &WorkflowEngine) {
    let state = engine.snapshot();
    send(ws_sender, &ServerMessage::State { state }).await;
}

async fn send_error<S: Outgoing>(ws_sender: &WsSender<S>, err: &WorkflowError) {
    send(
        ws_sender,
        &ServerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        },
    )
    .await;
}

/// Reports the outcome of an action: the error first, if any, then the state.
async fn reply<S: Outgoing>(
    ws_sender: &WsSender<S>,
    engine: &WorkflowEngine,
    result: Result<(), WorkflowError>,
) {
    if let Err(e) = result {
        send_error(ws_sender, &e).await;
    }
    send_state(ws_sender, engine).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use drishti_core::memory::{InMemoryChatStore, InMemorySessionStore};
    use drishti_core::{
        CardType, ChatContext, ChatTurn, PerspectiveCard, PerspectiveOracle, PerspectiveService,
        PortResult, QuestionDraft, QuestionKind, ReflectionContext,
    };
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct CannedOracle;

    #[async_trait]
    impl PerspectiveOracle for CannedOracle {
        async fn generate_quiz(&self, _user_input: &str) -> PortResult<Vec<QuestionDraft>> {
            Ok(vec![
                QuestionDraft {
                    prompt: "What happened?".into(),
                    kind: QuestionKind::Text { placeholder: None },
                },
                QuestionDraft {
                    prompt: "How heavy does it feel?".into(),
                    kind: QuestionKind::Scale {
                        min: 1,
                        max: 5,
                        min_label: None,
                        max_label: None,
                    },
                },
            ])
        }

        async fn generate_cards(&self, _context: &ReflectionContext) -> PortResult<Vec<PerspectiveCard>> {
            Ok(vec![PerspectiveCard {
                title: "Step back".into(),
                content: "One bad day is one bad day.".into(),
                card_type: CardType::Growth,
            }])
        }

        async fn chat_reply(
            &self,
            _context: &ChatContext,
            _history: &[ChatTurn],
            message: &str,
        ) -> PortResult<String> {
            Ok(format!("You asked: {}", message))
        }
    }

    struct Client {
        app_state: Arc<AppState>,
        connection: ConnectionState,
        outbox: WsSender<UnboundedSender<Message>>,
        inbox: UnboundedReceiver<Message>,
    }

    impl Client {
        fn new() -> Self {
            let config = Config::from_lookup(|key| match key {
                "DATABASE_URL" => Some("postgres://localhost/drishti_test".to_string()),
                _ => None,
            })
            .unwrap();
            let app_state = Arc::new(AppState {
                perspective: Arc::new(PerspectiveService::new(
                    Arc::new(InMemorySessionStore::new()),
                    Arc::new(CannedOracle),
                )),
                chat_history: Arc::new(InMemoryChatStore::new()),
                config: Arc::new(config),
            });
            let connection = ConnectionState::new(&app_state, Uuid::new_v4());
            let (tx, rx) = unbounded();
            Self {
                app_state,
                connection,
                outbox: Arc::new(Mutex::new(tx)),
                inbox: rx,
            }
        }

        async fn send(&self, msg: Value) {
            handle_text_message(&msg.to_string(), &self.app_state, &self.connection, &self.outbox)
                .await;
        }

        async fn next(&mut self) -> Value {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.inbox.next())
                .await
                .expect("no message within 5s")
                .expect("outbox closed");
            match msg {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            }
        }

        /// Skips messages until a state in `stage` arrives.
        async fn state_in(&mut self, stage: &str) -> Value {
            loop {
                let msg = self.next().await;
                if msg["type"] == "error" {
                    panic!("unexpected error: {}", msg);
                }
                if msg["type"] == "state" && msg["state"]["stage"] == stage {
                    return msg["state"].clone();
                }
            }
        }

        async fn reach_solution(&mut self, input: &str) {
            self.send(json!({ "type": "set_input", "text": input })).await;
            self.state_in("input").await;
            self.send(json!({ "type": "submit" })).await;
            let state = self.state_in("understanding").await;
            for q in state["quizQuestions"].as_array().unwrap() {
                let value = if q["type"] == "scale" { json!(4) } else { json!("A rough week") };
                self.send(json!({ "type": "answer", "question_id": q["id"], "value": value }))
                    .await;
                self.state_in("understanding").await;
            }
            self.send(json!({ "type": "complete" })).await;
            self.state_in("solution").await;
        }
    }

    #[tokio::test]
    async fn rejected_actions_send_the_error_before_the_state() {
        let mut client = Client::new();

        client.send(json!({ "type": "complete" })).await;

        let first = client.next().await;
        assert_eq!(first["type"], "error");
        assert_eq!(first["kind"], "validation");
        assert_eq!(first["retryable"], false);
        let second = client.next().await;
        assert_eq!(second["type"], "state");
        assert_eq!(second["state"]["stage"], "input");
    }

    #[tokio::test]
    async fn unknown_messages_are_reported() {
        let mut client = Client::new();

        client.send(json!({ "type": "dance" })).await;

        let msg = client.next().await;
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["kind"], "validation");
    }

    #[tokio::test]
    async fn spawned_actions_drive_the_engine_to_solution_and_journal() {
        let mut client = Client::new();
        client.reach_solution("I failed my driving test").await;

        client.send(json!({ "type": "save_to_journal" })).await;
        let saved = client.next().await;
        assert_eq!(saved["type"], "journal_saved");
        let bonus = saved["bonus_points"].as_u64().unwrap();
        let state = client.state_in("solution").await;
        assert_eq!(state["savedToJournal"], true);
        assert_eq!(state["pointsEarned"].as_u64().unwrap(), 50 + bonus);
    }

    #[tokio::test]
    async fn chat_follows_the_current_session() {
        let mut client = Client::new();
        client.reach_solution("I failed my driving test").await;

        client.send(json!({ "type": "open_chat" })).await;
        let opened = client.next().await;
        assert_eq!(opened["type"], "chat");
        assert!(opened["turns"].as_array().unwrap().is_empty());

        client.send(json!({ "type": "chat", "message": "what now?" })).await;
        let chat = client.next().await;
        assert_eq!(chat["turns"].as_array().unwrap().len(), 2);
        assert_eq!(chat["turns"][1]["content"], "You asked: what now?");

        // A new session gets a fresh thread instead of the old one.
        client.send(json!({ "type": "reset" })).await;
        client.state_in("input").await;
        client.reach_solution("My friend cancelled again").await;
        client.send(json!({ "type": "chat", "message": "and now?" })).await;
        let chat = client.next().await;
        let turns = chat["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["content"], "and now?");
    }

    #[tokio::test]
    async fn chat_before_solution_is_rejected() {
        let mut client = Client::new();

        client.send(json!({ "type": "open_chat" })).await;

        let msg = client.next().await;
        assert_eq!(msg["type"], "error");
        assert_eq!(msg["kind"], "validation");
    }
}
