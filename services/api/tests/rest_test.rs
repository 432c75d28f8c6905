//! Router-level tests for the perspective REST API, run against the in-memory store.

use api_lib::config::Config;
use api_lib::web::{self, state::AppState};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use drishti_core::memory::{InMemoryChatStore, InMemorySessionStore};
use drishti_core::{
    CardType, ChatContext, ChatTurn, PerspectiveCard, PerspectiveOracle, PerspectiveService,
    PortResult, QuestionDraft, QuestionKind, ReflectionContext,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct CannedOracle;

#[async_trait]
impl PerspectiveOracle for CannedOracle {
    async fn generate_quiz(&self, _user_input: &str) -> PortResult<Vec<QuestionDraft>> {
        Ok(vec![
            QuestionDraft {
                prompt: "What triggered it?".into(),
                kind: QuestionKind::Text { placeholder: None },
            },
            QuestionDraft {
                prompt: "How strong is it?".into(),
                kind: QuestionKind::Scale {
                    min: 1,
                    max: 10,
                    min_label: None,
                    max_label: None,
                },
            },
        ])
    }

    async fn generate_cards(&self, _context: &ReflectionContext) -> PortResult<Vec<PerspectiveCard>> {
        Ok(vec![PerspectiveCard {
            title: "Zoom out".into(),
            content: "This moment is one of many.".into(),
            card_type: CardType::Insight,
        }])
    }

    async fn chat_reply(
        &self,
        _context: &ChatContext,
        history: &[ChatTurn],
        message: &str,
    ) -> PortResult<String> {
        Ok(format!("{} turns before '{}'", history.len(), message))
    }
}

fn app() -> Router {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://localhost/drishti_test".to_string()),
        _ => None,
    })
    .unwrap();
    let store = Arc::new(InMemorySessionStore::new());
    let state = Arc::new(AppState {
        perspective: Arc::new(PerspectiveService::new(store, Arc::new(CannedOracle))),
        chat_history: Arc::new(InMemoryChatStore::new()),
        config: Arc::new(config),
    });
    web::router(state)
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

async fn create(app: &Router, user: &str, input: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/perspective/sessions",
            Some(user),
            Some(json!({ "userInput": input })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn requests_without_a_user_header_are_unauthorized() {
    let app = app();
    let (status, _) = send(&app, request("GET", "/perspective/sessions", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_user_header_is_a_bad_request() {
    let app = app();
    let (status, _) = send(
        &app,
        request("GET", "/perspective/sessions", Some("not-a-uuid"), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn blank_input_is_rejected() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/perspective/sessions",
            Some(&user),
            Some(json!({ "userInput": "   " })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sessions_are_invisible_to_other_users() {
    let app = app();
    let owner = Uuid::new_v4().to_string();
    let stranger = Uuid::new_v4().to_string();
    let id = create(&app, &owner, "I keep procrastinating").await;

    let uri = format!("/perspective/sessions/{}", id);
    let (status, body) = send(&app, request("GET", &uri, Some(&owner), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "awaiting_quiz");
    assert_eq!(body["userInput"], "I keep procrastinating");

    let (status, _) = send(&app, request("GET", &uri, Some(&stranger), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn full_flow_completes_and_saves_to_journal_once() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    let id = create(&app, &user, "Exam nerves").await;
    let base = format!("/perspective/sessions/{}", id);

    let (status, body) = send(
        &app,
        request("POST", &format!("{}/quiz", base), Some(&user), Some(json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let questions = body["questions"].as_array().unwrap().clone();
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[1]["type"], "scale");

    // Cards before answers are rejected.
    let (status, _) = send(&app, request("POST", &format!("{}/cards", base), Some(&user), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let answers = json!({
        "answers": [
            { "questionId": questions[0]["id"], "value": "A mock test went badly" },
            { "questionId": questions[1]["id"], "value": 7 }
        ]
    });
    let (status, _) = send(
        &app,
        request("POST", &format!("{}/answers", base), Some(&user), Some(answers)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, request("POST", &format!("{}/cards", base), Some(&user), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pointsEarned"], 50);
    assert_eq!(body["cards"][0]["title"], "Zoom out");

    let (status, body) = send(&app, request("POST", &format!("{}/journal", base), Some(&user), None)).await;
    assert_eq!(status, StatusCode::OK);
    let bonus = body["pointsEarned"].as_u64().unwrap();
    assert!((25..=50).contains(&bonus));

    let (status, _) = send(&app, request("POST", &format!("{}/journal", base), Some(&user), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, request("GET", &base, Some(&user), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["savedToJournal"], true);
}

#[tokio::test]
async fn chat_replies_about_a_completed_session() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    let id = create(&app, &user, "Exam nerves").await;
    let base = format!("/perspective/sessions/{}", id);

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("{}/chat", base),
            Some(&user),
            Some(json!({ "message": "what now?" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(
        &app,
        request("POST", &format!("{}/quiz", base), Some(&user), Some(json!({}))),
    )
    .await;
    let answers: Vec<Value> = body["questions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| {
            let value = if q["type"] == "scale" { json!(3) } else { json!("Because") };
            json!({ "questionId": q["id"], "value": value })
        })
        .collect();
    send(
        &app,
        request(
            "POST",
            &format!("{}/answers", base),
            Some(&user),
            Some(json!({ "answers": answers })),
        ),
    )
    .await;
    send(&app, request("POST", &format!("{}/cards", base), Some(&user), None)).await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("{}/chat", base),
            Some(&user),
            Some(json!({ "message": "what now?" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "0 turns before 'what now?'");
}

#[tokio::test]
async fn listing_filters_by_status_and_rejects_unknown_filters() {
    let app = app();
    let user = Uuid::new_v4().to_string();
    create(&app, &user, "First thing").await;
    create(&app, &user, "Second thing").await;

    let (status, body) = send(
        &app,
        request("GET", "/perspective/sessions?page=1&limit=1", Some(&user), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["totalPages"], 2);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        request("GET", "/perspective/sessions?status=completed", Some(&user), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);

    let (status, _) = send(
        &app,
        request("GET", "/perspective/sessions?status=archived", Some(&user), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
