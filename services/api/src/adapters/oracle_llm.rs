//! services/api/src/adapters/oracle_llm.rs
//!
//! This module contains the adapter for the perspective-generating LLM.
//! It implements the `PerspectiveOracle` port from the `core` crate.

const QUIZ_INSTRUCTIONS: &str = r#"You help people look at a difficult situation from new angles.
Given what the user shared, write 4 short questions that help you understand their situation better.
Use exactly one question of each type, in this order:
1. "text": an open question asking for more details, with a short placeholder.
2. "multiple_choice": a question about their feelings or situation with exactly 4 options.
3. "scale": a 1 to 5 question about intensity or frequency, with a label for each end.
4. "emoji": a question answered by picking one of exactly 4 emoji options.

Return ONLY a JSON object with this exact structure and nothing else:
{
  "questions": [
    { "type": "text", "question": "...", "placeholder": "..." },
    { "type": "multiple_choice", "question": "...", "options": ["...", "...", "...", "..."] },
    { "type": "scale", "question": "...", "min": 1, "max": 5, "minLabel": "...", "maxLabel": "..." },
    { "type": "emoji", "question": "...", "options": ["😞", "😤", "😊", "😌"] }
  ]
}"#;

const CARDS_INSTRUCTIONS: &str = r#"Write exactly 3 short, supportive perspective cards for the user.
Make them:
- Conversational and easy to read, like advice from a friend, not a textbook.
- Free of jargon and long sentences.
- Each with a clear, catchy title and 3 to 5 sentences of content.
- Encouraging, natural and empathetic in tone.
- Each from a different angle: "growth", "compassion", "action" or "insight".

Return ONLY a JSON object with this exact structure and nothing else:
{
  "cards": [
    { "title": "...", "content": "...", "card_type": "growth" }
  ]
}"#;

const CHAT_INSTRUCTIONS: &str = r#"You are a compassionate coach helping the user explore their perspective cards.
Focus on the user's situation and the insights from their cards.
Keep responses empathetic, supportive, actionable, encouraging, conversational and under 150 words."#;

const CHAT_MAX_TOKENS: u32 = 300;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use drishti_core::domain::{ChatRole, ChatTurn, PerspectiveCard, QuestionDraft};
use drishti_core::ports::{
    ChatContext, PerspectiveOracle, PortError, PortResult, ReflectionContext,
};
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `PerspectiveOracle` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiPerspectiveAdapter {
    client: Client<OpenAIConfig>,
    quiz_model: String,
    cards_model: String,
    chat_model: String,
}

impl OpenAiPerspectiveAdapter {
    /// Creates a new `OpenAiPerspectiveAdapter`.
    pub fn new(
        client: Client<OpenAIConfig>,
        quiz_model: String,
        cards_model: String,
        chat_model: String,
    ) -> Self {
        Self {
            client,
            quiz_model,
            cards_model,
            chat_model,
        }
    }

    /// Sends one chat completion request and returns the text of the first choice.
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: Option<u32>,
    ) -> PortResult<String> {
        let request = match max_tokens {
            Some(max_tokens) => CreateChatCompletionRequestArgs::default()
                .model(model)
                .messages(messages)
                .n(1)
                .max_tokens(max_tokens)
                .temperature(0.6)
                .build(),
            None => CreateChatCompletionRequestArgs::default()
                .model(model)
                .messages(messages)
                .n(1)
                .build(),
        }
        .map_err(request_error)?;

        // Call the API and manually map the error if it occurs, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::OracleUnavailable(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                PortError::OracleMalformedResponse(format!(
                    "model {} returned no text content",
                    model
                ))
            })
    }
}

fn request_error(e: impl std::fmt::Display) -> PortError {
    PortError::OracleUnavailable(format!("could not build the request: {}", e))
}

fn system(content: impl Into<String>) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(content.into())
        .build()
        .map_err(request_error)?
        .into())
}

fn user(content: impl Into<String>) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(content.into())
        .build()
        .map_err(request_error)?
        .into())
}

fn assistant(content: impl Into<String>) -> PortResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .content(content.into())
        .build()
        .map_err(request_error)?
        .into())
}

//=========================================================================================
// Prompt Construction
//=========================================================================================

fn cards_prompt(context: &ReflectionContext) -> String {
    let mut prompt = format!("User's initial situation: \"{}\"\n\n", context.user_input);
    prompt.push_str("User's answers to understanding questions:\n");
    for (question, answer) in &context.answers {
        prompt.push_str(&format!("- Question: \"{}\"\n  Answer: \"{}\"\n", question, answer));
    }
    prompt
}

fn chat_system_prompt(context: &ChatContext) -> String {
    let cards = context
        .cards
        .iter()
        .map(|card| {
            format!(
                "Card: \"{}\"\nContent: {}\nType: {}",
                card.title,
                card.content,
                card.card_type.as_str()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\nUser's perspective cards:\n{}\n\nUser's original situation: \"{}\"",
        CHAT_INSTRUCTIONS, cards, context.user_input
    )
}

//=========================================================================================
// Response Parsing
//=========================================================================================

/// Removes a surrounding markdown code fence (```` ```json ... ``` ````), if any.
fn strip_code_fences(raw: &str) -> PortResult<String> {
    let fence = Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$")
        .map_err(|e| PortError::OracleMalformedResponse(e.to_string()))?;
    let trimmed = match fence.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => raw.trim(),
    };
    Ok(trimmed.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuizPayload {
    Wrapped { questions: Vec<QuestionDraft> },
    Bare(Vec<QuestionDraft>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CardsPayload {
    Wrapped { cards: Vec<PerspectiveCard> },
    Bare(Vec<PerspectiveCard>),
}

pub fn parse_quiz(raw: &str) -> PortResult<Vec<QuestionDraft>> {
    let body = strip_code_fences(raw)?;
    let payload: QuizPayload = serde_json::from_str(&body).map_err(|e| {
        warn!("Unparseable quiz response: {}", raw);
        PortError::OracleMalformedResponse(format!("quiz is not valid JSON: {}", e))
    })?;
    let questions = match payload {
        QuizPayload::Wrapped { questions } | QuizPayload::Bare(questions) => questions,
    };
    if questions.is_empty() {
        return Err(PortError::OracleMalformedResponse(
            "quiz contains no questions".to_string(),
        ));
    }
    Ok(questions)
}

pub fn parse_cards(raw: &str) -> PortResult<Vec<PerspectiveCard>> {
    let body = strip_code_fences(raw)?;
    let payload: CardsPayload = serde_json::from_str(&body).map_err(|e| {
        warn!("Unparseable cards response: {}", raw);
        PortError::OracleMalformedResponse(format!("cards are not valid JSON: {}", e))
    })?;
    let cards = match payload {
        CardsPayload::Wrapped { cards } | CardsPayload::Bare(cards) => cards,
    };
    if cards.is_empty() {
        return Err(PortError::OracleMalformedResponse(
            "response contains no cards".to_string(),
        ));
    }
    Ok(cards)
}

//=========================================================================================
// `PerspectiveOracle` Trait Implementation
//=========================================================================================

#[async_trait]
impl PerspectiveOracle for OpenAiPerspectiveAdapter {
    async fn generate_quiz(&self, user_input: &str) -> PortResult<Vec<QuestionDraft>> {
        let messages = vec![
            system(QUIZ_INSTRUCTIONS)?,
            user(format!("Based on this user's situation: \"{}\"", user_input))?,
        ];
        let raw = self.complete(&self.quiz_model, messages, None).await?;
        let questions = parse_quiz(&raw)?;
        info!("Quiz model returned {} questions", questions.len());
        Ok(questions)
    }

    async fn generate_cards(&self, context: &ReflectionContext) -> PortResult<Vec<PerspectiveCard>> {
        let messages = vec![system(CARDS_INSTRUCTIONS)?, user(cards_prompt(context))?];
        let raw = self.complete(&self.cards_model, messages, None).await?;
        let cards = parse_cards(&raw)?;
        info!("Cards model returned {} cards", cards.len());
        Ok(cards)
    }

    async fn chat_reply(
        &self,
        context: &ChatContext,
        history: &[ChatTurn],
        message: &str,
    ) -> PortResult<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(system(chat_system_prompt(context))?);
        for turn in history {
            messages.push(match turn.role {
                ChatRole::User => user(turn.content.clone())?,
                ChatRole::Assistant => assistant(turn.content.clone())?,
            });
        }
        messages.push(user(message)?);

        let reply = self
            .complete(&self.chat_model, messages, Some(CHAT_MAX_TOKENS))
            .await?;
        Ok(reply.trim().to_string())
    }
}
