//! crates/drishti_core/src/journal.rs
//!
//! Turns a completed session into a journal entry.

use crate::domain::{JournalEntry, ReflectionSession};
use chrono::NaiveDate;

pub const BASE_POINTS: u32 = 25;
pub const MAX_CONTENT_BONUS: u32 = 25;
const CHARS_PER_BONUS_POINT: usize = 20;

const SUMMARY: &str =
    "Gained new perspectives on challenges through guided reflection and insights.";
const MOOD_EMOJI: &str = "🧠";
const TAGS: [&str; 4] = ["perspective", "growth", "mindset", "reflection"];

/// Builds the entry written when the user saves a session's cards to their journal.
pub fn entry_for_session(session: &ReflectionSession, date: NaiveDate) -> JournalEntry {
    let cards = session
        .cards
        .iter()
        .map(|card| format!("**{}**\n{}", card.title, card.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let content = format!(
        "**Original Situation:**\n{}\n\n**Perspective Insights:**\n\n{}",
        session.user_input, cards
    );
    let points_earned = points_for_content(&content);

    JournalEntry {
        title: format!("Perspective Session - {}", date.format("%Y-%m-%d")),
        content,
        summary: SUMMARY.to_string(),
        mood_emoji: MOOD_EMOJI.to_string(),
        tags: TAGS.iter().map(|t| t.to_string()).collect(),
        points_earned,
    }
}

/// 25 points plus one per 20 characters of content, the bonus capped at 25.
pub fn points_for_content(content: &str) -> u32 {
    let bonus = (content.chars().count() / CHARS_PER_BONUS_POINT) as u32;
    BASE_POINTS + bonus.min(MAX_CONTENT_BONUS)
}
