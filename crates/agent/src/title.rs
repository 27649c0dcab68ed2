//! Session title generation.

use kbchat_core::message::Turn;
use kbchat_providers::{COMPLETION_FALLBACK, ModelAdapter};
use tracing::{debug, warn};

pub const TITLE_PROMPT: &str = "Generate a short title (3-8 words) summarizing the USER's question topic. Rules: output ONLY the title, no quotes, no explanation, no apologies. Focus on what the user is asking about, not the assistant's response. Examples: 'HVAC Trade Vendor Contracts', 'W.B. Mason Contract Lookup', 'Laptop Procurement Process'.";

const MAX_TITLE_CHARS: usize = 80;
const LONG_TITLE_FALLBACK_CHARS: usize = 75;
const FAILED_TITLE_FALLBACK_CHARS: usize = 50;

/// Ask the fast model for a session title. Never fails: a failed or
/// unusable reply falls back to the start of the user's message.
pub async fn generate_title(adapter: &ModelAdapter, user_message: &str, max_tokens: u32) -> String {
    let turns = [Turn::user(format!("User: {user_message}"))];
    match adapter.complete_once(TITLE_PROMPT, &turns, max_tokens).await {
        Ok(reply) if reply != COMPLETION_FALLBACK => clean_title(&reply, user_message),
        Ok(_) => {
            warn!("Title reply had no text, using message prefix");
            prefix(user_message, FAILED_TITLE_FALLBACK_CHARS)
        }
        Err(e) => {
            warn!(error = %e, "Title generation failed, using message prefix");
            prefix(user_message, FAILED_TITLE_FALLBACK_CHARS)
        }
    }
}

/// Drop every double quote and the surrounding whitespace and single quotes
/// from a model title, falling back to the message when the result is empty
/// or too long.
pub fn clean_title(reply: &str, user_message: &str) -> String {
    let unquoted = reply.replace('"', "");
    let title = unquoted.trim().trim_matches('\'').trim();
    if title.is_empty() {
        return prefix(user_message, FAILED_TITLE_FALLBACK_CHARS);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        debug!(chars = title.chars().count(), "Title too long, using message prefix");
        return prefix(user_message, LONG_TITLE_FALLBACK_CHARS);
    }
    title.to_string()
}

fn prefix(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}
