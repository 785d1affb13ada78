//! Deciding whether a chat message is a question or an interview booking.
//!
//! `classify_intent` is a pure rule pass. Messages that only carry weak
//! booking vocabulary come back `Ambiguous` and are settled by an
//! `IntentConfirmer`.

use async_trait::async_trait;
use extract::LanguageModel;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Question,
    BookingRequest,
    Ambiguous,
}

static BOOKING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(?:i would|i'd) like to\s+(?:book|schedule)\b",
        r"\bcan (?:i|we)\s+(?:book|schedule)\b",
        r"\b(?:book|schedule)\s+(?:an?\s+|the\s+|my\s+)?(?:interview|appointment|meeting)\b",
        r"\b(?:book|schedule|set up|arrange)\b.*\binterview\s+(?:on|at|for)\s+(?:\d|today|tomorrow|next|this|mon|tue|wed|thu|fri|sat|sun|jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)",
        r"\bmy name is\b.*\b(?:interview|meeting|appointment)\b",
        r"\b(?:i am|i'm)\s+available\s+(?:on|at|for)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BOOKING_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:book|booking|schedule|interview|appointment|meeting|slot|available|availability|reschedule)\b")
        .unwrap()
});

/// Strong phrasing books, booking vocabulary alone is ambiguous, anything
/// else is a question about the documents.
pub fn classify_intent(message: &str) -> Intent {
    let lowered = message.to_lowercase();

    if BOOKING_PATTERNS.iter().any(|p| p.is_match(&lowered)) {
        return Intent::BookingRequest;
    }
    if BOOKING_WORDS.is_match(&lowered) {
        return Intent::Ambiguous;
    }
    Intent::Question
}

/// Settles an `Ambiguous` classification.
#[async_trait]
pub trait IntentConfirmer: Send + Sync {
    /// True when the message asks to book an interview
    async fn is_booking(&self, message: &str) -> anyhow::Result<bool>;
}

/// Yes/no prompt to the language model.
pub struct LlmIntentConfirmer {
    llm: Arc<dyn LanguageModel>,
}

impl LlmIntentConfirmer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

fn build_confirm_prompt(message: &str) -> String {
    format!(
        r#"Decide whether the user wants to book or schedule a job interview.
A question about the content of uploaded documents is NOT a booking request.

Message: "{}"

Answer with exactly one word: yes or no.

ANSWER:"#,
        message
    )
}

#[async_trait]
impl IntentConfirmer for LlmIntentConfirmer {
    async fn is_booking(&self, message: &str) -> anyhow::Result<bool> {
        let reply = self.llm.complete(&build_confirm_prompt(message)).await?;
        let word = reply
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphabetic())
            .to_lowercase();

        match word.split_whitespace().next() {
            Some("yes") => Ok(true),
            Some("no") => Ok(false),
            _ => anyhow::bail!("unexpected confirmation reply: {:?}", reply.trim()),
        }
    }
}

/// Classify, asking the confirmer only when the rules cannot tell.
/// A failed confirmation counts as a question.
pub async fn resolve_intent(message: &str, confirmer: &dyn IntentConfirmer) -> Intent {
    match classify_intent(message) {
        Intent::Ambiguous => match confirmer.is_booking(message).await {
            Ok(true) => Intent::BookingRequest,
            Ok(false) => Intent::Question,
            Err(e) => {
                warn!(error = %e, "Intent confirmation failed, treating message as a question");
                Intent::Question
            }
        },
        intent => {
            debug!(?intent, "Intent decided by rules");
            intent
        }
    }
}
