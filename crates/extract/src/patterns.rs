//! Rule-based slot spotting over free text.
//!
//! These functions only locate phrases; turning a phrase into a calendar
//! date or time of day is `datetime`'s job.

use regex::Regex;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

static EMAIL_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

static SELF_INTRO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:(?i:my name is|i am|i'm|this is)\s+)([A-Z][a-zA-Z'-]+(?:[ \t]+[A-Z][a-zA-Z'-]+)*)").unwrap()
});

static LABELLED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Name|Contact|From|Candidate):[ \t]*([A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)+)").unwrap()
});

static REQUESTER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][a-z]+ [A-Z][a-z]+)\s+(?:would like|requests|wants)").unwrap()
});

const MONTHS: &str = "january|february|march|april|may|june|july|august|september|sept|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|oct|nov|dec";
const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

/// Date phrase shapes, most specific first
static DATE_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b\d{4}-\d{2}-\d{2}\b".to_string(),
        r"\b\d{1,2}/\d{1,2}/\d{4}\b".to_string(),
        format!(r"(?i)\b(?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?\b(?:,?\s+\d{{4}}\b)?"),
        format!(r"(?i)\b\d{{1,2}}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:{MONTHS})\b\.?(?:,?\s+\d{{4}}\b)?"),
        format!(
            r"(?i)\b(?:the day after tomorrow|today|tomorrow|in\s+\d{{1,3}}\s+(?:days?|weeks?)|(?:this\s+|next\s+)?(?:{WEEKDAYS}))\b"
        ),
        r"(?i)\b(?:the\s+)?\d{1,2}(?:st|nd|rd|th)\b".to_string(),
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// Time phrase shapes, most specific first
static TIME_PHRASES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b\d{1,2}(?::\d{2})?\s*[ap]\.?m\b\.?",
        r"\b(?:[01]?\d|2[0-3]):[0-5]\d\b",
        r"(?i)\b(?:noon|midday|midnight)\b",
        r"(?i)\bat\s+\d{1,2}\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

// "time" alone is too common in CVs ("full-time") to count as a request
const INTERVIEW_KEYWORDS: [&str; 7] = [
    "interview",
    "schedule",
    "appointment",
    "meeting",
    "available",
    "book",
    "slot",
];

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_EXACT.is_match(email.trim())
}

pub fn find_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_string())
}

/// Distinct emails in order of first appearance
pub fn find_emails(text: &str) -> Vec<String> {
    let mut emails: Vec<String> = Vec::new();
    for m in EMAIL.find_iter(text) {
        if !emails.iter().any(|e| e.eq_ignore_ascii_case(m.as_str())) {
            emails.push(m.as_str().to_string());
        }
    }
    emails
}

/// "my name is Jane Doe", "I'm Jane Doe"
pub fn find_self_introduction(text: &str) -> Option<String> {
    SELF_INTRO
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
}

/// Names introduced by a label or a request verb, in order of appearance
pub fn find_names(text: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for regex in [&*LABELLED_NAME, &*REQUESTER_NAME, &*SELF_INTRO] {
        for caps in regex.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().trim().to_string()));
            }
        }
    }
    found.sort_by_key(|(pos, _)| *pos);

    let mut names: Vec<String> = Vec::new();
    for (_, name) in found {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn first_phrase(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|regex| regex.find(text))
        .map(|m| m.as_str().trim().to_string())
}

pub fn find_date_phrase(text: &str) -> Option<String> {
    first_phrase(&DATE_PHRASES, text)
}

pub fn find_time_phrase(text: &str) -> Option<String> {
    first_phrase(&TIME_PHRASES, text)
}

pub fn mentions_interview(text: &str) -> bool {
    let lower = text.to_lowercase();
    INTERVIEW_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Raw phrases spotted in one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpottedSlots {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

pub fn spot_slots(text: &str) -> SpottedSlots {
    SpottedSlots {
        name: find_self_introduction(text),
        email: find_email(text),
        date: find_date_phrase(text),
        time: find_time_phrase(text),
    }
}
