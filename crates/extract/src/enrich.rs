//! Candidate details read from an uploaded CV.

use async_trait::async_trait;
use ingest::Document;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::llm::{LanguageModel, generate_json_with_retry, string_field};
use crate::patterns;
use crate::prompt;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Pulls the candidate's name and email out of a document.
#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    async fn extract(&self, document: &Document) -> Candidate;
}

static NAME_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*(?:full[ \t]+)?name[ \t]*:[ \t]*([^\n,|;]+)").unwrap());

static CAPITALIZED_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][A-Za-z'-]+(?:[ \t]+[A-Z][A-Za-z'-]+){1,3}\b").unwrap()
});

const HEADING_WORDS: [&str; 16] = [
    "curriculum",
    "vitae",
    "resume",
    "profile",
    "contact",
    "summary",
    "experience",
    "education",
    "skills",
    "objective",
    "references",
    "personal",
    "details",
    "information",
    "work",
    "history",
];

/// How far from the top a name without a label is searched for
const NAME_SEARCH_LINES: usize = 10;

/// Regex and proximity rules: first email in the text; a `Name:` label,
/// otherwise the first run of 2+ capitalized words near the top.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCvExtractor;

impl HeuristicCvExtractor {
    pub fn extract_text(&self, text: &str) -> Candidate {
        Candidate {
            name: labelled_name(text).or_else(|| leading_name(text)),
            email: patterns::find_email(text),
        }
    }
}

fn labelled_name(text: &str) -> Option<String> {
    NAME_LABEL
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

fn leading_name(text: &str) -> Option<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .take(NAME_SEARCH_LINES)
        .flat_map(|line| CAPITALIZED_RUN.find_iter(line))
        .map(|m| m.as_str())
        .find(|run| {
            !run
                .split_whitespace()
                .any(|word| HEADING_WORDS.contains(&word.to_lowercase().as_str()))
        })
        .map(str::to_string)
}

#[async_trait]
impl CandidateExtractor for HeuristicCvExtractor {
    async fn extract(&self, document: &Document) -> Candidate {
        self.extract_text(&document.raw_text)
    }
}

/// Asks the language model first and fills whatever it misses with the heuristic.
pub struct LlmCvExtractor {
    llm: Arc<dyn LanguageModel>,
    fallback: HeuristicCvExtractor,
}

impl LlmCvExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            fallback: HeuristicCvExtractor,
        }
    }
}

#[async_trait]
impl CandidateExtractor for LlmCvExtractor {
    async fn extract(&self, document: &Document) -> Candidate {
        let heuristic = self.fallback.extract_text(&document.raw_text);
        let prompt = prompt::build_cv_prompt(&document.raw_text);

        match generate_json_with_retry(self.llm.as_ref(), &prompt, 2).await {
            Ok(value) => {
                let email = string_field(&value, "email").filter(|e| patterns::is_valid_email(e));
                debug!(doc_id = %document.id, "Extracted CV details with LLM");
                Candidate {
                    name: string_field(&value, "name").or(heuristic.name),
                    email: email.or(heuristic.email),
                }
            }
            Err(e) => {
                warn!(doc_id = %document.id, error = %e, "CV extraction via LLM failed, using heuristic");
                heuristic
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedLlm;
    use ingest::ChunkingStrategy;

    fn cv(text: &str) -> Document {
        Document::new("cv.txt", text, ChunkingStrategy::FixedSize)
    }

    #[test]
    fn test_name_and_email_on_first_line() {
        let found = HeuristicCvExtractor.extract_text("Jane Doe, jane@example.com\nSenior Engineer");
        assert_eq!(found.name.as_deref(), Some("Jane Doe"));
        assert_eq!(found.email.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn test_label_wins_over_position() {
        let text = "CURRICULUM VITAE\nProfessional Summary\nName: Maria Garcia Lopez\nEmail: maria@mail.org";
        let found = HeuristicCvExtractor.extract_text(text);
        assert_eq!(found.name.as_deref(), Some("Maria Garcia Lopez"));
        assert_eq!(found.email.as_deref(), Some("maria@mail.org"));
    }

    #[test]
    fn test_headings_are_skipped() {
        let found = HeuristicCvExtractor.extract_text("Curriculum Vitae\n\nTom Baker\nLondon");
        assert_eq!(found.name.as_deref(), Some("Tom Baker"));
    }

    #[test]
    fn test_nothing_found() {
        let found = HeuristicCvExtractor.extract_text("just some lowercase notes");
        assert_eq!(found, Candidate::default());
    }

    #[tokio::test]
    async fn test_llm_result_with_heuristic_backfill() {
        let llm = Arc::new(ScriptedLlm::replying(r#"{"name": "Jane A. Doe", "email": null}"#));
        let extractor = LlmCvExtractor::new(llm);

        let found = extractor.extract(&cv("Jane Doe\njane@example.com")).await;
        assert_eq!(found.name.as_deref(), Some("Jane A. Doe"));
        assert_eq!(found.email.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test]
    async fn test_llm_failure_uses_heuristic() {
        let extractor = LlmCvExtractor::new(Arc::new(ScriptedLlm::failing()));
        let found = extractor.extract(&cv("Jane Doe\njane@example.com")).await;
        assert_eq!(found.name.as_deref(), Some("Jane Doe"));
    }
}
