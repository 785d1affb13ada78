use extract::LanguageModel;
use index::RetryPolicy;
use ingest::Chunk;
use memory::ConversationTurn;
use std::sync::Arc;
use tracing::debug;

/// Prompt instruction used when retrieval found nothing.
pub const NO_CONTEXT_INSTRUCTION: &str = "No uploaded document is relevant to this question. \
Answer from general knowledge and state clearly that your answer is not grounded in the uploaded documents.";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("language model unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: usize, reason: String },
}

/// Builds the answer prompt and calls the language model, retrying once.
#[derive(Clone)]
pub struct Generator {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            retry: RetryPolicy::new(1, 250, 1000),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn answer(
        &self,
        query: &str,
        context: &[Chunk],
        history: &[ConversationTurn],
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(query, context, history);
        debug!(
            context_chunks = context.len(),
            history_turns = history.len(),
            prompt_chars = prompt.len(),
            "Generating answer"
        );

        let llm = &self.llm;
        let prompt = &prompt;
        self.retry
            .retry("generate_answer", || async move {
                let text = llm.complete(prompt).await?;
                let text = text.trim();
                if text.is_empty() {
                    anyhow::bail!("empty completion");
                }
                Ok(text.to_string())
            })
            .await
            .map_err(|e| GenerationError::Unavailable {
                attempts: self.retry.max_attempts(),
                reason: e.to_string(),
            })
    }
}

pub fn build_prompt(query: &str, context: &[Chunk], history: &[ConversationTurn]) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant answering questions about the user's uploaded documents.\n\n",
    );

    if context.is_empty() {
        prompt.push_str(&format!("NOTE: {}\n\n", NO_CONTEXT_INSTRUCTION));
    } else {
        prompt.push_str("RELEVANT TEXT CHUNKS:\n");
        for (i, chunk) in context.iter().enumerate() {
            prompt.push_str(&format!("[Chunk {} | source: {}] {}\n\n", i + 1, chunk.source, chunk.text));
        }
    }

    if !history.is_empty() {
        prompt.push_str("CONVERSATION SO FAR:\n");
        for turn in history {
            prompt.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.text));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        r#"USER QUESTION: {}

INSTRUCTIONS:
- Answer using the text chunks above when they are relevant and mention their source
- If the chunks do not contain the answer, say so instead of inventing document content
- Take the conversation so far into account
- Keep your answer concise and factual

ANSWER:"#,
        query
    ));
    prompt
}
