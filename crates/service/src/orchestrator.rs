//! The request-facing pipeline: ingest documents, answer chat turns and
//! book interviews.
//!
//! A chat turn loads the session history, decides the intent, then either
//! runs retrieval and generation or hands the message to the booking state
//! machine. Both the user turn and the reply are appended to the session
//! before returning. Turns of one session are serialized unless disabled in
//! `SessionConfig`; different sessions never wait on each other.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use extract::{
    BookingOutcome, BookingPayload, CandidateExtractor, DocumentBooking, DocumentStore, Field,
    InMemoryDocumentStore, InMemoryInterviewStore, Interview, InterviewStore, LanguageModel,
    LlmCvExtractor, OllamaClient, SlotExtractor,
};
use index::{
    EmbeddedChunk, Embedder, EmbeddingApi, EmbeddingCache, EmbeddingClient, QdrantIndexer,
    RetryPolicy, VectorBackend, VectorIndex, VectorIndexStatus,
};
use ingest::{Chunk, Chunker, ChunkingStrategy, Document};
use memory::{ConversationTurn, MemoryBackend, MemoryStatus, MemoryStore, RedisMemory};
use query::{Generator, QueryLLM, Retriever};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, secs};
use crate::error::{ErrorCode, ServiceError};
use crate::intent::{Intent, IntentConfirmer, LlmIntentConfirmer, resolve_intent};
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub filename: String,
    pub strategy: ChunkingStrategy,
    pub chunks_indexed: usize,
    /// Interview requests found in the document text
    pub bookings: Vec<DocumentBooking>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply_text: String,
    pub intent: Intent,
    /// Filenames of the retrieved chunks, first-seen order
    pub sources: Vec<String>,
    pub booking: Option<BookingOutcome>,
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub vector: VectorIndexStatus,
    pub memory: MemoryStatus,
    pub metrics: MetricsSnapshot,
}

/// Swaps any external dependency for a custom implementation. Anything not
/// supplied is built from the `AppConfig`.
pub struct RagServiceBuilder {
    config: AppConfig,
    embeddings: Option<Arc<dyn EmbeddingApi>>,
    vector_backend: Option<Arc<dyn VectorBackend>>,
    memory_backend: Option<Arc<dyn MemoryBackend>>,
    answer_model: Option<Arc<dyn LanguageModel>>,
    extraction_model: Option<Arc<dyn LanguageModel>>,
    confirmer: Option<Arc<dyn IntentConfirmer>>,
    candidates: Option<Arc<dyn CandidateExtractor>>,
    documents: Option<Arc<dyn DocumentStore>>,
    interviews: Option<Arc<dyn InterviewStore>>,
}

impl RagServiceBuilder {
    pub fn embeddings(mut self, api: Arc<dyn EmbeddingApi>) -> Self {
        self.embeddings = Some(api);
        self
    }

    pub fn vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector_backend = Some(backend);
        self
    }

    pub fn memory_backend(mut self, backend: Arc<dyn MemoryBackend>) -> Self {
        self.memory_backend = Some(backend);
        self
    }

    /// Same model for answers, intent confirmation and JSON extraction
    pub fn language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.answer_model = Some(llm.clone());
        self.extraction_model = Some(llm);
        self
    }

    pub fn extraction_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.extraction_model = Some(llm);
        self
    }

    pub fn intent_confirmer(mut self, confirmer: Arc<dyn IntentConfirmer>) -> Self {
        self.confirmer = Some(confirmer);
        self
    }

    pub fn candidate_extractor(mut self, candidates: Arc<dyn CandidateExtractor>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    pub fn document_store(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn interview_store(mut self, interviews: Arc<dyn InterviewStore>) -> Self {
        self.interviews = Some(interviews);
        self
    }

    pub fn build(self) -> Result<RagService, ServiceError> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let chunker = Chunker::new(config.chunking.params.clone())?;
        let retry = RetryPolicy::from_config(&config.retry);

        let embeddings = self.embeddings.unwrap_or_else(|| {
            Arc::new(EmbeddingClient::new(
                config.embedding.base_url.clone(),
                config.embedding.model.clone(),
                secs(config.embedding.timeout_secs),
            ))
        });
        let mut embedder = Embedder::new(embeddings, retry)
            .with_batch_size(config.embedding.batch_size)
            .with_dimension(config.embedding.dimension);
        if config.cache.enabled {
            embedder = embedder.with_cache(EmbeddingCache::new(config.cache.max_entries));
        }

        let vector_backend = self.vector_backend.or_else(|| {
            config.vector.qdrant_url.as_ref().map(|url| {
                Arc::new(QdrantIndexer::new(
                    url.clone(),
                    config.vector.collection.clone(),
                    config.embedding.dimension,
                    secs(config.vector.timeout_secs),
                )) as Arc<dyn VectorBackend>
            })
        });
        let vector_name = vector_backend.as_ref().map_or("in-memory", |b| b.name()).to_string();
        let index = Arc::new(match vector_backend {
            Some(backend) => VectorIndex::new(backend),
            None => VectorIndex::in_process(),
        });

        let memory_backend = match (self.memory_backend, &config.memory.redis_url) {
            (Some(backend), _) => Some(backend),
            (None, Some(url)) => {
                let mut redis = RedisMemory::new(url, secs(config.memory.timeout_secs))?;
                if let Some(ttl) = config.memory.ttl_secs {
                    redis = redis.with_ttl(secs(ttl));
                }
                Some(Arc::new(redis) as Arc<dyn MemoryBackend>)
            }
            (None, None) => None,
        };
        let memory_name = memory_backend.as_ref().map_or("in-memory", |b| b.name()).to_string();
        let memory = match memory_backend {
            Some(backend) => MemoryStore::new(backend),
            None => MemoryStore::in_process(),
        };

        let answer_model = self.answer_model.unwrap_or_else(|| {
            Arc::new(
                QueryLLM::new(
                    config.llm.base_url.clone(),
                    config.llm.model.clone(),
                    secs(config.llm.timeout_secs),
                )
                .with_options(config.llm.sampling),
            )
        });
        let extraction_model = self.extraction_model.unwrap_or_else(|| {
            Arc::new(OllamaClient::new(
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                secs(config.llm.timeout_secs),
            ))
        });

        let confirmer = self
            .confirmer
            .unwrap_or_else(|| Arc::new(LlmIntentConfirmer::new(answer_model.clone())));
        let candidates = self
            .candidates
            .unwrap_or_else(|| Arc::new(LlmCvExtractor::new(extraction_model.clone())));
        let documents = self
            .documents
            .unwrap_or_else(|| Arc::new(InMemoryDocumentStore::new()));
        let interviews = self
            .interviews
            .unwrap_or_else(|| Arc::new(InMemoryInterviewStore::new()));

        let booking = SlotExtractor::new(documents.clone(), interviews.clone())
            .with_llm(extraction_model)
            .with_candidate_extractor(candidates);

        // One retry per turn, paced like every other upstream call
        let generator = Generator::new(answer_model).with_retry(RetryPolicy::new(
            1,
            config.retry.initial_backoff_ms,
            config.retry.max_backoff_ms,
        ));

        info!(
            vector_backend = %vector_name,
            memory_backend = %memory_name,
            top_k = config.retrieval.top_k,
            "RAG service ready"
        );

        Ok(RagService {
            retriever: Retriever::new(embedder.clone(), index.clone()),
            chunker,
            embedder,
            index,
            memory,
            generator,
            booking,
            confirmer,
            documents,
            interviews,
            metrics: Metrics::new(),
            session_locks: DashMap::new(),
            config,
        })
    }
}

pub struct RagService {
    config: AppConfig,
    chunker: Chunker,
    embedder: Embedder,
    index: Arc<VectorIndex>,
    memory: MemoryStore,
    retriever: Retriever,
    generator: Generator,
    booking: SlotExtractor,
    confirmer: Arc<dyn IntentConfirmer>,
    documents: Arc<dyn DocumentStore>,
    interviews: Arc<dyn InterviewStore>,
    metrics: Arc<Metrics>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RagService {
    pub fn builder(config: AppConfig) -> RagServiceBuilder {
        RagServiceBuilder {
            config,
            embeddings: None,
            vector_backend: None,
            memory_backend: None,
            answer_model: None,
            extraction_model: None,
            confirmer: None,
            candidates: None,
            documents: None,
            interviews: None,
        }
    }

    /// Every dependency built from configuration
    pub fn from_config(config: AppConfig) -> Result<Self, ServiceError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Chunk, embed and index a document, then book any interview requests in it.
    /// `None` uses the configured default strategy.
    pub async fn ingest(
        &self,
        filename: &str,
        raw_text: &str,
        strategy: Option<ChunkingStrategy>,
    ) -> Result<IngestReport, ServiceError> {
        self.ingest_at(filename, raw_text, strategy, Utc::now()).await
    }

    /// `ingest` with relative dates in the document resolved against `now`
    pub async fn ingest_at(
        &self,
        filename: &str,
        raw_text: &str,
        strategy: Option<ChunkingStrategy>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, ServiceError> {
        let timer = TimedOperation::start();
        let result = self.run_ingest(filename, raw_text, strategy, now).await;

        self.metrics.record_request(result.is_ok());
        match &result {
            Ok(report) => {
                self.metrics.record_ingest(timer.elapsed(), report.chunks_indexed);
                for booking in &report.bookings {
                    if matches!(booking, DocumentBooking::Booked(_)) {
                        self.metrics.record_booking(true);
                    }
                }
                info!(
                    doc_id = %report.document_id,
                    filename = %report.filename,
                    chunks = report.chunks_indexed,
                    bookings = report.bookings.len(),
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "Document ingested"
                );
            }
            Err(e) => warn!(filename = %filename, error = %e, "Ingest failed"),
        }
        result
    }

    async fn run_ingest(
        &self,
        filename: &str,
        raw_text: &str,
        strategy: Option<ChunkingStrategy>,
        now: DateTime<Utc>,
    ) -> Result<IngestReport, ServiceError> {
        if filename.trim().is_empty() {
            return Err(ServiceError::Validation("filename is empty".to_string()));
        }

        let strategy = strategy.unwrap_or(self.config.chunking.default_strategy);
        let document = Document::new(filename, raw_text, strategy);
        let chunks = self.chunker.chunk_text(
            &document.id,
            &document.raw_text,
            &document.filename,
            strategy,
        )?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let chunks_indexed = chunks.len();
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            self.index.upsert(&EmbeddedChunk { chunk, vector }).await?;
        }
        debug!(doc_id = %document.id, chunks = chunks_indexed, "Chunks indexed");

        self.documents
            .save(document.clone())
            .await
            .map_err(ServiceError::Storage)?;

        let bookings = self.booking.extract_document_bookings(&document, now).await?;

        Ok(IngestReport {
            document_id: document.id,
            filename: document.filename,
            strategy,
            chunks_indexed,
            bookings,
        })
    }

    /// One chat turn. A missing session id starts a new session.
    pub async fn chat(&self, session_id: Option<&str>, message: &str) -> Result<ChatReply, ServiceError> {
        self.chat_at(session_id, message, Utc::now()).await
    }

    /// `chat` with dates in the message resolved against `now`
    pub async fn chat_at(
        &self,
        session_id: Option<&str>,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatReply, ServiceError> {
        let message = message.trim();
        if message.is_empty() {
            self.metrics.record_request(false);
            return Err(ServiceError::Validation("message is empty".to_string()));
        }

        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let lock = self
            .config
            .sessions
            .serialize_turns
            .then(|| self.session_lock(&session_id));
        let turn = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let timer = TimedOperation::start();
        let history = match self
            .memory
            .history(&session_id, self.config.memory.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not load history, continuing without it");
                Vec::new()
            }
        };

        let intent = resolve_intent(message, self.confirmer.as_ref()).await;
        let mut reply = match intent {
            Intent::BookingRequest => self.booking_turn(&session_id, message, now).await,
            Intent::Question | Intent::Ambiguous => self.question_turn(&session_id, message, &history).await,
        };
        reply.intent = intent;

        self.remember(&session_id, message, &reply.reply_text, now).await;

        self.metrics.record_chat(timer.elapsed());
        self.metrics.record_request(reply.error_code.is_none());
        info!(
            session_id = %session_id,
            intent = ?intent,
            sources = reply.sources.len(),
            error_code = reply.error_code.map(|c| c.as_str()),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Chat turn answered"
        );

        drop(turn);
        if let Some(lock) = lock {
            self.release_session_lock(&session_id, lock);
        }
        Ok(reply)
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Drops the session's lock entry unless another turn is holding or waiting on it
    fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        self.session_locks
            .remove_if(session_id, |_, entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(entry) == 2);
    }

    async fn question_turn(&self, session_id: &str, message: &str, history: &[ConversationTurn]) -> ChatReply {
        let chunks = match self.retriever.retrieve(message, self.config.retrieval.top_k).await {
            Ok(chunks) => chunks,
            Err(e) => return failed_reply(session_id, Intent::Question, ServiceError::from(e)),
        };
        let sources = unique_sources(&chunks);

        match self.generator.answer(message, &chunks, history).await {
            Ok(answer) => ChatReply {
                session_id: session_id.to_string(),
                reply_text: answer,
                intent: Intent::Question,
                sources,
                booking: None,
                error_code: None,
            },
            Err(e) => failed_reply(session_id, Intent::Question, ServiceError::from(e)),
        }
    }

    async fn booking_turn(&self, session_id: &str, message: &str, now: DateTime<Utc>) -> ChatReply {
        match self.booking.book_from_chat(message, now).await {
            Ok(outcome) => {
                self.metrics.record_booking(outcome.interview().is_some());
                ChatReply {
                    session_id: session_id.to_string(),
                    reply_text: booking_reply(&outcome),
                    intent: Intent::BookingRequest,
                    sources: Vec::new(),
                    booking: Some(outcome),
                    error_code: None,
                }
            }
            Err(e) => failed_reply(session_id, Intent::BookingRequest, ServiceError::from(e)),
        }
    }

    async fn remember(&self, session_id: &str, message: &str, reply: &str, now: DateTime<Utc>) {
        let turns = [
            ConversationTurn::user(session_id, message, now),
            ConversationTurn::assistant(session_id, reply, now),
        ];
        for turn in &turns {
            if let Err(e) = self.memory.append(turn).await {
                warn!(session_id = %session_id, error = %e, "Failed to record conversation turn");
            }
        }
    }

    /// Structured booking request
    pub async fn book(&self, payload: &BookingPayload) -> Result<BookingOutcome, ServiceError> {
        self.book_at(payload, Utc::now()).await
    }

    pub async fn book_at(&self, payload: &BookingPayload, now: DateTime<Utc>) -> Result<BookingOutcome, ServiceError> {
        let result = self.booking.book(payload, now).await.map_err(ServiceError::from);
        self.metrics.record_request(result.is_ok());
        if let Ok(outcome) = &result {
            self.metrics.record_booking(outcome.interview().is_some());
        }
        result
    }

    pub async fn interviews(&self) -> Result<Vec<Interview>, ServiceError> {
        self.interviews.list().await.map_err(ServiceError::Storage)
    }

    pub async fn interview(&self, id: &str) -> Result<Option<Interview>, ServiceError> {
        self.interviews.get(id).await.map_err(ServiceError::Storage)
    }

    pub async fn document(&self, id: &str) -> Result<Option<Document>, ServiceError> {
        self.documents.get(id).await.map_err(ServiceError::Storage)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<ConversationTurn>, ServiceError> {
        Ok(self
            .memory
            .history(session_id, self.config.memory.history_limit)
            .await?)
    }

    /// Push chunks written during a vector outage to the external index
    pub async fn resync(&self) -> usize {
        self.index.resync().await
    }

    pub async fn health(&self) -> HealthReport {
        let (vector, memory) = tokio::join!(self.index.status(), self.memory.status());
        HealthReport {
            vector,
            memory,
            metrics: self.metrics(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.index.degradation_count(),
            self.memory.degradation_count(),
        )
    }

}

fn failed_reply(session_id: &str, intent: Intent, error: ServiceError) -> ChatReply {
    warn!(session_id = %session_id, kind = ?error.kind(), error = %error, "Chat turn degraded");
    ChatReply {
        session_id: session_id.to_string(),
        reply_text: error.user_message(),
        intent,
        sources: Vec::new(),
        booking: None,
        error_code: Some(error.code()),
    }
}

fn unique_sources(chunks: &[Chunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.contains(&chunk.source) {
            sources.push(chunk.source.clone());
        }
    }
    sources
}

fn describe_missing(field: Field) -> &'static str {
    match field {
        Field::Name => "your full name",
        Field::Email => "your email address",
        Field::Date => "your preferred date (YYYY-MM-DD)",
        Field::Time => "your preferred time (HH:MM)",
    }
}

fn join_items(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => one.to_string(),
        [first, second] => format!("{first} and {second}"),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    }
}

pub fn booking_reply(outcome: &BookingOutcome) -> String {
    match outcome {
        BookingOutcome::Complete(interview) => format!(
            "Interview booked successfully:\nName: {}\nEmail: {}\nDate: {}\nTime: {}\nBooking ID: {}",
            interview.name,
            interview.email,
            interview.date.format("%Y-%m-%d"),
            interview.time.format("%H:%M"),
            interview.id
        ),
        BookingOutcome::Incomplete { missing_fields, .. } if missing_fields.len() == Field::ALL.len() => {
            "I'd be happy to help you book an interview! I'll need your full name, email address, \
preferred date (YYYY-MM-DD) and preferred time (HH:MM).\n\n\
Example: \"I'd like to book an interview. My name is John Smith, email john@example.com, \
for 2024-01-25 at 2:30 PM.\""
                .to_string()
        }
        BookingOutcome::Incomplete { missing_fields, .. } => {
            let items: Vec<&str> = missing_fields.iter().map(|f| describe_missing(*f)).collect();
            format!(
                "I have some of your information, but I still need {} to complete your interview booking.\n\n\
Please provide the missing information and I'll schedule your interview immediately.",
                join_items(&items)
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use index::{IndexError, ScoredChunk, UpstreamError};
    use std::sync::Mutex as StdMutex;

    /// Letter-frequency vectors: deterministic and overlap-sensitive.
    struct LetterEmbeddings;

    #[async_trait]
    impl EmbeddingApi for LetterEmbeddings {
        fn model(&self) -> &str {
            "letters"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0; 26];
                    for c in text.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    /// Routes by prompt shape; `answer: None` makes answer generation fail.
    struct StubLlm {
        answer: Option<&'static str>,
        prompts: StdMutex<Vec<String>>,
    }

    impl StubLlm {
        fn answering(answer: &'static str) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(answer),
                prompts: StdMutex::new(Vec::new()),
            })
        }

        fn offline() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                prompts: StdMutex::new(Vec::new()),
            })
        }

        fn last_answer_prompt(&self) -> String {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|p| p.contains("USER QUESTION"))
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl LanguageModel for StubLlm {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("list every interview booking request") {
                return Ok("[]".to_string());
            }
            if prompt.contains("Extract interview booking details") || prompt.contains("Extract personal information") {
                return Ok("{}".to_string());
            }
            if prompt.contains("Answer with exactly one word") {
                return Ok("no".to_string());
            }
            match self.answer {
                Some(answer) => Ok(answer.to_string()),
                None => anyhow::bail!("model offline"),
            }
        }
    }

    struct DownVectors;

    #[async_trait]
    impl VectorBackend for DownVectors {
        fn name(&self) -> &str {
            "down"
        }

        async fn upsert(&self, _entry: &EmbeddedChunk) -> Result<(), IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }

        async fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
            Err(IndexError::Unavailable("connection refused".into()))
        }

        async fn is_available(&self) -> bool {
            false
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::offline();
        config.embedding.dimension = 26;
        config.retry = index::RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        };
        config
    }

    fn service(llm: Arc<StubLlm>) -> RagService {
        RagService::builder(config())
            .embeddings(Arc::new(LetterEmbeddings))
            .language_model(llm)
            .build()
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_question_is_answered_with_sources() {
        let svc = service(StubLlm::answering("Ownership prevents data races."));
        svc.ingest("notes.txt", "Rust ownership rules prevent data races.", None)
            .await
            .unwrap();

        let reply = svc
            .chat(None, "What do the notes say about ownership?")
            .await
            .unwrap();

        assert!(!reply.session_id.is_empty());
        assert_eq!(reply.intent, Intent::Question);
        assert_eq!(reply.reply_text, "Ownership prevents data races.");
        assert_eq!(reply.sources, vec!["notes.txt".to_string()]);
        assert!(reply.error_code.is_none());

        let history = svc.history(&reply.session_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].text, "Ownership prevents data races.");
    }

    #[tokio::test]
    async fn test_empty_index_still_answers() {
        let llm = StubLlm::answering("Not in your documents, but generally...");
        let reply = service(llm.clone()).chat(None, "what is a monad?").await.unwrap();

        assert!(reply.sources.is_empty());
        assert!(!reply.reply_text.is_empty());
        assert!(llm.last_answer_prompt().contains(query::NO_CONTEXT_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let err = service(StubLlm::answering("x")).chat(None, "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_history_reaches_the_prompt() {
        let llm = StubLlm::answering("ok");
        let svc = service(llm.clone());

        let first = svc.chat(Some("s-1"), "first question here").await.unwrap();
        assert_eq!(first.session_id, "s-1");
        svc.chat(Some("s-1"), "second question").await.unwrap();

        let prompt = llm.last_answer_prompt();
        assert!(prompt.contains("user: first question here"));
        assert!(prompt.contains("assistant: ok"));
    }

    #[tokio::test]
    async fn test_generation_failure_returns_code() {
        let reply = service(StubLlm::offline()).chat(None, "summarize the notes").await.unwrap();
        assert_eq!(reply.error_code, Some(ErrorCode::GenerationUnavailable));
        assert!(reply.reply_text.starts_with("Sorry"));
    }

    #[tokio::test]
    async fn test_chat_booking_complete() {
        let svc = service(StubLlm::answering("unused"));
        let reply = svc
            .chat_at(
                None,
                "I'd like to book an interview. My name is Jane Doe, email jane@example.com, on 2024-01-25 at 14:30",
                now(),
            )
            .await
            .unwrap();

        assert_eq!(reply.intent, Intent::BookingRequest);
        let interview = reply.booking.as_ref().and_then(|b| b.interview()).unwrap().clone();
        assert_eq!(interview.name, "Jane Doe");
        assert!(reply.reply_text.contains("Interview booked successfully"));
        assert!(reply.reply_text.contains("Time: 14:30"));

        assert_eq!(svc.interviews().await.unwrap().len(), 1);
        assert_eq!(svc.interview(&interview.id).await.unwrap(), Some(interview));
        assert_eq!(svc.metrics().bookings_complete, 1);
    }

    #[tokio::test]
    async fn test_chat_booking_lists_missing_fields() {
        let svc = service(StubLlm::answering("unused"));
        let reply = svc
            .chat_at(None, "Can I book an interview for 2024-01-25 at 14:30?", now())
            .await
            .unwrap();

        match reply.booking {
            Some(BookingOutcome::Incomplete { ref missing_fields, .. }) => {
                assert_eq!(missing_fields, &vec![Field::Name, Field::Email]);
            }
            ref other => panic!("expected incomplete booking, got {other:?}"),
        }
        assert!(reply.reply_text.contains("your full name and your email address"));
    }

    #[tokio::test]
    async fn test_chat_booking_uses_uploaded_cv() {
        let svc = service(StubLlm::answering("unused"));
        svc.ingest("cv.txt", "Jane Doe\njane@example.com\nBackend engineer, five years of Rust.", None)
            .await
            .unwrap();

        let reply = svc
            .chat_at(None, "Please schedule an interview on 2024-01-25 at 14:30", now())
            .await
            .unwrap();

        let interview = reply.booking.as_ref().and_then(|b| b.interview()).unwrap();
        assert_eq!(interview.name, "Jane Doe");
        assert_eq!(interview.email, "jane@example.com");
        assert!(interview.enriched_from.is_some());
    }

    #[tokio::test]
    async fn test_ambiguous_date_is_not_guessed() {
        let svc = service(StubLlm::answering("unused"));
        let reply = svc
            .chat_at(
                None,
                "Please book an interview on the 15th at 14:30, my name is Jane Doe, jane@example.com",
                now(),
            )
            .await
            .unwrap();

        assert_eq!(reply.error_code, Some(ErrorCode::AmbiguousDatetime));
        assert!(reply.booking.is_none());
        assert!(svc.interviews().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_requests_are_booked_once() {
        let svc = service(StubLlm::answering("unused"));
        let text = "Interview request\nJane Doe would like to book an interview on 2024-01-25 at 14:30.\nReply to jane@example.com";

        let first = svc.ingest_at("requests.txt", text, None, now()).await.unwrap();
        assert!(matches!(first.bookings.as_slice(), [DocumentBooking::Booked(_)]));

        let second = svc.ingest_at("requests.txt", text, None, now()).await.unwrap();
        assert!(matches!(second.bookings.as_slice(), [DocumentBooking::AlreadyExists(_)]));
        assert_eq!(svc.interviews().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_structured_booking() {
        let svc = service(StubLlm::answering("unused"));
        let payload: BookingPayload = serde_json::from_str(
            r#"{"name":"Ann Lee","email":"ann@example.com","date":"2024-02-01","time":"09:30"}"#,
        )
        .unwrap();

        let a = svc.book_at(&payload, now()).await.unwrap();
        let b = svc.book_at(&payload, now()).await.unwrap();
        assert_ne!(a.interview().unwrap().id, b.interview().unwrap().id);
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let svc = service(StubLlm::answering("unused"));
        let err = svc.ingest("empty.txt", "  \n ", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(svc.metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_vector_outage_falls_back_in_process() {
        let svc = RagService::builder(config())
            .embeddings(Arc::new(LetterEmbeddings))
            .language_model(StubLlm::answering("from fallback"))
            .vector_backend(Arc::new(DownVectors))
            .build()
            .unwrap();

        svc.ingest("notes.txt", "Borrowing rules in Rust.", None).await.unwrap();
        let reply = svc.chat(None, "what about borrowing rules?").await.unwrap();
        assert_eq!(reply.sources, vec!["notes.txt".to_string()]);

        let health = svc.health().await;
        assert!(!health.vector.remote_available);
        assert_eq!(health.metrics.vector_degradations, 1);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let svc = Arc::new(service(StubLlm::answering("ok")));
        let (a, b) = tokio::join!(
            svc.chat(Some("shared"), "question one"),
            svc.chat(Some("shared"), "question two"),
        );
        a.unwrap();
        b.unwrap();

        let history = svc.history("shared").await.unwrap();
        assert_eq!(history.len(), 4);
        // user/assistant pairs are never interleaved
        assert_eq!(history[0].role, memory::Role::User);
        assert_eq!(history[1].role, memory::Role::Assistant);
        assert_eq!(history[2].role, memory::Role::User);
        assert!(svc.session_locks.is_empty());
    }

    #[tokio::test]
    async fn test_finished_sessions_release_their_locks() {
        let svc = service(StubLlm::answering("ok"));
        for _ in 0..20 {
            svc.chat(None, "anything new?").await.unwrap();
        }
        svc.chat(Some("kept"), "and again?").await.unwrap();

        assert!(svc.session_locks.is_empty());
    }

    #[test]
    fn test_missing_field_wording() {
        let outcome = BookingOutcome::Incomplete {
            missing_fields: vec![Field::Name, Field::Date, Field::Time],
            partial: Default::default(),
        };
        assert!(booking_reply(&outcome).contains(
            "your full name, your preferred date (YYYY-MM-DD), and your preferred time (HH:MM)"
        ));
    }
}
