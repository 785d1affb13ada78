pub mod datetime;
pub mod enrich;
pub mod llm;
pub mod patterns;
pub mod prompt;
pub mod schema;
pub mod store;

pub use datetime::{DateTimeError, DateTimeNormalizer};
pub use enrich::{Candidate, CandidateExtractor, HeuristicCvExtractor, LlmCvExtractor};
pub use llm::{LanguageModel, OllamaClient};
pub use patterns::SpottedSlots;
pub use schema::{
    BookingFields, BookingOutcome, BookingPayload, BookingRequest, BookingSource, BookingState,
    DocumentBooking, Field, Interview,
};
pub use store::{DocumentStore, InMemoryDocumentStore, InMemoryInterviewStore, InterviewStore};

use chrono::{DateTime, Utc};
use ingest::Document;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("ambiguous {field} {phrase:?}, please be more specific")]
    AmbiguousDateTime { field: Field, phrase: String },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: Field, reason: String },
    #[error("booking storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<&BookingPayload> for SpottedSlots {
    fn from(payload: &BookingPayload) -> Self {
        SpottedSlots {
            name: payload.name.clone(),
            email: payload.email.clone(),
            date: payload.date.clone(),
            time: payload.time.clone(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn date_time_error(field: Field, e: DateTimeError) -> BookingError {
    match e {
        DateTimeError::Ambiguous(phrase) => BookingError::AmbiguousDateTime { field, phrase },
        DateTimeError::Invalid(_) => BookingError::InvalidField {
            field,
            reason: e.to_string(),
        },
    }
}

/// Turn raw phrases into typed slots. Blank phrases count as absent.
pub fn resolve_slots(slots: &SpottedSlots, normalizer: &DateTimeNormalizer) -> Result<BookingFields, BookingError> {
    let email = match non_empty(&slots.email) {
        Some(email) if patterns::is_valid_email(email) => Some(email.to_string()),
        Some(email) => {
            return Err(BookingError::InvalidField {
                field: Field::Email,
                reason: format!("{email:?} is not an email address"),
            });
        }
        None => None,
    };

    let date = non_empty(&slots.date)
        .map(|phrase| normalizer.date(phrase).map_err(|e| date_time_error(Field::Date, e)))
        .transpose()?;
    let time = non_empty(&slots.time)
        .map(|phrase| normalizer.time(phrase).map_err(|e| date_time_error(Field::Time, e)))
        .transpose()?;

    Ok(BookingFields {
        name: non_empty(&slots.name).map(str::to_string),
        email,
        date,
        time,
    })
}

fn slots_from_json(value: &serde_json::Value) -> SpottedSlots {
    SpottedSlots {
        name: llm::string_field(value, "name"),
        email: llm::string_field(value, "email"),
        date: llm::string_field(value, "date"),
        time: llm::string_field(value, "time"),
    }
}

/// Booking state machine: Received -> Parsed -> Enriched -> Complete | Incomplete.
pub struct SlotExtractor {
    llm: Option<Arc<dyn LanguageModel>>,
    candidates: Arc<dyn CandidateExtractor>,
    documents: Arc<dyn DocumentStore>,
    interviews: Arc<dyn InterviewStore>,
    json_retries: usize,
}

impl SlotExtractor {
    pub fn new(documents: Arc<dyn DocumentStore>, interviews: Arc<dyn InterviewStore>) -> Self {
        Self {
            llm: None,
            candidates: Arc::new(HeuristicCvExtractor),
            documents,
            interviews,
            json_retries: 2,
        }
    }

    /// Enables LLM slot spotting for chat text and document scans
    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_candidate_extractor(mut self, candidates: Arc<dyn CandidateExtractor>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Structured booking request
    pub async fn book(&self, payload: &BookingPayload, now: DateTime<Utc>) -> Result<BookingOutcome, BookingError> {
        let raw = serde_json::to_string(payload).unwrap_or_default();
        let mut request = BookingRequest::received(BookingSource::Api, raw);

        let normalizer = DateTimeNormalizer::new(now.date_naive());
        request.extracted = resolve_slots(&SpottedSlots::from(payload), &normalizer)?;
        request.state = BookingState::Parsed;

        self.finish(request).await
    }

    /// Booking request written as a chat message
    pub async fn book_from_chat(&self, message: &str, now: DateTime<Utc>) -> Result<BookingOutcome, BookingError> {
        let mut request = BookingRequest::received(BookingSource::Chat, message);
        request.extracted = self.parse_message(message, now).await?;
        request.state = BookingState::Parsed;

        self.finish(request).await
    }

    /// Rule pass merged with the LLM pass; rules win where both found a phrase
    pub async fn parse_message(&self, message: &str, now: DateTime<Utc>) -> Result<BookingFields, BookingError> {
        let today = now.date_naive();
        let rules = patterns::spot_slots(message);
        let model = self.llm_slots(message, today).await.unwrap_or_default();

        let merged = SpottedSlots {
            name: rules.name.or(model.name),
            email: rules.email.or(model.email),
            date: rules.date.or(model.date),
            time: rules.time.or(model.time),
        };
        debug!(?merged, "Spotted booking phrases");

        resolve_slots(&merged, &DateTimeNormalizer::new(today))
    }

    async fn llm_slots(&self, message: &str, today: chrono::NaiveDate) -> Option<SpottedSlots> {
        let llm = self.llm.as_ref()?;
        let prompt = prompt::build_booking_prompt(message, today);

        match llm::generate_json_with_retry(llm.as_ref(), &prompt, self.json_retries).await {
            Ok(value) => Some(slots_from_json(&value)),
            Err(e) => {
                warn!(error = %e, "LLM slot extraction failed, continuing with rule results");
                None
            }
        }
    }

    async fn finish(&self, mut request: BookingRequest) -> Result<BookingOutcome, BookingError> {
        request.resolved = request.extracted.clone();
        self.enrich(&mut request).await?;
        request.state = BookingState::Enriched;

        let missing = request.resolved.missing();
        if !missing.is_empty() {
            request.state = BookingState::Incomplete;
            info!(
                source = ?request.source,
                missing = ?missing,
                "Booking incomplete"
            );
            return Ok(BookingOutcome::Incomplete {
                missing_fields: missing,
                partial: request.resolved,
            });
        }

        let interview = self.store(&request).await?;
        request.state = BookingState::Complete;
        info!(
            interview_id = %interview.id,
            source = ?request.source,
            enriched_from = ?request.enriched_from,
            "Interview booked"
        );
        Ok(BookingOutcome::Complete(interview))
    }

    /// Fill name/email from the most recently uploaded document only
    async fn enrich(&self, request: &mut BookingRequest) -> Result<(), BookingError> {
        if request.resolved.name.is_some() && request.resolved.email.is_some() {
            return Ok(());
        }

        let Some(document) = self.documents.latest().await.map_err(BookingError::Storage)? else {
            debug!("No uploaded document to enrich from");
            return Ok(());
        };

        let candidate = self.candidates.extract(&document).await;
        let mut used = false;

        if request.resolved.name.is_none() {
            if let Some(name) = candidate.name {
                request.resolved.name = Some(name);
                used = true;
            }
        }
        if request.resolved.email.is_none() {
            if let Some(email) = candidate.email.filter(|e| patterns::is_valid_email(e)) {
                request.resolved.email = Some(email);
                used = true;
            }
        }

        if used {
            debug!(doc_id = %document.id, "Enriched booking from document");
            request.enriched_from = Some(document.id);
        }
        Ok(())
    }

    async fn store(&self, request: &BookingRequest) -> Result<Interview, BookingError> {
        let fields = &request.resolved;
        let (Some(name), Some(email), Some(date), Some(time)) =
            (&fields.name, &fields.email, fields.date, fields.time)
        else {
            return Err(BookingError::InvalidField {
                field: fields.missing().first().copied().unwrap_or(Field::Name),
                reason: "missing".to_string(),
            });
        };

        let interview = Interview {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.clone(),
            email: email.clone(),
            date,
            time,
            source: request.source,
            enriched_from: request.enriched_from.clone(),
            created_at: Utc::now(),
        };

        self.interviews
            .insert(interview)
            .await
            .map_err(BookingError::Storage)
    }

    /// Book the interview requests written inside an uploaded document.
    ///
    /// Entries that do not resolve to all four fields are skipped. A request
    /// for an (email, date) pair that already has an interview is reported
    /// as `AlreadyExists` instead of being booked twice.
    pub async fn extract_document_bookings(
        &self,
        document: &Document,
        now: DateTime<Utc>,
    ) -> Result<Vec<DocumentBooking>, BookingError> {
        let mut requests = self.llm_document_requests(document).await;
        if requests.is_empty() {
            requests = rule_document_requests(&document.raw_text);
        }

        let normalizer = DateTimeNormalizer::new(now.date_naive());
        let mut bookings = Vec::new();

        for slots in requests {
            let fields = match resolve_slots(&slots, &normalizer) {
                Ok(fields) if fields.is_complete() => fields,
                Ok(fields) => {
                    debug!(doc_id = %document.id, missing = ?fields.missing(), "Skipping incomplete document request");
                    continue;
                }
                Err(e) => {
                    debug!(doc_id = %document.id, error = %e, "Skipping unresolvable document request");
                    continue;
                }
            };

            let mut request = BookingRequest::received(BookingSource::Document, document.filename.clone());
            request.extracted = fields.clone();
            request.resolved = fields;
            request.enriched_from = Some(document.id.clone());

            let (Some(email), Some(date)) = (request.resolved.email.as_deref(), request.resolved.date) else {
                continue;
            };
            let existing = self
                .interviews
                .find_by_email_and_date(email, date)
                .await
                .map_err(BookingError::Storage)?;

            match existing {
                Some(interview) => bookings.push(DocumentBooking::AlreadyExists(interview)),
                None => bookings.push(DocumentBooking::Booked(self.store(&request).await?)),
            }
        }

        info!(
            doc_id = %document.id,
            filename = %document.filename,
            found = bookings.len(),
            "Scanned document for interview requests"
        );
        Ok(bookings)
    }

    async fn llm_document_requests(&self, document: &Document) -> Vec<SpottedSlots> {
        let Some(llm) = self.llm.as_ref() else {
            return Vec::new();
        };
        let prompt = prompt::build_document_bookings_prompt(&document.raw_text);

        match llm::generate_json_with_retry(llm.as_ref(), &prompt, self.json_retries).await {
            Ok(serde_json::Value::Array(items)) => items.iter().map(slots_from_json).collect(),
            Ok(other) if other.is_object() => vec![slots_from_json(&other)],
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(doc_id = %document.id, error = %e, "LLM document scan failed, falling back to patterns");
                Vec::new()
            }
        }
    }
}

/// Pattern fallback: one request per email found in text that talks about interviews
fn rule_document_requests(text: &str) -> Vec<SpottedSlots> {
    if !patterns::mentions_interview(text) {
        return Vec::new();
    }

    let names = patterns::find_names(text);
    let date = patterns::find_date_phrase(text);
    let time = patterns::find_time_phrase(text);

    patterns::find_emails(text)
        .into_iter()
        .enumerate()
        .map(|(i, email)| SpottedSlots {
            name: names.get(i).or(names.first()).cloned(),
            email: Some(email),
            date: date.clone(),
            time: time.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::ScriptedLlm;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use ingest::ChunkingStrategy;

    struct Fixture {
        documents: Arc<InMemoryDocumentStore>,
        interviews: Arc<InMemoryInterviewStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                documents: Arc::new(InMemoryDocumentStore::new()),
                interviews: Arc::new(InMemoryInterviewStore::new()),
            }
        }

        fn extractor(&self) -> SlotExtractor {
            SlotExtractor::new(self.documents.clone(), self.interviews.clone())
        }

        async fn upload(&self, text: &str) -> Document {
            let doc = Document::new("cv.txt", text, ChunkingStrategy::FixedSize);
            self.documents.save(doc.clone()).await.unwrap();
            doc
        }
    }

    fn now() -> DateTime<Utc> {
        // A Wednesday
        Utc.with_ymd_and_hms(2024, 4, 10, 9, 0, 0).unwrap()
    }

    fn payload(json: &str) -> BookingPayload {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_enriches_from_uploaded_cv() {
        let fx = Fixture::new();
        let doc = fx.upload("Jane Doe, jane@example.com\nBackend engineer").await;

        let outcome = fx
            .extractor()
            .book(&payload(r#"{"date":"2024-04-15","time":"14:00"}"#), now())
            .await
            .unwrap();

        let BookingOutcome::Complete(interview) = outcome else {
            panic!("expected a complete booking");
        };
        assert_eq!(interview.name, "Jane Doe");
        assert_eq!(interview.email, "jane@example.com");
        assert_eq!(interview.date, NaiveDate::from_ymd_opt(2024, 4, 15).unwrap());
        assert_eq!(interview.time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(interview.source, BookingSource::Api);
        assert_eq!(interview.enriched_from, Some(doc.id));
    }

    #[tokio::test]
    async fn test_no_document_is_incomplete() {
        let fx = Fixture::new();
        let outcome = fx
            .extractor()
            .book(&payload(r#"{"date":"2024-04-15","time":"14:00"}"#), now())
            .await
            .unwrap();

        match outcome {
            BookingOutcome::Incomplete { missing_fields, partial } => {
                assert_eq!(missing_fields, vec![Field::Name, Field::Email]);
                assert!(partial.date.is_some());
            }
            other => panic!("expected incomplete, got {other:?}"),
        }
        assert!(fx.interviews.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_day_is_an_error() {
        let fx = Fixture::new();
        let err = fx
            .extractor()
            .with_llm(Arc::new(ScriptedLlm::failing()))
            .book_from_chat("book it for the 15th", now())
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::AmbiguousDateTime { field: Field::Date, .. }));
    }

    #[tokio::test]
    async fn test_identical_bookings_get_distinct_ids() {
        let fx = Fixture::new();
        let extractor = fx.extractor();
        let request = payload(r#"{"name":"Ann Lee","email":"ann@example.com","date":"2024-04-15","time":"09:30"}"#);

        let first = extractor.book(&request, now()).await.unwrap();
        let second = extractor.book(&request, now()).await.unwrap();

        let (Some(a), Some(b)) = (first.interview(), second.interview()) else {
            panic!("both bookings should complete");
        };
        assert_ne!(a.id, b.id);
        assert_eq!(fx.interviews.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_email_is_rejected() {
        let fx = Fixture::new();
        let err = fx
            .extractor()
            .book(&payload(r#"{"email":"ann-at-example","date":"2024-04-15","time":"09:30"}"#), now())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidField { field: Field::Email, .. }));
    }

    #[tokio::test]
    async fn test_chat_uses_llm_phrases_and_resolves_relative_dates() {
        let fx = Fixture::new();
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"name": "Sam Roe", "email": null, "date": "next Monday", "time": "2 PM"}"#,
        ));

        let outcome = fx
            .extractor()
            .with_llm(llm)
            .book_from_chat("Could I come in for an interview? sam@roe.dev", now())
            .await
            .unwrap();

        let interview = outcome.interview().unwrap();
        assert_eq!(interview.name, "Sam Roe");
        assert_eq!(interview.email, "sam@roe.dev");
        assert_eq!(interview.date, NaiveDate::from_ymd_opt(2024, 4, 15).unwrap());
        assert_eq!(interview.time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(interview.source, BookingSource::Chat);
    }

    #[tokio::test]
    async fn test_chat_without_llm_uses_rules() {
        let fx = Fixture::new();
        let outcome = fx
            .extractor()
            .book_from_chat("I'd like to book an interview tomorrow at 10:00", now())
            .await
            .unwrap();

        match outcome {
            BookingOutcome::Incomplete { missing_fields, partial } => {
                assert_eq!(missing_fields, vec![Field::Name, Field::Email]);
                assert_eq!(partial.date, NaiveDate::from_ymd_opt(2024, 4, 11));
                assert_eq!(partial.time, NaiveTime::from_hms_opt(10, 0, 0));
            }
            other => panic!("expected incomplete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_document_bookings_dedup_on_email_and_date() {
        let fx = Fixture::new();
        let text = "Interview request\nContact: Bob Jones\nbob@jones.io is available on 2024-04-20 at 11:00";
        let doc = fx.upload(text).await;
        let extractor = fx.extractor();

        let first = extractor.extract_document_bookings(&doc, now()).await.unwrap();
        assert_eq!(first.len(), 1);
        let DocumentBooking::Booked(booked) = &first[0] else {
            panic!("expected a new booking");
        };
        assert_eq!(booked.name, "Bob Jones");
        assert_eq!(booked.source, BookingSource::Document);

        let second = extractor.extract_document_bookings(&doc, now()).await.unwrap();
        assert!(matches!(&second[0], DocumentBooking::AlreadyExists(i) if i.id == booked.id));
    }

    #[tokio::test]
    async fn test_document_without_time_books_nothing() {
        let fx = Fixture::new();
        let doc = fx.upload("Jane Doe, jane@example.com\nAvailable for interview on 2024-04-20").await;

        let bookings = fx.extractor().extract_document_bookings(&doc, now()).await.unwrap();
        assert!(bookings.is_empty());
    }
}
