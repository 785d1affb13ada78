//! Sinks for documents and interview records.
//!
//! Persistence is owned by the host; these traits are the only view the
//! booking flow has of it. In-memory versions back tests and offline use.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use ingest::Document;
use tokio::sync::RwLock;

use crate::schema::Interview;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn save(&self, document: Document) -> Result<()>;

    /// Most recently uploaded document, if any
    async fn latest(&self) -> Result<Option<Document>>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;
}

#[async_trait]
pub trait InterviewStore: Send + Sync {
    async fn insert(&self, interview: Interview) -> Result<Interview>;

    async fn find_by_email_and_date(&self, email: &str, date: NaiveDate) -> Result<Option<Interview>>;

    async fn list(&self) -> Result<Vec<Interview>>;

    async fn get(&self, id: &str) -> Result<Option<Interview>>;
}

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save(&self, document: Document) -> Result<()> {
        self.documents.write().await.push(document);
        Ok(())
    }

    async fn latest(&self) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        // Later saves win equal timestamps
        Ok(documents
            .iter()
            .enumerate()
            .max_by_key(|(pos, doc)| (doc.uploaded_at, *pos))
            .map(|(_, doc)| doc.clone()))
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(self
            .documents
            .read()
            .await
            .iter()
            .find(|doc| doc.id == id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryInterviewStore {
    interviews: RwLock<Vec<Interview>>,
}

impl InMemoryInterviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InterviewStore for InMemoryInterviewStore {
    async fn insert(&self, interview: Interview) -> Result<Interview> {
        let mut interviews = self.interviews.write().await;
        if interviews.iter().any(|i| i.id == interview.id) {
            anyhow::bail!("interview {} already stored", interview.id);
        }
        interviews.push(interview.clone());
        Ok(interview)
    }

    async fn find_by_email_and_date(&self, email: &str, date: NaiveDate) -> Result<Option<Interview>> {
        Ok(self
            .interviews
            .read()
            .await
            .iter()
            .find(|i| i.email.eq_ignore_ascii_case(email) && i.date == date)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Interview>> {
        Ok(self.interviews.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Interview>> {
        Ok(self
            .interviews
            .read()
            .await
            .iter()
            .find(|i| i.id == id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BookingSource;
    use chrono::{Duration, NaiveTime, Utc};
    use ingest::ChunkingStrategy;

    fn interview(id: &str, email: &str) -> Interview {
        Interview {
            id: id.to_string(),
            name: "Ann Lee".to_string(),
            email: email.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            source: BookingSource::Api,
            enriched_from: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_document_by_upload_time() {
        let store = InMemoryDocumentStore::new();
        let mut older = Document::new("old.txt", "old", ChunkingStrategy::FixedSize);
        older.uploaded_at = Utc::now() - Duration::hours(1);
        let newer = Document::new("new.txt", "new", ChunkingStrategy::FixedSize);

        store.save(newer.clone()).await.unwrap();
        store.save(older).await.unwrap();

        assert_eq!(store.latest().await.unwrap().unwrap().id, newer.id);
        assert!(store.get(&newer.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_document_store() {
        let store = InMemoryDocumentStore::new();
        assert!(store.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interview_lookup() {
        let store = InMemoryInterviewStore::new();
        store.insert(interview("1", "ann@example.com")).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 4, 15).unwrap();
        assert!(store.find_by_email_and_date("ANN@example.com", date).await.unwrap().is_some());
        assert!(store.get("1").await.unwrap().is_some());
        assert!(store.get("2").await.unwrap().is_none());
        assert!(store.insert(interview("1", "x@example.com")).await.is_err());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
