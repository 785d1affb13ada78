use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::upstream::UpstreamError;
use crate::vector::{EmbeddedChunk, IndexError, ScoredChunk, VectorBackend};

/// Qdrant collection accessed over its REST API.
pub struct QdrantIndexer {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
    dimension: usize,
    collection_ready: AtomicBool,
    sequence: AtomicU64,
    /// Tie-break sequence per chunk id, fixed at first insertion
    assigned: DashMap<String, u64>,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Serialize, Deserialize)]
struct PointPayload {
    chunk: ingest::Chunk,
    seq: u64,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: PointPayload,
}

#[derive(Deserialize)]
struct PointResponse {
    result: Option<StoredPoint>,
}

#[derive(Deserialize)]
struct StoredPoint {
    payload: Option<PointPayload>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Deserialize)]
struct CollectionResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

impl QdrantIndexer {
    pub fn new(base_url: String, collection_name: String, dimension: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        // Seed from wall clock so sequence numbers keep growing across restarts
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            base_url,
            client,
            collection_name,
            dimension,
            collection_ready: AtomicBool::new(false),
            sequence: AtomicU64::new(seed),
            assigned: DashMap::new(),
        }
    }

    /// Initialize collection with proper schema
    pub async fn init_collection(&self) -> Result<(), IndexError> {
        if self.collection_ready.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Check if collection exists
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await.map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to list collections: {}", response.status()).into());
        }

        let info: CollectionInfo = response
            .json()
            .await
            .context("Failed to parse collection list")?;
        let exists = info
            .result
            .collections
            .iter()
            .any(|c| c.name == self.collection_name);

        if !exists {
            info!(
                collection = %self.collection_name,
                dimension = self.dimension,
                "Creating Qdrant collection"
            );

            let url = format!("{}/collections/{}", self.base_url, self.collection_name);
            let create_req = CreateCollection {
                vectors: VectorParams {
                    size: self.dimension,
                    distance: "Cosine".to_string(),
                },
            };

            let response = self
                .client
                .put(&url)
                .json(&create_req)
                .send()
                .await
                .map_err(unavailable)?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!("Failed to create collection: {}", error_text).into());
            }
        }

        self.collection_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Sequence for `chunk_id`: the one already stored for it, else a fresh one
    fn assign_seq(&self, chunk_id: &str, stored: Option<u64>) -> u64 {
        *self
            .assigned
            .entry(chunk_id.to_string())
            .or_insert_with(|| stored.unwrap_or_else(|| self.sequence.fetch_add(1, Ordering::SeqCst)))
    }

    async fn sequence_for(&self, chunk_id: &str, point_id: &str) -> Result<u64, IndexError> {
        if let Some(seq) = self.assigned.get(chunk_id) {
            return Ok(*seq);
        }
        let stored = self.stored_seq(point_id).await?;
        Ok(self.assign_seq(chunk_id, stored))
    }

    /// Sequence of a point written by an earlier process, if any
    async fn stored_seq(&self, point_id: &str) -> Result<Option<u64>, IndexError> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url, self.collection_name, point_id
        );
        let response = self.client.get(&url).send().await.map_err(unavailable)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            if status.is_server_error() {
                return Err(IndexError::Unavailable(format!("point lookup: {}", status)));
            }
            return Err(anyhow::anyhow!("Failed to read point: {}", status).into());
        }

        let point: PointResponse = response
            .json()
            .await
            .context("Failed to parse point response")?;
        Ok(point.result.and_then(|p| p.payload).map(|p| p.seq))
    }
}

/// Qdrant point ids must be UUIDs or integers; derive a UUID from the chunk id
pub fn point_id(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes).to_string()
}

fn unavailable(e: reqwest::Error) -> IndexError {
    let upstream = UpstreamError::from(e);
    if upstream.is_transient() {
        IndexError::Unavailable(upstream.to_string())
    } else {
        IndexError::Backend(anyhow::Error::new(upstream))
    }
}

#[async_trait]
impl VectorBackend for QdrantIndexer {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn upsert(&self, entry: &EmbeddedChunk) -> Result<(), IndexError> {
        if entry.vector.len() != self.dimension {
            return Err(IndexError::Dimension {
                expected: self.dimension,
                actual: entry.vector.len(),
            });
        }
        self.init_collection().await?;

        let id = point_id(&entry.chunk.chunk_id);
        let seq = self.sequence_for(&entry.chunk.chunk_id, &id).await?;
        let point = Point {
            id,
            vector: entry.vector.clone(),
            payload: PointPayload {
                chunk: entry.chunk.clone(),
                seq,
            },
        };

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );

        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points: vec![point] })
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(IndexError::Unavailable(format!("{}: {}", status, error_text)));
            }
            return Err(anyhow::anyhow!("Failed to upsert point: {}", error_text).into());
        }

        debug!(chunk_id = %entry.chunk.chunk_id, "Upserted chunk into Qdrant");
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        self.init_collection().await?;

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let body = SearchRequest {
            vector,
            limit: k,
            with_payload: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            if status.is_server_error() {
                return Err(IndexError::Unavailable(format!("{}: {}", status, error_text)));
            }
            return Err(anyhow::anyhow!("Qdrant search failed: {}", error_text).into());
        }

        let result: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant response")?;

        Ok(rank_hits(result.result))
    }

    async fn is_available(&self) -> bool {
        match self.client.get(format!("{}/", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Score descending, then insertion sequence ascending
fn rank_hits(mut hits: Vec<SearchHit>) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.payload.seq.cmp(&b.payload.seq))
    });
    hits.into_iter()
        .map(|hit| ScoredChunk {
            chunk: hit.payload.chunk,
            score: hit.score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Chunk;

    fn hit(text: &str, score: f32, seq: u64) -> SearchHit {
        SearchHit {
            score,
            payload: PointPayload {
                chunk: Chunk::new("doc".into(), 0, text.into(), "a.txt".into(), (0, 1)),
                seq,
            },
        }
    }

    #[test]
    fn test_point_id_is_stable_uuid() {
        let a = point_id("abc");
        assert_eq!(a, point_id("abc"));
        assert_ne!(a, point_id("abd"));
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_rank_hits_breaks_ties_by_sequence() {
        let ranked = rank_hits(vec![hit("late", 0.9, 20), hit("best", 0.95, 30), hit("early", 0.9, 10)]);
        let texts: Vec<_> = ranked.iter().map(|r| r.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["best", "early", "late"]);
    }

    #[test]
    fn test_search_response_parses_payload() {
        let chunk = Chunk::new("doc".into(), 3, "hello".into(), "cv.txt".into(), (0, 5));
        let json = serde_json::json!({
            "result": [
                {"id": "x", "score": 0.5, "payload": {"chunk": chunk, "seq": 1}}
            ],
            "status": "ok",
            "time": 0.001
        });
        let parsed: SearchResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.result[0].payload.chunk, chunk);
    }

    #[test]
    fn test_replaced_point_keeps_first_sequence() {
        let indexer = QdrantIndexer::new("http://localhost:6333".into(), "documents".into(), 2, Duration::from_secs(1));
        let first = indexer.assign_seq("a", None);
        let second = indexer.assign_seq("b", None);
        assert!(first < second);
        assert_eq!(indexer.assign_seq("a", None), first);
        assert_eq!(indexer.assign_seq("c", Some(7)), 7);
    }

    #[tokio::test]
    async fn test_tie_order_matches_in_memory_index() {
        use crate::memory_index::InMemoryIndex;
        use crate::vector::EmbeddedChunk;

        let chunk = |ordinal: usize, text: &str| Chunk::new("doc".into(), ordinal, text.into(), "a.txt".into(), (0, 1));
        let writes = [chunk(0, "first"), chunk(1, "second"), chunk(0, "first")];

        let local = InMemoryIndex::new();
        let indexer = QdrantIndexer::new("http://localhost:6333".into(), "documents".into(), 2, Duration::from_secs(1));
        let mut stored: Vec<SearchHit> = Vec::new();
        for c in &writes {
            local
                .upsert(&EmbeddedChunk { chunk: c.clone(), vector: vec![1.0, 0.0] })
                .await
                .unwrap();
            let seq = indexer.assign_seq(&c.chunk_id, None);
            stored.retain(|h| h.payload.chunk.chunk_id != c.chunk_id);
            stored.push(SearchHit {
                score: 1.0,
                payload: PointPayload { chunk: c.clone(), seq },
            });
        }

        let from_local: Vec<_> = local
            .query(&[1.0, 0.0], 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.chunk.text)
            .collect();
        let from_remote: Vec<_> = rank_hits(stored).into_iter().map(|r| r.chunk.text).collect();

        assert_eq!(from_local, vec!["first", "second"]);
        assert_eq!(from_remote, from_local);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let indexer = QdrantIndexer::new(
            "http://127.0.0.1:9".to_string(),
            "documents".to_string(),
            2,
            Duration::from_millis(200),
        );
        assert!(!indexer.is_available().await);
    }
}
