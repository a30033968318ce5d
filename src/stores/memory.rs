//! In-Memory Collaborators
//!
//! Shared-state stores for unit tests and `memory` backend runs. Each one
//! records what it was asked to do and can be told to fail.

use crate::batch_job::{BatchJobSpec, ControlPlane};
use crate::collector::{KeyValueStore, Page, QueryRequest};
use crate::manifest::ManifestStore;
use crate::record::Record;
use crate::stores::content_etag;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

// ============================================================================
// InMemoryKvStore
// ============================================================================

/// Owned copy of a query, kept for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedQuery {
    pub table: String,
    pub partition_key: String,
    pub key_condition: String,
    pub projection: Vec<String>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Default)]
struct KvState {
    pages: Vec<Vec<Record>>,
    queries: Vec<RecordedQuery>,
    /// Fail the query with this index (0-based)
    failure: Option<(usize, ErrorKind, String)>,
}

/// Key-value store serving fixed pages; the continuation token is the page index
#[derive(Debug, Clone, Default)]
pub struct InMemoryKvStore {
    state: Arc<RwLock<KvState>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pages` in order
    pub fn with_pages(pages: Vec<Vec<Record>>) -> Self {
        let store = Self::new();
        store.state.write().pages = pages;
        store
    }

    /// Split `records` into pages of at most `page_size`
    pub fn paginated(records: Vec<Record>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let pages = records
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Self::with_pages(pages)
    }

    /// Make query number `index` fail with `error`'s kind and message
    pub fn fail_on_query(&self, index: usize, error: IoError) {
        self.state.write().failure = Some((index, error.kind(), error.to_string()));
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<RecordedQuery> {
        self.state.read().queries.clone()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn query<'a>(
        &'a self,
        request: QueryRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = IoResult<Page>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            let index = state.queries.len();
            state.queries.push(RecordedQuery {
                table: request.table.to_string(),
                partition_key: request.partition_key.to_string(),
                key_condition: request.key_condition.clone(),
                projection: request.projection.clone(),
                continuation_token: request.continuation_token.map(str::to_string),
            });

            if let Some((fail_index, kind, message)) = &state.failure {
                if *fail_index == index {
                    return Err(IoError::new(*kind, message.clone()));
                }
            }

            let page_index = match request.continuation_token {
                Some(token) => token.parse::<usize>().map_err(|_| {
                    IoError::new(ErrorKind::InvalidInput, format!("bad continuation token: {}", token))
                })?,
                None => 0,
            };

            let Some(records) = state.pages.get(page_index) else {
                return Ok(Page::default());
            };
            let next_token = (page_index + 1 < state.pages.len()).then(|| (page_index + 1).to_string());

            Ok(Page {
                records: records.clone(),
                next_token,
            })
        })
    }
}

// ============================================================================
// InMemoryManifestStore
// ============================================================================

/// Bytes and ETag of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub etag: String,
}

#[derive(Debug, Default)]
struct ObjectState {
    objects: HashMap<(String, String), StoredObject>,
    put_failure: Option<ErrorKind>,
    puts: u64,
}

/// Object store keeping objects in a map; ETags are content digests
#[derive(Debug, Clone, Default)]
pub struct InMemoryManifestStore {
    state: Arc<RwLock<ObjectState>>,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent put with `kind`
    pub fn fail_puts(&self, kind: ErrorKind) {
        self.state.write().put_failure = Some(kind);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.state
            .read()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of put calls, including failed ones
    pub fn put_count(&self) -> u64 {
        self.state.read().puts
    }

    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().objects.is_empty()
    }
}

impl ManifestStore for InMemoryManifestStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            state.puts += 1;
            if let Some(kind) = state.put_failure {
                return Err(IoError::new(kind, format!("put {}/{} rejected", bucket, key)));
            }

            let etag = content_etag(data);
            state.objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    data: data.to_vec(),
                    etag: etag.clone(),
                },
            );
            Ok(etag)
        })
    }
}

// ============================================================================
// InMemoryControlPlane
// ============================================================================

#[derive(Debug, Default)]
struct PlaneState {
    submitted: Vec<BatchJobSpec>,
    failure: Option<ErrorKind>,
    attempts: u64,
}

/// Control plane that accepts every job and hands out sequential ids
#[derive(Debug, Clone, Default)]
pub struct InMemoryControlPlane {
    state: Arc<RwLock<PlaneState>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent submission with `kind`
    pub fn fail_submissions(&self, kind: ErrorKind) {
        self.state.write().failure = Some(kind);
    }

    /// Accepted job specs, in submission order
    pub fn submitted(&self) -> Vec<BatchJobSpec> {
        self.state.read().submitted.clone()
    }

    /// Number of create_job calls, including rejected ones
    pub fn attempts(&self) -> u64 {
        self.state.read().attempts
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn create_job<'a>(
        &'a self,
        spec: &'a BatchJobSpec,
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.write();
            state.attempts += 1;
            if let Some(kind) = state.failure {
                return Err(IoError::new(kind, "job rejected by control plane"));
            }
            state.submitted.push(spec.clone());
            Ok(format!("job-{:04}", state.submitted.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(token: Option<&str>) -> QueryRequest<'_> {
        QueryRequest {
            table: "t",
            partition_attribute: "ReplicationRuleId",
            partition_key: "rule-1",
            value_attribute: "ObjectKeyVersionId",
            key_condition: "ReplicationRuleId = :id".to_string(),
            projection: vec![],
            continuation_token: token,
        }
    }

    #[tokio::test]
    async fn test_paginated_chunks() {
        let records: Vec<_> = (0..5).map(|i| Record::new("rule-1", format!("k{}#1", i))).collect();
        let store = InMemoryKvStore::paginated(records, 2);

        let first = store.query(request(None)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("1"));

        let last = store.query(request(Some("2"))).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.next_token, None);
    }

    #[tokio::test]
    async fn test_bad_token() {
        let store = InMemoryKvStore::with_pages(vec![vec![]]);
        let err = store.query(request(Some("abc"))).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_manifest_store_put_overwrites() {
        let store = InMemoryManifestStore::new();
        let first = store.put("b", "k", b"one").await.unwrap();
        let second = store.put("b", "k", b"two").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.object("b", "k").unwrap().data, b"two");
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryManifestStore::new();
        let clone = store.clone();
        clone.put("b", "k", b"data").await.unwrap();
        assert!(!store.is_empty());
    }
}
