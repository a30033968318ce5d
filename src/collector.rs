//! Paginated Query Collector
//!
//! Reads every record for one partition key, following continuation tokens
//! until the store reports no more pages. Nothing is returned until the last
//! page has been read.

use crate::config::RunConfig;
use crate::error::{RunError, RunResult};
use crate::record::Record;
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use tracing::{debug, error, info};

/// One query against the key-value store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest<'a> {
    /// Table to query
    pub table: &'a str,
    /// Attribute holding the partition key
    pub partition_attribute: &'a str,
    /// Partition key value bound to `:id`
    pub partition_key: &'a str,
    /// Attribute holding the composite value
    pub value_attribute: &'a str,
    /// Key condition expression
    pub key_condition: String,
    /// Attributes to return
    pub projection: Vec<String>,
    /// Token from the previous page, if any
    pub continuation_token: Option<&'a str>,
}

/// One page of query results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Records on this page
    pub records: Vec<Record>,
    /// Opaque token for the next page (if more results exist)
    pub next_token: Option<String>,
}

/// Key-value store collaborator
pub trait KeyValueStore: Send + Sync {
    /// Run one paginated query
    fn query<'a>(
        &'a self,
        request: QueryRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = IoResult<Page>> + Send + 'a>>;
}

/// Everything read for one partition key
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub records: Vec<Record>,
    pub pages: usize,
}

/// Read all records for `config.partition_key`.
///
/// Stops when a page carries no continuation token or contains no records.
/// The first query error aborts collection; nothing read so far is returned.
pub async fn collect_records<S>(store: &S, config: &RunConfig) -> RunResult<Collected>
where
    S: KeyValueStore + ?Sized,
{
    let key_condition = config.query.key_condition();
    let projection = config.query.projection();
    let mut collected = Collected::default();
    let mut token: Option<String> = None;

    loop {
        let request = QueryRequest {
            table: &config.table_name,
            partition_attribute: &config.query.partition_attribute,
            partition_key: &config.partition_key,
            value_attribute: &config.query.value_attribute,
            key_condition: key_condition.clone(),
            projection: projection.clone(),
            continuation_token: token.as_deref(),
        };

        let page = store.query(request).await.map_err(|e| {
            error!(
                stage = "collect",
                table = %config.table_name,
                partition_key = %config.partition_key,
                pages_read = collected.pages,
                error = %e,
                "key-value query failed"
            );
            RunError::StoreQuery {
                partition_key: config.partition_key.clone(),
                source: e,
            }
        })?;

        debug!(
            page = collected.pages,
            records = page.records.len(),
            has_more = page.next_token.is_some(),
            "query page received"
        );

        if page.records.is_empty() {
            break;
        }

        collected.pages += 1;
        collected.records.extend(page.records);

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    info!(
        partition_key = %config.partition_key,
        pages = collected.pages,
        records = collected.records.len(),
        "collected records"
    );
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryKvStore;
    use std::io::{Error as IoError, ErrorKind};

    fn page(values: &[&str]) -> Vec<Record> {
        values.iter().map(|v| Record::new("rule-1", *v)).collect()
    }

    #[tokio::test]
    async fn test_collect_follows_tokens() {
        let store = InMemoryKvStore::with_pages(vec![page(&["A#1", "A#1"]), page(&["B#2"])]);
        let config = RunConfig::test("rule-1");

        let collected = collect_records(&store, &config).await.unwrap();

        assert_eq!(collected.pages, 2);
        assert_eq!(collected.records.len(), 3);
        let queries = store.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].continuation_token, None);
        assert_eq!(queries[1].continuation_token.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_collect_sends_projection_and_condition() {
        let store = InMemoryKvStore::with_pages(vec![page(&["A#1"])]);
        let config = RunConfig::test("rule-1");

        collect_records(&store, &config).await.unwrap();

        let queries = store.queries();
        assert_eq!(queries[0].table, "replication-events");
        assert_eq!(queries[0].partition_key, "rule-1");
        assert_eq!(queries[0].key_condition, "ReplicationRuleId = :id");
        assert_eq!(
            queries[0].projection,
            vec!["ReplicationRuleId".to_string(), "ObjectKeyVersionId".to_string()]
        );
    }

    #[tokio::test]
    async fn test_collect_no_pages() {
        let store = InMemoryKvStore::with_pages(vec![]);
        let collected = collect_records(&store, &RunConfig::test("rule-1"))
            .await
            .unwrap();
        assert_eq!(collected.pages, 0);
        assert!(collected.records.is_empty());
        assert_eq!(store.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_collect_stops_on_empty_page_with_token() {
        let store =
            InMemoryKvStore::with_pages(vec![page(&["A#1"]), vec![], page(&["never#read"])]);
        let collected = collect_records(&store, &RunConfig::test("rule-1"))
            .await
            .unwrap();
        assert_eq!(collected.records.len(), 1);
        assert_eq!(store.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_collect_fails_fast() {
        let store = InMemoryKvStore::with_pages(vec![page(&["A#1"]), page(&["B#2"])]);
        store.fail_on_query(1, IoError::new(ErrorKind::TimedOut, "throttled"));

        let err = collect_records(&store, &RunConfig::test("rule-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::StoreQuery { .. }));
        assert_eq!(err.stage(), "collect");
    }
}
