//! Local Development Backend
//!
//! Records come from a JSON fixture file, manifests are written under
//! `<root>/<bucket>/<key>`, and job specs are written as JSON files under
//! `<root>/jobs/`. Nothing here talks to the network.

use crate::batch_job::{BatchJobSpec, ControlPlane};
use crate::manifest::ManifestStore;
use crate::record::Record;
use crate::stores::{content_etag, InMemoryKvStore};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Page size used when serving fixture records
pub const FIXTURE_PAGE_SIZE: usize = 100;

/// Load a JSON array of records and serve the ones for `partition_key`
///
/// Records of other partitions are dropped up front, the way a key condition
/// would exclude them server-side.
pub fn load_fixture(path: &Path, partition_key: &str) -> IoResult<InMemoryKvStore> {
    let text = std::fs::read_to_string(path)?;
    let records: Vec<Record> = serde_json::from_str(&text)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("{}: {}", path.display(), e)))?;

    let matching: Vec<Record> = records
        .into_iter()
        .filter(|r| r.partition_key == partition_key)
        .collect();
    Ok(InMemoryKvStore::paginated(matching, FIXTURE_PAGE_SIZE))
}

// ============================================================================
// LocalFsManifestStore
// ============================================================================

/// Writes manifests to the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFsManifestStore {
    base_path: PathBuf,
}

impl LocalFsManifestStore {
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsManifestStore { base_path }
    }

    /// Path of `bucket/key` under the base directory
    pub fn full_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.base_path.join(bucket).join(key)
    }

    fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl ManifestStore for LocalFsManifestStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(bucket, key);
            Self::ensure_parent(&path)?;
            tokio::fs::write(&path, data).await?;
            Ok(content_etag(data))
        })
    }
}

// ============================================================================
// LocalControlPlane
// ============================================================================

/// Accepts jobs by writing their spec to `<root>/jobs/<job-id>.json`
#[derive(Debug, Clone)]
pub struct LocalControlPlane {
    jobs_dir: PathBuf,
}

impl LocalControlPlane {
    pub fn new(root: &Path) -> Self {
        LocalControlPlane {
            jobs_dir: root.join("jobs"),
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }
}

impl ControlPlane for LocalControlPlane {
    fn create_job<'a>(
        &'a self,
        spec: &'a BatchJobSpec,
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let job_id = format!("local-{:016x}", rand::random::<u64>());
            let body = serde_json::to_vec_pretty(spec)
                .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;

            tokio::fs::create_dir_all(&self.jobs_dir).await?;
            tokio::fs::write(self.jobs_dir.join(format!("{}.json", job_id)), body).await?;
            Ok(job_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::collect_records;
    use crate::config::RunConfig;
    use crate::manifest::UploadResult;

    #[tokio::test]
    async fn test_fixture_filters_partition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let records = vec![
            Record::new("rule-1", "A#1"),
            Record::new("rule-2", "B#1"),
            Record::new("rule-1", "C#1"),
        ];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let store = load_fixture(&path, "rule-1").unwrap();
        let collected = collect_records(&store, &RunConfig::test("rule-1"))
            .await
            .unwrap();

        assert_eq!(collected.records.len(), 2);
        assert!(collected.records.iter().all(|r| r.partition_key == "rule-1"));
    }

    #[test]
    fn test_fixture_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_fixture(&path, "rule-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_localfs_put_writes_bucket_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsManifestStore::new(dir.path().to_path_buf());

        let etag = store.put("manifests", "rule-1.csv", b"src,A,1\r\n").await.unwrap();

        let written = std::fs::read(dir.path().join("manifests/rule-1.csv")).unwrap();
        assert_eq!(written, b"src,A,1\r\n");
        assert_eq!(etag, content_etag(&written));
    }

    #[tokio::test]
    async fn test_local_control_plane_writes_spec() {
        let dir = tempfile::tempdir().unwrap();
        let plane = LocalControlPlane::new(dir.path());
        let upload = UploadResult {
            bucket: "manifests".to_string(),
            key: "rule-1.csv".to_string(),
            etag: "\"e\"".to_string(),
            size_bytes: 0,
            rows: 0,
        };
        let spec = BatchJobSpec::for_manifest(&RunConfig::test("rule-1"), &upload);

        let job_id = plane.create_job(&spec).await.unwrap();

        let body = std::fs::read(plane.jobs_dir().join(format!("{}.json", job_id))).unwrap();
        let stored: BatchJobSpec = serde_json::from_slice(&body).unwrap();
        assert_eq!(stored, spec);
    }
}
