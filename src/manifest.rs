//! Manifest Encoding and Upload
//!
//! The manifest is a header-less CSV file with one `bucket,key,version` row
//! per distinct object version. It is written once per run to
//! `<partition-key>.csv` in the manifest bucket, replacing whatever was there.
//!
//! ## Fingerprint Handoff
//!
//! ```text
//! encode(set) -> bytes -> ManifestStore::put -> ETag -> BatchJobSpec
//! ```
//!
//! The ETag handed to the job is the one returned by the `put` of this run,
//! never one looked up afterwards.

use crate::config::RunConfig;
use crate::error::{RunError, RunResult};
use crate::record::{ManifestSet, VersionedObjectRef};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use tracing::{error, info};

/// Column order of every manifest row
pub const MANIFEST_FIELDS: [&str; 3] = ["Bucket", "Key", "VersionId"];

/// Format identifier the control plane expects for this layout
pub const MANIFEST_FORMAT: &str = "S3BatchOperations_CSV_20180820";

/// Object store collaborator
pub trait ManifestStore: Send + Sync {
    /// Create or overwrite `bucket/key`; returns the ETag of the stored bytes
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>>;
}

/// Where the manifest landed and the fingerprint of what was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub bucket: String,
    pub key: String,
    pub etag: String,
    pub size_bytes: u64,
    pub rows: usize,
}

impl UploadResult {
    /// ARN form of the manifest location
    pub fn object_arn(&self) -> String {
        format!("arn:aws:s3:::{}/{}", self.bucket, self.key)
    }
}

/// Serialize the set as CSV rows `(bucket, key, version)`.
///
/// The set is ordered, so equal sets always encode to equal bytes.
pub fn encode(set: &ManifestSet) -> IoResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    for object in set {
        writer.write_record([&object.bucket, &object.key, &object.version_id])?;
    }

    writer.into_inner().map_err(|e| e.into_error())
}

/// Parse manifest bytes back into a set
pub fn parse(data: &[u8]) -> IoResult<ManifestSet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(data);

    let mut set = ManifestSet::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() != MANIFEST_FIELDS.len() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "manifest row {} has {} fields, expected {}",
                    line,
                    row.len(),
                    MANIFEST_FIELDS.len()
                ),
            ));
        }
        set.insert(VersionedObjectRef::new(&row[0], &row[1], &row[2]));
    }
    Ok(set)
}

/// Encode the set and write it to the manifest location for this run
pub async fn upload_manifest<S>(
    store: &S,
    config: &RunConfig,
    set: &ManifestSet,
) -> RunResult<UploadResult>
where
    S: ManifestStore + ?Sized,
{
    let bucket = config.manifest_bucket.clone();
    let key = config.manifest_key();

    let upload_error = |source: IoError| {
        error!(stage = "upload", bucket = %bucket, key = %key, error = %source, "manifest upload failed");
        RunError::Upload {
            bucket: bucket.clone(),
            key: key.clone(),
            source,
        }
    };

    let data = encode(set).map_err(upload_error)?;
    let etag = store.put(&bucket, &key, &data).await.map_err(upload_error)?;

    if etag.is_empty() {
        return Err(upload_error(IoError::new(
            ErrorKind::InvalidData,
            "object store returned no ETag",
        )));
    }

    info!(
        bucket = %bucket,
        key = %key,
        etag = %etag,
        rows = set.len(),
        size_bytes = data.len(),
        "manifest uploaded"
    );

    Ok(UploadResult {
        bucket,
        key,
        etag,
        size_bytes: data.len() as u64,
        rows: set.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::dedup;
    use crate::stores::InMemoryManifestStore;

    fn sample_set() -> ManifestSet {
        dedup(vec![
            VersionedObjectRef::new("src", "B", "2"),
            VersionedObjectRef::new("src", "A", "1"),
            VersionedObjectRef::new("src", "dir/with,comma.txt", "v\"3"),
            VersionedObjectRef::new("src", "no-version", ""),
        ])
    }

    #[test]
    fn test_encode_rows_and_order() {
        let set = dedup(vec![
            VersionedObjectRef::new("src", "B", "2"),
            VersionedObjectRef::new("src", "A", "1"),
        ]);
        let data = encode(&set).unwrap();
        assert_eq!(data, b"src,A,1\r\nsrc,B,2\r\n");
    }

    #[test]
    fn test_encode_empty_set() {
        assert!(encode(&ManifestSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let forward = encode(&sample_set()).unwrap();
        let rebuilt = dedup(sample_set().into_iter().rev());
        assert_eq!(forward, encode(&rebuilt).unwrap());
    }

    #[test]
    fn test_round_trip_with_quoting() {
        let set = sample_set();
        let parsed = parse(&encode(&set).unwrap()).unwrap();
        assert_eq!(parsed, set);
    }

    #[test]
    fn test_parse_rejects_short_rows() {
        let err = parse(b"src,A\r\n").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_upload_returns_etag_of_written_bytes() {
        let store = InMemoryManifestStore::new();
        let config = RunConfig::test("rule-1");
        let set = sample_set();

        let upload = upload_manifest(&store, &config, &set).await.unwrap();

        assert_eq!(upload.bucket, "manifests");
        assert_eq!(upload.key, "rule-1.csv");
        assert_eq!(upload.rows, 4);
        let stored = store.object("manifests", "rule-1.csv").unwrap();
        assert_eq!(upload.etag, stored.etag);
        assert_eq!(parse(&stored.data).unwrap(), set);
    }

    #[tokio::test]
    async fn test_upload_overwrites_previous_manifest() {
        let store = InMemoryManifestStore::new();
        let config = RunConfig::test("rule-1");

        let first = upload_manifest(&store, &config, &sample_set()).await.unwrap();
        let smaller = dedup(vec![VersionedObjectRef::new("src", "A", "1")]);
        let second = upload_manifest(&store, &config, &smaller).await.unwrap();

        assert_ne!(first.etag, second.etag);
        assert_eq!(store.len(), 1);
        let stored = store.object("manifests", "rule-1.csv").unwrap();
        assert_eq!(stored.etag, second.etag);
    }

    #[tokio::test]
    async fn test_upload_failure_maps_to_upload_error() {
        let store = InMemoryManifestStore::new();
        store.fail_puts(ErrorKind::PermissionDenied);

        let err = upload_manifest(&store, &RunConfig::test("rule-1"), &sample_set())
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Upload { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_object_arn() {
        let upload = UploadResult {
            bucket: "manifests".to_string(),
            key: "rule-1.csv".to_string(),
            etag: "\"abc\"".to_string(),
            size_bytes: 0,
            rows: 0,
        };
        assert_eq!(upload.object_arn(), "arn:aws:s3:::manifests/rule-1.csv");
    }
}
