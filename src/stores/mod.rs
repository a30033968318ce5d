//! Collaborator Backends
//!
//! Implementations of the three collaborator traits:
//! - `memory`: in-process stores for unit tests and smoke runs
//! - `local`: fixture file + local directory, for development
//! - `aws`: DynamoDB, S3 and S3 Control (feature-gated)

pub mod local;
pub mod memory;
#[cfg(feature = "aws")]
pub mod aws;

pub use local::{load_fixture, LocalControlPlane, LocalFsManifestStore};
pub use memory::{InMemoryControlPlane, InMemoryKvStore, InMemoryManifestStore, RecordedQuery, StoredObject};
#[cfg(feature = "aws")]
pub use aws::{DynamoDbKvStore, S3ControlPlane, S3ManifestStore};

use sha1::{Digest, Sha1};

/// Quoted hex digest of `data`, the shape S3 uses for single-part ETags
pub fn content_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_etag_is_quoted_and_stable() {
        let etag = content_etag(b"src,A,1\r\n");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag.len(), 42);
        assert_eq!(etag, content_etag(b"src,A,1\r\n"));
        assert_ne!(etag, content_etag(b"src,A,2\r\n"));
    }
}
