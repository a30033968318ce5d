//! Records and Object References
//!
//! A [`Record`] is one row read from the key-value store. Decoding turns it
//! into a [`VersionedObjectRef`], the unit the manifest deduplicates on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Separator between object key and version id in the composite value
pub const COMPOSITE_SEPARATOR: char = '#';

/// One entry from the key-value store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Partition key value (fixed for a run)
    pub partition_key: String,
    /// `<object-key>#<version-id>`
    pub composite_value: String,
}

impl Record {
    pub fn new(partition_key: impl Into<String>, composite_value: impl Into<String>) -> Self {
        Record {
            partition_key: partition_key.into(),
            composite_value: composite_value.into(),
        }
    }
}

/// `(bucket, key, version)` triple; one manifest row
///
/// Ordering is lexicographic over bucket, key, version. The manifest relies
/// on it only to make encoding reproducible, never for meaning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionedObjectRef {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
}

impl VersionedObjectRef {
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        VersionedObjectRef {
            bucket: bucket.into(),
            key: key.into(),
            version_id: version_id.into(),
        }
    }
}

/// Deduplicated set of object references
pub type ManifestSet = BTreeSet<VersionedObjectRef>;

/// Split a composite value once on the first `#`.
///
/// A value without a separator is all key and yields an empty version id.
pub fn split_composite(value: &str) -> (&str, &str) {
    value.split_once(COMPOSITE_SEPARATOR).unwrap_or((value, ""))
}

/// Decode a record into a reference to an object in `bucket`
pub fn decode(record: &Record, bucket: &str) -> VersionedObjectRef {
    let (key, version_id) = split_composite(&record.composite_value);
    VersionedObjectRef::new(bucket, key, version_id)
}

/// Decode every record, in order
pub fn decode_all(records: &[Record], bucket: &str) -> Vec<VersionedObjectRef> {
    records
        .iter()
        .map(|record| {
            let object = decode(record, bucket);
            if object.version_id.is_empty() {
                tracing::debug!(
                    composite_value = %record.composite_value,
                    "composite value has no version separator"
                );
            }
            object
        })
        .collect()
}

/// Collapse references to the set of distinct triples
pub fn dedup<I>(refs: I) -> ManifestSet
where
    I: IntoIterator<Item = VersionedObjectRef>,
{
    refs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_separator() {
        let record = Record::new("rule-1", "photos/cat.jpg#3HL4kqtJlcpXroDTDmJ");
        let object = decode(&record, "src");
        assert_eq!(object.bucket, "src");
        assert_eq!(object.key, "photos/cat.jpg");
        assert_eq!(object.version_id, "3HL4kqtJlcpXroDTDmJ");
        assert_eq!(
            format!("{}#{}", object.key, object.version_id),
            record.composite_value
        );
    }

    #[test]
    fn test_decode_without_separator() {
        let object = decode(&Record::new("rule-1", "orphan-key"), "src");
        assert_eq!(object.key, "orphan-key");
        assert_eq!(object.version_id, "");
    }

    #[test]
    fn test_decode_splits_on_first_separator_only() {
        let object = decode(&Record::new("rule-1", "a#b#c"), "src");
        assert_eq!(object.key, "a");
        assert_eq!(object.version_id, "b#c");
    }

    #[test]
    fn test_decode_rejoin_property() {
        for value in ["k#v", "dir/file.txt#null", "#v", "k#", "x y#1 2"] {
            let (key, version) = split_composite(value);
            assert_eq!(format!("{}#{}", key, version), value);
        }
    }

    #[test]
    fn test_bucket_comes_from_caller() {
        let record = Record::new("rule-1", "a#1");
        assert_eq!(decode(&record, "other").bucket, "other");
    }

    #[test]
    fn test_dedup_removes_exact_duplicates() {
        let refs = vec![
            VersionedObjectRef::new("src", "A", "1"),
            VersionedObjectRef::new("src", "A", "1"),
            VersionedObjectRef::new("src", "A", "2"),
        ];
        let set = dedup(refs);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_dedup_idempotent_and_order_independent() {
        let refs: Vec<_> = ["A#1", "B#2", "A#1", "C#", "B#2", "B#3"]
            .iter()
            .map(|v| decode(&Record::new("r", *v), "src"))
            .collect();

        let once = dedup(refs.clone());
        let twice = dedup(once.clone());
        let reversed = dedup(refs.into_iter().rev());

        assert_eq!(once, twice);
        assert_eq!(once, reversed);
        assert_eq!(once.len(), 4);
    }

    #[test]
    fn test_decode_all_preserves_order() {
        let records = vec![Record::new("r", "B#2"), Record::new("r", "A#1")];
        let refs = decode_all(&records, "src");
        assert_eq!(refs[0].key, "B");
        assert_eq!(refs[1].key, "A");
    }
}
