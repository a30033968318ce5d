//! Replication manifest generation and batch job submission.
//!
//! One run reads every replication event for a partition key, reduces them
//! to distinct `(bucket, key, version)` triples, uploads those as a CSV
//! manifest, and submits a batch job that replicates each listed version.

pub mod batch_job;
pub mod collector;
pub mod config;
pub mod dst;
pub mod error;
pub mod manifest;
pub mod observability;
pub mod pipeline;
pub mod record;
pub mod simulated;
pub mod stores;

pub use batch_job::{submit_job, BatchJobSpec, ControlPlane};
pub use collector::{collect_records, Collected, KeyValueStore, Page, QueryRequest};
pub use config::{BackendType, RunConfig};
pub use error::{RunError, RunResult};
pub use manifest::{encode, parse, upload_manifest, ManifestStore, UploadResult};
pub use pipeline::{run, RunReport};
pub use record::{decode, dedup, ManifestSet, Record, VersionedObjectRef};
