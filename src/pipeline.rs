//! Run Pipeline
//!
//! ```text
//! collect -> decode -> dedup -> encode + upload -> submit
//! ```
//!
//! Each stage finishes before the next starts. The first error ends the run.
//! If submission fails after the upload succeeded, the manifest object stays
//! in place and is overwritten by the next run for the same partition key.

use crate::batch_job::{submit_job, BatchJobSpec, ControlPlane};
use crate::collector::{collect_records, KeyValueStore};
use crate::config::RunConfig;
use crate::error::{RunError, RunResult};
use crate::manifest::{upload_manifest, ManifestStore, UploadResult};
use crate::record::{decode_all, dedup};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub partition_key: String,
    pub pages_read: usize,
    pub records_read: usize,
    pub unique_refs: usize,
    pub manifest: UploadResult,
    pub job_id: String,
}

/// Execute one run against the given collaborators
pub async fn run<K, M, P>(
    config: &RunConfig,
    kv: &K,
    manifests: &M,
    plane: &P,
) -> RunResult<RunReport>
where
    K: KeyValueStore + ?Sized,
    M: ManifestStore + ?Sized,
    P: ControlPlane + ?Sized,
{
    if let Err(e) = config.validate() {
        log_failure(config, &e);
        return Err(e);
    }
    info!(
        table = %config.table_name,
        partition_key = %config.partition_key,
        source_bucket = %config.source_bucket,
        "starting manifest run"
    );

    let collected = collect_records(kv, config).await?;
    let refs = decode_all(&collected.records, &config.source_bucket);
    let unique = dedup(refs);
    info!(
        records = collected.records.len(),
        unique = unique.len(),
        duplicates = collected.records.len() - unique.len(),
        "deduplicated object versions"
    );

    let upload = upload_manifest(manifests, config, &unique).await?;

    let spec = BatchJobSpec::for_manifest(config, &upload);
    let job_id = match submit_job(plane, &spec).await {
        Ok(job_id) => job_id,
        Err(e) => {
            warn!(
                bucket = %upload.bucket,
                key = %upload.key,
                "manifest left in place without a job; it is replaced on the next run"
            );
            return Err(e);
        }
    };

    Ok(RunReport {
        partition_key: config.partition_key.clone(),
        pages_read: collected.pages,
        records_read: collected.records.len(),
        unique_refs: unique.len(),
        manifest: upload,
        job_id,
    })
}

/// Log a failure that happened outside a stage (config, backend wiring)
pub fn log_failure(config: &RunConfig, err: &RunError) {
    tracing::error!(
        stage = err.stage(),
        partition_key = %config.partition_key,
        error = %err,
        "manifest run failed"
    );
}
