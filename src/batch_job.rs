//! Batch Job Submission
//!
//! Builds the job description for an uploaded manifest and hands it to the
//! control plane. Submission is a single call: the job id is returned and
//! logged, the job itself is never polled.

use crate::config::{ReportScope, RunConfig};
use crate::error::{RunError, RunResult};
use crate::manifest::{UploadResult, MANIFEST_FIELDS, MANIFEST_FORMAT};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Result as IoResult;
use std::pin::Pin;
use tracing::{error, info};

/// Report format identifier
pub const REPORT_FORMAT: &str = "Report_CSV_20180820";

/// Operation applied to every manifest row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOperation {
    /// Replicate each listed object version according to the bucket's rules
    S3ReplicateObject,
}

/// Completion report destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub bucket_arn: String,
    pub format: String,
    pub enabled: bool,
    pub prefix: String,
    pub scope: ReportScope,
}

/// Manifest reference: location plus the ETag returned by the upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobManifest {
    pub format: String,
    pub fields: Vec<String>,
    pub object_arn: String,
    pub etag: String,
}

/// Job creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobSpec {
    pub account_id: String,
    pub operation: JobOperation,
    pub report: JobReport,
    pub manifest: JobManifest,
    pub priority: i32,
    pub confirmation_required: bool,
    pub role_arn: String,
}

impl BatchJobSpec {
    /// Describe a replication job over the manifest just uploaded
    pub fn for_manifest(config: &RunConfig, upload: &UploadResult) -> Self {
        BatchJobSpec {
            account_id: config.account_id.clone(),
            operation: JobOperation::S3ReplicateObject,
            report: JobReport {
                bucket_arn: format!("arn:aws:s3:::{}", config.manifest_bucket),
                format: REPORT_FORMAT.to_string(),
                enabled: config.job.report_enabled,
                prefix: config.job.report_prefix.clone(),
                scope: config.job.report_scope,
            },
            manifest: JobManifest {
                format: MANIFEST_FORMAT.to_string(),
                fields: MANIFEST_FIELDS.iter().map(|f| f.to_string()).collect(),
                object_arn: upload.object_arn(),
                etag: upload.etag.clone(),
            },
            priority: config.job.priority,
            confirmation_required: config.job.confirmation_required,
            role_arn: config.role_arn.clone(),
        }
    }
}

/// Batch job control plane collaborator
pub trait ControlPlane: Send + Sync {
    /// Create one job; returns the id the control plane assigned
    fn create_job<'a>(
        &'a self,
        spec: &'a BatchJobSpec,
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>>;
}

/// Submit the job. Errors are returned unchanged; there is no retry.
pub async fn submit_job<P>(plane: &P, spec: &BatchJobSpec) -> RunResult<String>
where
    P: ControlPlane + ?Sized,
{
    let job_id = plane.create_job(spec).await.map_err(|e| {
        error!(
            stage = "submit",
            account_id = %spec.account_id,
            manifest = %spec.manifest.object_arn,
            error = %e,
            "batch job submission failed"
        );
        RunError::JobSubmission { source: e }
    })?;

    info!(
        job_id = %job_id,
        manifest = %spec.manifest.object_arn,
        etag = %spec.manifest.etag,
        priority = spec.priority,
        "batch job created"
    );
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryControlPlane;
    use std::io::ErrorKind;

    fn upload() -> UploadResult {
        UploadResult {
            bucket: "manifests".to_string(),
            key: "rule-1.csv".to_string(),
            etag: "\"5d41402abc4b2a76b9719d911017c592\"".to_string(),
            size_bytes: 10,
            rows: 1,
        }
    }

    #[test]
    fn test_spec_references_upload() {
        let config = RunConfig::test("rule-1");
        let spec = BatchJobSpec::for_manifest(&config, &upload());

        assert_eq!(spec.account_id, "123456789012");
        assert_eq!(spec.operation, JobOperation::S3ReplicateObject);
        assert_eq!(spec.manifest.object_arn, "arn:aws:s3:::manifests/rule-1.csv");
        assert_eq!(spec.manifest.etag, upload().etag);
        assert_eq!(spec.manifest.format, "S3BatchOperations_CSV_20180820");
        assert_eq!(spec.manifest.fields, vec!["Bucket", "Key", "VersionId"]);
        assert_eq!(spec.report.bucket_arn, "arn:aws:s3:::manifests");
        assert_eq!(spec.report.prefix, "report/");
        assert_eq!(spec.report.scope, ReportScope::AllTasks);
        assert!(spec.report.enabled);
        assert_eq!(spec.priority, 10);
        assert!(!spec.confirmation_required);
        assert_eq!(spec.role_arn, config.role_arn);
    }

    #[tokio::test]
    async fn test_submit_returns_job_id() {
        let plane = InMemoryControlPlane::new();
        let spec = BatchJobSpec::for_manifest(&RunConfig::test("rule-1"), &upload());

        let job_id = submit_job(&plane, &spec).await.unwrap();

        assert_eq!(job_id, "job-0001");
        assert_eq!(plane.submitted(), vec![spec]);
    }

    #[tokio::test]
    async fn test_submit_failure_propagates() {
        let plane = InMemoryControlPlane::new();
        plane.fail_submissions(ErrorKind::PermissionDenied);
        let spec = BatchJobSpec::for_manifest(&RunConfig::test("rule-1"), &upload());

        let err = submit_job(&plane, &spec).await.unwrap_err();

        assert!(matches!(err, RunError::JobSubmission { .. }));
        assert!(plane.submitted().is_empty());
    }
}
