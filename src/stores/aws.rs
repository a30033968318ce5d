//! AWS Collaborators
//!
//! - `DynamoDbKvStore`: Query with `ExclusiveStartKey` pagination
//! - `S3ManifestStore`: PUT through the `object_store` crate; the ETag comes
//!   from the PUT response
//! - `S3ControlPlane`: S3 Batch Operations `CreateJob`
//!
//! Credentials and region come from the standard AWS provider chain, with
//! optional overrides from [`AwsConfig`].

use crate::batch_job::{BatchJobSpec, ControlPlane, JobOperation};
use crate::collector::{KeyValueStore, Page, QueryRequest};
use crate::config::AwsConfig;
use crate::manifest::ManifestStore;
use crate::record::Record;
use aws_sdk_dynamodb::types::AttributeValue;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;

/// Load the shared SDK configuration, applying region/endpoint overrides
pub async fn load_sdk_config(config: &AwsConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = &config.region {
        loader = loader.region(aws_sdk_dynamodb::config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    loader.load().await
}

fn other_error(message: String) -> IoError {
    IoError::new(ErrorKind::Other, message)
}

// ============================================================================
// DynamoDbKvStore
// ============================================================================

/// DynamoDB-backed key-value store
#[derive(Clone)]
pub struct DynamoDbKvStore {
    client: aws_sdk_dynamodb::Client,
}

impl std::fmt::Debug for DynamoDbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbKvStore").finish()
    }
}

impl DynamoDbKvStore {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        DynamoDbKvStore {
            client: aws_sdk_dynamodb::Client::new(sdk_config),
        }
    }

    /// Create from a pre-built client (for testing)
    pub fn from_client(client: aws_sdk_dynamodb::Client) -> Self {
        DynamoDbKvStore { client }
    }

    /// Serialize `LastEvaluatedKey` into an opaque token.
    ///
    /// Key attributes of this table are strings, so the token is a JSON map.
    fn encode_token(key: &HashMap<String, AttributeValue>) -> IoResult<String> {
        let mut plain = BTreeMap::new();
        for (name, value) in key {
            let text = value.as_s().map_err(|_| {
                IoError::new(
                    ErrorKind::InvalidData,
                    format!("key attribute {} is not a string", name),
                )
            })?;
            plain.insert(name.clone(), text.clone());
        }
        serde_json::to_string(&plain).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
    }

    fn decode_token(token: &str) -> IoResult<HashMap<String, AttributeValue>> {
        let plain: BTreeMap<String, String> = serde_json::from_str(token)
            .map_err(|e| IoError::new(ErrorKind::InvalidInput, e))?;
        Ok(plain
            .into_iter()
            .map(|(name, value)| (name, AttributeValue::S(value)))
            .collect())
    }

    fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> String {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .cloned()
            .unwrap_or_default()
    }
}

impl KeyValueStore for DynamoDbKvStore {
    fn query<'a>(
        &'a self,
        request: QueryRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = IoResult<Page>> + Send + 'a>> {
        Box::pin(async move {
            let mut query = self
                .client
                .query()
                .table_name(request.table)
                .key_condition_expression(&request.key_condition)
                .expression_attribute_values(
                    ":id",
                    AttributeValue::S(request.partition_key.to_string()),
                )
                .projection_expression(request.projection.join(", "));

            if let Some(token) = request.continuation_token {
                query = query.set_exclusive_start_key(Some(Self::decode_token(token)?));
            }

            let response = query.send().await.map_err(|e| {
                other_error(format!(
                    "DynamoDB Query failed: {}",
                    aws_sdk_dynamodb::error::DisplayErrorContext(&e)
                ))
            })?;

            let records = response
                .items()
                .iter()
                .map(|item| Record {
                    partition_key: Self::string_attr(item, request.partition_attribute),
                    composite_value: Self::string_attr(item, request.value_attribute),
                })
                .collect();

            let next_token = match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => Some(Self::encode_token(key)?),
                _ => None,
            };

            Ok(Page {
                records,
                next_token,
            })
        })
    }
}

// ============================================================================
// S3ManifestStore
// ============================================================================

/// Manifest store writing to S3 through `object_store`
#[derive(Debug, Clone)]
pub struct S3ManifestStore {
    config: AwsConfig,
}

impl S3ManifestStore {
    pub fn new(config: AwsConfig) -> Self {
        S3ManifestStore { config }
    }

    fn store_for(&self, bucket: &str) -> IoResult<impl ObjectStoreTrait> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = &self.config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => other_error(err.to_string()),
        }
    }
}

impl ManifestStore for S3ManifestStore {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.store_for(bucket)?;
            let result = store
                .put(&ObjectPath::from(key), bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            result.e_tag.ok_or_else(|| {
                IoError::new(ErrorKind::InvalidData, format!("no ETag returned for {}/{}", bucket, key))
            })
        })
    }
}

// ============================================================================
// S3ControlPlane
// ============================================================================

/// S3 Batch Operations control plane
#[derive(Clone)]
pub struct S3ControlPlane {
    client: aws_sdk_s3control::Client,
}

impl std::fmt::Debug for S3ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ControlPlane").finish()
    }
}

impl S3ControlPlane {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        S3ControlPlane {
            client: aws_sdk_s3control::Client::new(sdk_config),
        }
    }

    fn build_error(err: aws_sdk_s3control::error::BuildError) -> IoError {
        IoError::new(ErrorKind::InvalidInput, err.to_string())
    }

    fn operation(operation: JobOperation) -> aws_sdk_s3control::types::JobOperation {
        use aws_sdk_s3control::types::{JobOperation as SdkOperation, S3ReplicateObjectOperation};
        match operation {
            JobOperation::S3ReplicateObject => SdkOperation::builder()
                .s3_replicate_object(S3ReplicateObjectOperation::builder().build())
                .build(),
        }
    }
}

impl ControlPlane for S3ControlPlane {
    fn create_job<'a>(
        &'a self,
        spec: &'a BatchJobSpec,
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        use aws_sdk_s3control::types::{
            JobManifest, JobManifestFieldName, JobManifestFormat, JobManifestLocation,
            JobManifestSpec, JobReport, JobReportFormat, JobReportScope,
        };

        Box::pin(async move {
            let report = JobReport::builder()
                .bucket(&spec.report.bucket_arn)
                .format(JobReportFormat::from(spec.report.format.as_str()))
                .enabled(spec.report.enabled)
                .prefix(&spec.report.prefix)
                .report_scope(JobReportScope::from(spec.report.scope.as_str()))
                .build();

            let mut manifest_spec = JobManifestSpec::builder()
                .format(JobManifestFormat::from(spec.manifest.format.as_str()));
            for field in &spec.manifest.fields {
                manifest_spec = manifest_spec.fields(JobManifestFieldName::from(field.as_str()));
            }

            let manifest = JobManifest::builder()
                .spec(manifest_spec.build().map_err(Self::build_error)?)
                .location(
                    JobManifestLocation::builder()
                        .object_arn(&spec.manifest.object_arn)
                        .e_tag(&spec.manifest.etag)
                        .build()
                        .map_err(Self::build_error)?,
                )
                .build();

            let response = self
                .client
                .create_job()
                .account_id(&spec.account_id)
                .operation(Self::operation(spec.operation))
                .report(report)
                .manifest(manifest)
                .priority(spec.priority)
                .confirmation_required(spec.confirmation_required)
                .role_arn(&spec.role_arn)
                .send()
                .await
                .map_err(|e| {
                    other_error(format!(
                        "S3 Control CreateJob failed: {}",
                        aws_sdk_s3control::error::DisplayErrorContext(&e)
                    ))
                })?;

            response
                .job_id()
                .map(str::to_string)
                .ok_or_else(|| other_error("CreateJob returned no job id".to_string()))
        })
    }
}
