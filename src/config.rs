//! Run Configuration
//!
//! Everything a run needs is read once at startup into a [`RunConfig`] and
//! passed by reference into each stage. Component code never looks at the
//! process environment.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | REPLICATE_CONFIG | - | TOML file; when set, the variables below are ignored |
//! | table_name | - | Key-value table holding replication events |
//! | replication_rule | - | Partition key value selecting this run's records |
//! | src_bucket | - | Bucket the manifest rows point at |
//! | bucket_name | - | Bucket receiving the manifest and the job report |
//! | account_id | - | Account that owns the batch job |
//! | replication_role | - | Role the control plane assumes |
//! | REPLICATE_BACKEND | aws / local | memory, local, or aws |
//! | REPLICATE_LOCAL_PATH | ./replicate-data | Root for the local backend |
//! | REPLICATE_PRIORITY | 10 | Batch job priority |
//! | REPLICATE_REPORT_PREFIX | report/ | Prefix for the completion report |
//! | REPLICATE_CONFIRMATION_REQUIRED | false | Hold the job for manual confirmation |
//! | AWS_REGION | - | Region override for the aws backend |
//! | AWS_ENDPOINT | - | Endpoint override (LocalStack, MinIO) |

use crate::error::{RunError, RunResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_PARTITION_ATTRIBUTE: &str = "ReplicationRuleId";
const DEFAULT_VALUE_ATTRIBUTE: &str = "ObjectKeyVersionId";
const DEFAULT_PRIORITY: i32 = 10;
const DEFAULT_REPORT_PREFIX: &str = "report/";
const DEFAULT_LOCAL_PATH: &str = "./replicate-data";

/// Suffix appended to the partition key to form the manifest object key
pub const MANIFEST_SUFFIX: &str = ".csv";

/// Which collaborator implementations the binary wires up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process stores, nothing persisted (smoke runs)
    Memory,
    /// Fixture file for records, local directory for manifests and jobs
    Local,
    /// DynamoDB, S3 and S3 Control (requires the `aws` feature)
    Aws,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "aws") {
            BackendType::Aws
        } else {
            BackendType::Local
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(BackendType::Memory),
            "local" | "localfs" => Ok(BackendType::Local),
            "aws" => Ok(BackendType::Aws),
            other => Err(RunError::Config(format!(
                "unknown backend: {}. Use 'memory', 'local', or 'aws'",
                other
            ))),
        }
    }
}

/// Shape of the key-value query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Attribute holding the partition key
    pub partition_attribute: String,
    /// Attribute holding `<object-key>#<version-id>`
    pub value_attribute: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            partition_attribute: DEFAULT_PARTITION_ATTRIBUTE.to_string(),
            value_attribute: DEFAULT_VALUE_ATTRIBUTE.to_string(),
        }
    }
}

impl QueryConfig {
    /// Key condition with `:id` bound to the partition key value
    pub fn key_condition(&self) -> String {
        format!("{} = :id", self.partition_attribute)
    }

    /// Attributes to project: partition key and composite value only
    pub fn projection(&self) -> Vec<String> {
        vec![
            self.partition_attribute.clone(),
            self.value_attribute.clone(),
        ]
    }
}

/// Which tasks the completion report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportScope {
    AllTasks,
    FailedTasksOnly,
}

impl ReportScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportScope::AllTasks => "AllTasks",
            ReportScope::FailedTasksOnly => "FailedTasksOnly",
        }
    }
}

/// Batch job settings that do not change between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Job priority (higher runs first)
    pub priority: i32,
    /// Hold the job until someone confirms it
    pub confirmation_required: bool,
    /// Write a completion report
    pub report_enabled: bool,
    /// Key prefix of the completion report inside the manifest bucket
    pub report_prefix: String,
    /// Which tasks the report lists
    pub report_scope: ReportScope,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            priority: DEFAULT_PRIORITY,
            confirmation_required: false,
            report_enabled: true,
            report_prefix: DEFAULT_REPORT_PREFIX.to_string(),
            report_scope: ReportScope::AllTasks,
        }
    }
}

/// Endpoint overrides for the aws backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region override (SDK default chain otherwise)
    pub region: Option<String>,
    /// Custom endpoint (LocalStack, MinIO)
    pub endpoint: Option<String>,
}

/// Immutable inputs for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Key-value table to query
    pub table_name: String,
    /// Partition key value; also names the manifest object
    pub partition_key: String,
    /// Bucket written into every manifest row
    pub source_bucket: String,
    /// Bucket receiving the manifest and the job report
    pub manifest_bucket: String,
    /// Account that owns the batch job
    pub account_id: String,
    /// Role the control plane assumes while running the job
    pub role_arn: String,
    #[serde(default)]
    pub backend: BackendType,
    /// Root directory for the local backend
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub aws: AwsConfig,
}

impl RunConfig {
    /// Load from `REPLICATE_CONFIG` if set, otherwise from the environment
    pub fn load() -> RunResult<Self> {
        let config = match std::env::var("REPLICATE_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file
    pub fn from_file(path: &Path) -> RunResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RunError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> RunResult<Self> {
        toml::from_str(text).map_err(|e| RunError::Config(format!("invalid TOML: {}", e)))
    }

    /// Build from the process environment
    pub fn from_env() -> RunResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> RunResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .ok_or_else(|| RunError::Config(format!("missing environment variable {}", name)))
        };

        let backend = match lookup("REPLICATE_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendType::default(),
        };

        let defaults = JobConfig::default();
        let job = JobConfig {
            priority: match lookup("REPLICATE_PRIORITY") {
                Some(value) => value.trim().parse().map_err(|_| {
                    RunError::Config(format!("REPLICATE_PRIORITY is not an integer: {}", value))
                })?,
                None => defaults.priority,
            },
            confirmation_required: lookup("REPLICATE_CONFIRMATION_REQUIRED")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.confirmation_required),
            report_prefix: lookup("REPLICATE_REPORT_PREFIX").unwrap_or(defaults.report_prefix),
            ..defaults
        };

        Ok(RunConfig {
            table_name: required("table_name")?,
            partition_key: required("replication_rule")?,
            source_bucket: required("src_bucket")?,
            manifest_bucket: required("bucket_name")?,
            account_id: required("account_id")?,
            role_arn: required("replication_role")?,
            backend,
            local_path: Some(
                lookup("REPLICATE_LOCAL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH)),
            ),
            query: QueryConfig::default(),
            job,
            aws: AwsConfig {
                region: lookup("AWS_REGION"),
                endpoint: lookup("AWS_ENDPOINT"),
            },
        })
    }

    /// Config for tests and in-memory runs
    pub fn test(partition_key: &str) -> Self {
        RunConfig {
            table_name: "replication-events".to_string(),
            partition_key: partition_key.to_string(),
            source_bucket: "src".to_string(),
            manifest_bucket: "manifests".to_string(),
            account_id: "123456789012".to_string(),
            role_arn: "arn:aws:iam::123456789012:role/batch-replication".to_string(),
            backend: BackendType::Memory,
            local_path: None,
            query: QueryConfig::default(),
            job: JobConfig::default(),
            aws: AwsConfig::default(),
        }
    }

    /// Reject configs that would fail only after touching external systems
    pub fn validate(&self) -> RunResult<()> {
        let required = [
            ("table_name", &self.table_name),
            ("partition_key", &self.partition_key),
            ("source_bucket", &self.source_bucket),
            ("manifest_bucket", &self.manifest_bucket),
            ("account_id", &self.account_id),
            ("role_arn", &self.role_arn),
            ("query.partition_attribute", &self.query.partition_attribute),
            ("query.value_attribute", &self.query.value_attribute),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RunError::Config(format!("{} must not be empty", name)));
            }
        }
        if self.job.priority < 0 {
            return Err(RunError::Config(format!(
                "job.priority must be >= 0, got {}",
                self.job.priority
            )));
        }
        if self.backend == BackendType::Local {
            for (name, value) in [
                ("partition_key", &self.partition_key),
                ("manifest_bucket", &self.manifest_bucket),
            ] {
                if !is_path_segment(value) {
                    return Err(RunError::Config(format!(
                        "{} must be a single path segment for the local backend: {}",
                        name, value
                    )));
                }
            }
        }
        if self.backend == BackendType::Aws && !cfg!(feature = "aws") {
            return Err(RunError::Config(
                "AWS support not compiled. Rebuild with --features aws".to_string(),
            ));
        }
        Ok(())
    }

    /// Object key of this run's manifest
    pub fn manifest_key(&self) -> String {
        format!("{}{}", self.partition_key, MANIFEST_SUFFIX)
    }

    /// Local backend root, defaulting when unset
    pub fn local_root(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH))
    }
}

/// No separators, no parent references
fn is_path_segment(value: &str) -> bool {
    !value.contains(['/', '\\']) && !value.contains("..")
}
