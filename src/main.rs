//! Batch Replication Manifest Runner
//!
//! Builds the manifest for one replication rule and submits the batch job,
//! then exits. Configuration is described in `config.rs`; logging in
//! `observability.rs`.
//!
//! ## Backends
//!
//! | REPLICATE_BACKEND | Records | Manifest | Job |
//! |-------------------|---------|----------|-----|
//! | memory | none (empty manifest) | in-process | in-process |
//! | local | `<root>/records.json` | `<root>/<bucket>/<key>` | `<root>/jobs/<id>.json` |
//! | aws | DynamoDB Query | S3 PUT | S3 Control CreateJob |

use replication_manifest::batch_job::ControlPlane;
use replication_manifest::collector::KeyValueStore;
use replication_manifest::config::{BackendType, RunConfig};
use replication_manifest::manifest::ManifestStore;
use replication_manifest::observability::{init_tracing, LogConfig};
use replication_manifest::pipeline::{log_failure, run};
use replication_manifest::stores::{
    load_fixture, InMemoryControlPlane, InMemoryKvStore, InMemoryManifestStore,
    LocalControlPlane, LocalFsManifestStore,
};
use replication_manifest::RunError;
use tracing::{error, info};

const FIXTURE_FILE: &str = "records.json";

struct Collaborators {
    kv: Box<dyn KeyValueStore>,
    manifests: Box<dyn ManifestStore>,
    plane: Box<dyn ControlPlane>,
}

async fn build_collaborators(config: &RunConfig) -> Result<Collaborators, RunError> {
    match config.backend {
        BackendType::Memory => Ok(Collaborators {
            kv: Box::new(InMemoryKvStore::new()),
            manifests: Box::new(InMemoryManifestStore::new()),
            plane: Box::new(InMemoryControlPlane::new()),
        }),
        BackendType::Local => {
            let root = config.local_root();
            let fixture = root.join(FIXTURE_FILE);
            let kv = load_fixture(&fixture, &config.partition_key).map_err(|e| {
                RunError::Config(format!("cannot load {}: {}", fixture.display(), e))
            })?;
            Ok(Collaborators {
                kv: Box::new(kv),
                manifests: Box::new(LocalFsManifestStore::new(root.clone())),
                plane: Box::new(LocalControlPlane::new(&root)),
            })
        }
        #[cfg(feature = "aws")]
        BackendType::Aws => {
            use replication_manifest::stores::aws::load_sdk_config;
            use replication_manifest::stores::{DynamoDbKvStore, S3ControlPlane, S3ManifestStore};

            let sdk_config = load_sdk_config(&config.aws).await;
            Ok(Collaborators {
                kv: Box::new(DynamoDbKvStore::new(&sdk_config)),
                manifests: Box::new(S3ManifestStore::new(config.aws.clone())),
                plane: Box::new(S3ControlPlane::new(&sdk_config)),
            })
        }
        #[cfg(not(feature = "aws"))]
        BackendType::Aws => Err(RunError::Config(
            "AWS support not compiled. Rebuild with --features aws".to_string(),
        )),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(&LogConfig::from_env())?;

    let config = match RunConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(stage = e.stage(), error = %e, "configuration rejected");
            return Err(e.into());
        }
    };
    info!(
        backend = ?config.backend,
        table = %config.table_name,
        partition_key = %config.partition_key,
        manifest_bucket = %config.manifest_bucket,
        "configuration loaded"
    );

    let collaborators = match build_collaborators(&config).await {
        Ok(collaborators) => collaborators,
        Err(e) => {
            log_failure(&config, &e);
            return Err(e.into());
        }
    };
    // Stage failures are logged where they happen
    let report = run(
        &config,
        collaborators.kv.as_ref(),
        collaborators.manifests.as_ref(),
        collaborators.plane.as_ref(),
    )
    .await?;
    info!(
        job_id = %report.job_id,
        rows = report.unique_refs,
        "finished batch generation for replication rule {}",
        report.partition_key
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
