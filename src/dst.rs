//! Deterministic Simulation Testing for Manifest Runs
//!
//! Each seed generates a random set of paginated records (with duplicates
//! spread across page boundaries), runs the full pipeline against
//! fault-injecting collaborators, and checks the run's invariants against a
//! shadow copy of the expected manifest.
//!
//! ```text
//! for seed in 0..1000 {
//!     let result = ManifestDSTHarness::new(ManifestDSTConfig::chaos(seed)).run().await;
//!     assert!(result.is_success(), "seed {} violated {:?}", seed, result.invariant_violations);
//! }
//! ```

use crate::config::RunConfig;
use crate::error::RunError;
use crate::manifest::parse;
use crate::pipeline::{run, RunReport};
use crate::record::{decode, ManifestSet, Record};
use crate::simulated::{FaultInjector, SimulatedConfig, SimulatedStats};
use crate::stores::{InMemoryControlPlane, InMemoryKvStore, InMemoryManifestStore};

/// Configuration for one simulated run
#[derive(Debug, Clone)]
pub struct ManifestDSTConfig {
    pub seed: u64,
    pub faults: SimulatedConfig,
    /// Upper bound on distinct object versions generated
    pub max_objects: u64,
    /// Upper bound on records per page
    pub max_page_size: u64,
    /// Probability that a record is emitted again later in the stream
    pub duplicate_prob: f64,
}

impl Default for ManifestDSTConfig {
    fn default() -> Self {
        ManifestDSTConfig {
            seed: 0,
            faults: SimulatedConfig::default(),
            max_objects: 40,
            max_page_size: 8,
            duplicate_prob: 0.3,
        }
    }
}

impl ManifestDSTConfig {
    /// Calm mode - no fault injection
    pub fn calm(seed: u64) -> Self {
        ManifestDSTConfig {
            seed,
            faults: SimulatedConfig::no_faults(),
            ..Default::default()
        }
    }

    pub fn moderate(seed: u64) -> Self {
        ManifestDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        ManifestDSTConfig {
            seed,
            faults: SimulatedConfig::high_chaos(),
            duplicate_prob: 0.5,
            ..Default::default()
        }
    }
}

/// How the simulated run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { job_id: String },
    Failed { stage: &'static str },
}

/// Result of one seed
#[derive(Debug, Clone)]
pub struct ManifestDSTResult {
    pub seed: u64,
    pub outcome: RunOutcome,
    pub records_generated: usize,
    pub expected_rows: usize,
    pub store_stats: SimulatedStats,
    pub invariant_violations: Vec<String>,
}

impl ManifestDSTResult {
    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "seed={} outcome={:?} records={} expected_rows={} violations={}",
            self.seed,
            self.outcome,
            self.records_generated,
            self.expected_rows,
            self.invariant_violations.len()
        )
    }
}

/// Harness owning the simulated collaborators and the shadow state
pub struct ManifestDSTHarness {
    config: ManifestDSTConfig,
    run_config: RunConfig,
    faults: FaultInjector,
    pages: Vec<Vec<Record>>,
    kv: InMemoryKvStore,
    manifests: InMemoryManifestStore,
    plane: InMemoryControlPlane,
}

impl ManifestDSTHarness {
    pub fn new(config: ManifestDSTConfig) -> Self {
        let faults = FaultInjector::new(config.seed, config.faults.clone());
        let run_config = RunConfig::test(&format!("rule-{}", config.seed));
        let pages = Self::generate_pages(&config, &faults, &run_config.partition_key);

        ManifestDSTHarness {
            kv: InMemoryKvStore::with_pages(pages.clone()),
            manifests: InMemoryManifestStore::new(),
            plane: InMemoryControlPlane::new(),
            config,
            run_config,
            faults,
            pages,
        }
    }

    fn generate_pages(
        config: &ManifestDSTConfig,
        rng: &FaultInjector,
        partition_key: &str,
    ) -> Vec<Vec<Record>> {
        let objects = rng.gen_range(0, config.max_objects + 1);
        let mut stream = Vec::new();
        for i in 0..objects {
            let version = rng.gen_range(0, 3);
            // Roughly one in ten values has no separator
            let value = if rng.gen_bool(0.1) {
                format!("obj-{}", i)
            } else {
                format!("dir/obj-{}#v{}", i, version)
            };
            stream.push(value.clone());
            if rng.gen_bool(config.duplicate_prob) {
                stream.push(value);
            }
        }
        // Move duplicates away from their originals so they straddle pages
        rng.shuffle(&mut stream);

        let mut pages = Vec::new();
        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let size = (rng.gen_range(1, config.max_page_size + 1) as usize).min(rest.len());
            let (page, tail) = rest.split_at(size);
            pages.push(page.iter().map(|v| Record::new(partition_key, v.clone())).collect());
            rest = tail;
        }
        pages
    }

    /// Distinct triples across every generated page
    pub fn expected_manifest(&self) -> ManifestSet {
        self.pages
            .iter()
            .flatten()
            .map(|r| decode(r, &self.run_config.source_bucket))
            .collect()
    }

    pub async fn run(self) -> ManifestDSTResult {
        let kv = self.faults.kv(self.kv.clone());
        let manifests = self.faults.manifests(self.manifests.clone());
        let plane = self.faults.plane(self.plane.clone());

        let result = run(&self.run_config, &kv, &manifests, &plane).await;

        let expected = self.expected_manifest();
        let violations = self.check_invariants(&result, &expected);
        let outcome = match &result {
            Ok(report) => RunOutcome::Completed {
                job_id: report.job_id.clone(),
            },
            Err(e) => RunOutcome::Failed { stage: e.stage() },
        };

        ManifestDSTResult {
            seed: self.config.seed,
            outcome,
            records_generated: self.pages.iter().map(Vec::len).sum(),
            expected_rows: expected.len(),
            store_stats: self.faults.stats(),
            invariant_violations: violations,
        }
    }

    fn check_invariants(
        &self,
        result: &Result<RunReport, RunError>,
        expected: &ManifestSet,
    ) -> Vec<String> {
        let mut violations = Vec::new();
        let key = self.run_config.manifest_key();
        let stored = self.manifests.object(&self.run_config.manifest_bucket, &key);
        let submitted = self.plane.submitted();
        let stats = self.faults.stats();

        match result {
            Ok(report) => {
                match &stored {
                    Some(object) => match parse(&object.data) {
                        Ok(rows) if &rows == expected => {}
                        Ok(rows) => violations.push(format!(
                            "manifest has {} rows, expected {}",
                            rows.len(),
                            expected.len()
                        )),
                        Err(e) => violations.push(format!("manifest unreadable: {}", e)),
                    },
                    None => violations.push("run succeeded without a manifest".to_string()),
                }
                if report.unique_refs != expected.len() {
                    violations.push(format!(
                        "report counts {} unique refs, expected {}",
                        report.unique_refs,
                        expected.len()
                    ));
                }
                if submitted.len() != 1 {
                    violations.push(format!("{} jobs submitted, expected 1", submitted.len()));
                }
                if let (Some(spec), Some(object)) = (submitted.first(), &stored) {
                    if spec.manifest.etag != object.etag {
                        violations.push("job references a stale manifest ETag".to_string());
                    }
                }
            }
            Err(RunError::StoreQuery { .. }) => {
                if self.manifests.put_count() != 0 {
                    violations.push("manifest written after a failed query".to_string());
                }
                if stats.put_attempts != 0 {
                    violations.push("upload attempted after a failed query".to_string());
                }
                if stats.submit_attempts != 0 {
                    violations.push("job submitted after a failed query".to_string());
                }
            }
            Err(RunError::Upload { .. }) => {
                if stats.put_attempts != 1 {
                    violations.push("upload was retried".to_string());
                }
                if stats.submit_attempts != 0 {
                    violations.push("job submitted after a failed upload".to_string());
                }
            }
            Err(RunError::JobSubmission { .. }) => {
                if !submitted.is_empty() {
                    violations.push("failed submission recorded a job".to_string());
                }
                if stats.submit_attempts != 1 {
                    violations.push("submission was retried".to_string());
                }
            }
            Err(RunError::Config(msg)) => {
                violations.push(format!("unexpected config error: {}", msg));
            }
        }
        violations
    }
}

/// Run the harness for every seed in `seeds`
pub async fn run_dst_batch<F>(seeds: std::ops::Range<u64>, make_config: F) -> Vec<ManifestDSTResult>
where
    F: Fn(u64) -> ManifestDSTConfig,
{
    let mut results = Vec::new();
    for seed in seeds {
        results.push(ManifestDSTHarness::new(make_config(seed)).run().await);
    }
    results
}

/// One-line summary of a batch
pub fn summarize_batch(results: &[ManifestDSTResult]) -> String {
    let completed = results
        .iter()
        .filter(|r| matches!(r.outcome, RunOutcome::Completed { .. }))
        .count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();
    format!(
        "{} runs, {} completed, {} failed by injected faults, invariant violations in seeds {:?}",
        results.len(),
        completed,
        results.len() - completed,
        failed_seeds
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let a = ManifestDSTHarness::new(ManifestDSTConfig::calm(42));
        let b = ManifestDSTHarness::new(ManifestDSTConfig::calm(42));
        assert_eq!(a.pages, b.pages);
    }

    #[test]
    fn test_pages_respect_size_bound() {
        let harness = ManifestDSTHarness::new(ManifestDSTConfig::calm(5));
        assert!(harness.pages.iter().all(|p| !p.is_empty() && p.len() <= 8));
    }

    #[tokio::test]
    async fn test_calm_run_completes() {
        let result = ManifestDSTHarness::new(ManifestDSTConfig::calm(11)).run().await;
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(matches!(result.outcome, RunOutcome::Completed { .. }));
    }
}
