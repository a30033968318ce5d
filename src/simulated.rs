//! Simulated Collaborators with Fault Injection
//!
//! Wrappers around any collaborator that fail calls at configured
//! probabilities, driven by one seeded RNG so a failing seed replays exactly.

use crate::batch_job::{BatchJobSpec, ControlPlane};
use crate::collector::{KeyValueStore, Page, QueryRequest};
use crate::manifest::ManifestStore;
use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// Seeded RNG shared by every simulated collaborator in a run
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        DeterministicRng {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.next_u64() % (max - min))
    }

    pub fn gen_bool(&mut self, probability: f64) -> bool {
        let val = self.next_u64() as f64 / u64::MAX as f64;
        val < probability
    }

    /// Fisher-Yates over the whole slice
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        for i in (1..slice.len()).rev() {
            let j = self.gen_range(0, (i + 1) as u64) as usize;
            slice.swap(i, j);
        }
    }
}

/// Fault probabilities per collaborator call
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Probability a key-value query fails
    pub query_fail_prob: f64,
    /// Probability a manifest put fails
    pub put_fail_prob: f64,
    /// Probability a job submission fails
    pub submit_fail_prob: f64,
    /// Probability a failure surfaces as a timeout rather than a rejection
    pub timeout_share: f64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        SimulatedConfig {
            query_fail_prob: 0.02,  // 2%
            put_fail_prob: 0.05,    // 5%
            submit_fail_prob: 0.05, // 5%
            timeout_share: 0.5,
        }
    }
}

impl SimulatedConfig {
    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedConfig {
            query_fail_prob: 0.0,
            put_fail_prob: 0.0,
            submit_fail_prob: 0.0,
            timeout_share: 0.0,
        }
    }

    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedConfig {
            query_fail_prob: 0.10,
            put_fail_prob: 0.25,
            submit_fail_prob: 0.25,
            timeout_share: 0.5,
        }
    }
}

/// Counters for injected faults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedStats {
    pub query_attempts: u64,
    pub query_failures: u64,
    pub put_attempts: u64,
    pub put_failures: u64,
    pub submit_attempts: u64,
    pub submit_failures: u64,
}

struct SimState {
    rng: DeterministicRng,
    stats: SimulatedStats,
}

/// Fault source shared by the three wrappers
#[derive(Clone)]
pub struct FaultInjector {
    config: SimulatedConfig,
    state: Arc<Mutex<SimState>>,
}

#[derive(Clone, Copy)]
enum Call {
    Query,
    Put,
    Submit,
}

impl FaultInjector {
    pub fn new(seed: u64, config: SimulatedConfig) -> Self {
        FaultInjector {
            config,
            state: Arc::new(Mutex::new(SimState {
                rng: DeterministicRng::new(seed),
                stats: SimulatedStats::default(),
            })),
        }
    }

    pub fn stats(&self) -> SimulatedStats {
        self.state.lock().stats.clone()
    }

    /// Draw from the shared RNG (workload generation uses the same stream)
    pub fn gen_range(&self, min: u64, max: u64) -> u64 {
        self.state.lock().rng.gen_range(min, max)
    }

    pub fn gen_bool(&self, probability: f64) -> bool {
        self.state.lock().rng.gen_bool(probability)
    }

    pub fn shuffle<T>(&self, slice: &mut [T]) {
        self.state.lock().rng.shuffle(slice);
    }

    fn check(&self, call: Call) -> IoResult<()> {
        let mut state = self.state.lock();
        let prob = match call {
            Call::Query => {
                state.stats.query_attempts += 1;
                self.config.query_fail_prob
            }
            Call::Put => {
                state.stats.put_attempts += 1;
                self.config.put_fail_prob
            }
            Call::Submit => {
                state.stats.submit_attempts += 1;
                self.config.submit_fail_prob
            }
        };

        if !state.rng.gen_bool(prob) {
            return Ok(());
        }

        match call {
            Call::Query => state.stats.query_failures += 1,
            Call::Put => state.stats.put_failures += 1,
            Call::Submit => state.stats.submit_failures += 1,
        }
        let timeout_share = self.config.timeout_share;
        if state.rng.gen_bool(timeout_share) {
            Err(IoError::new(ErrorKind::TimedOut, "simulated timeout"))
        } else {
            Err(IoError::new(ErrorKind::Other, "simulated failure"))
        }
    }

    /// Wrap a key-value store
    pub fn kv<S: KeyValueStore>(&self, inner: S) -> SimulatedKvStore<S> {
        SimulatedKvStore {
            inner,
            faults: self.clone(),
        }
    }

    /// Wrap a manifest store
    pub fn manifests<S: ManifestStore>(&self, inner: S) -> SimulatedManifestStore<S> {
        SimulatedManifestStore {
            inner,
            faults: self.clone(),
        }
    }

    /// Wrap a control plane
    pub fn plane<P: ControlPlane>(&self, inner: P) -> SimulatedControlPlane<P> {
        SimulatedControlPlane {
            inner,
            faults: self.clone(),
        }
    }
}

pub struct SimulatedKvStore<S> {
    inner: S,
    faults: FaultInjector,
}

impl<S: KeyValueStore> KeyValueStore for SimulatedKvStore<S> {
    fn query<'a>(
        &'a self,
        request: QueryRequest<'a>,
    ) -> Pin<Box<dyn Future<Output = IoResult<Page>> + Send + 'a>> {
        Box::pin(async move {
            self.faults.check(Call::Query)?;
            self.inner.query(request).await
        })
    }
}

pub struct SimulatedManifestStore<S> {
    inner: S,
    faults: FaultInjector,
}

impl<S: ManifestStore> ManifestStore for SimulatedManifestStore<S> {
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            self.faults.check(Call::Put)?;
            self.inner.put(bucket, key, data).await
        })
    }
}

pub struct SimulatedControlPlane<P> {
    inner: P,
    faults: FaultInjector,
}

impl<P: ControlPlane> ControlPlane for SimulatedControlPlane<P> {
    fn create_job<'a>(
        &'a self,
        spec: &'a BatchJobSpec,
    ) -> Pin<Box<dyn Future<Output = IoResult<String>> + Send + 'a>> {
        Box::pin(async move {
            self.faults.check(Call::Submit)?;
            self.inner.create_job(spec).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryManifestStore;

    #[test]
    fn test_same_seed_same_draws() {
        let a = FaultInjector::new(7, SimulatedConfig::default());
        let b = FaultInjector::new(7, SimulatedConfig::default());
        let draws_a: Vec<u64> = (0..16).map(|_| a.gen_range(0, 1000)).collect();
        let draws_b: Vec<u64> = (0..16).map(|_| b.gen_range(0, 1000)).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_shuffle_is_seeded_permutation() {
        let mut a: Vec<u32> = (0..32).collect();
        let mut b = a.clone();
        FaultInjector::new(9, SimulatedConfig::no_faults()).shuffle(&mut a);
        FaultInjector::new(9, SimulatedConfig::no_faults()).shuffle(&mut b);

        assert_eq!(a, b);
        assert_ne!(a, (0..32).collect::<Vec<_>>());
        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_no_faults_passes_through() {
        let faults = FaultInjector::new(1, SimulatedConfig::no_faults());
        let inner = InMemoryManifestStore::new();
        let store = faults.manifests(inner.clone());

        for i in 0..50 {
            store.put("b", &format!("k{}", i), b"x").await.unwrap();
        }

        assert_eq!(inner.len(), 50);
        let stats = faults.stats();
        assert_eq!(stats.put_attempts, 50);
        assert_eq!(stats.put_failures, 0);
    }

    #[tokio::test]
    async fn test_certain_failure_never_reaches_inner() {
        let config = SimulatedConfig {
            put_fail_prob: 1.0,
            ..SimulatedConfig::no_faults()
        };
        let faults = FaultInjector::new(3, config);
        let inner = InMemoryManifestStore::new();
        let store = faults.manifests(inner.clone());

        assert!(store.put("b", "k", b"x").await.is_err());
        assert_eq!(inner.put_count(), 0);
        assert_eq!(faults.stats().put_failures, 1);
    }
}
