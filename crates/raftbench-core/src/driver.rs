//! Benchmark driver: fans write proposals out across concurrent issuers.
//!
//! A driver built [`with_sampler`](BenchmarkDriver::with_sampler) samples
//! throughput for exactly the span of the run.

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::command::WriteCommand;
use crate::consensus::Consensus;
use crate::error::CoreResult;
use crate::membership::GateWaiter;
use crate::metrics;
use crate::sampler::PerfSampler;

/// Workload shape for one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Write commands issued by each issuer.
    pub num_txns: u64,

    /// Value size of every command in bytes.
    pub txn_size: usize,

    /// Number of concurrent issuers (0 is treated as 1).
    pub concurrency: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            num_txns: 10_000,
            txn_size: 128,
            concurrency: 1,
        }
    }
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverReport {
    /// Commands handed to the consensus layer (`concurrency * num_txns`).
    pub issued: u64,
    pub committed: u64,
    pub failed: u64,
    /// Wall time from the first issue to the last issuer finishing.
    pub duration: Duration,
    /// `num_txns / duration`.
    ///
    /// Measured on the single end-to-end path: with several issuers this is
    /// per-issuer throughput, not the aggregate.
    pub throughput: f64,
    /// Sampler ticks during the run; 0 without a sampler.
    pub samples: u64,
    pub snapshots: u64,
}

/// Issues write commands against a consensus handle.
pub struct BenchmarkDriver {
    consensus: Arc<dyn Consensus>,
    config: DriverConfig,
    committed: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    // Parked here between runs; moved into its tick task while one is active.
    sampler: Mutex<Option<PerfSampler>>,
}

impl BenchmarkDriver {
    pub fn new(consensus: Arc<dyn Consensus>, config: DriverConfig) -> Self {
        Self {
            consensus,
            config,
            committed: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
            sampler: Mutex::new(None),
        }
    }

    /// Samples with `sampler` while [`BenchmarkDriver::run`] issues writes.
    pub fn with_sampler(self, sampler: PerfSampler) -> Self {
        *self.sampler.lock() = Some(sampler);
        self
    }

    pub fn config(&self) -> DriverConfig {
        self.config
    }

    /// Failed proposals so far, across all issuers.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Waits for the membership gate, then runs the benchmark with the
    /// sampler (if any) ticking alongside.
    pub async fn run(&self, gate: GateWaiter) -> CoreResult<DriverReport> {
        info!("Waiting for cluster quorum before starting benchmark");
        gate.wait().await?;

        let sampling = self.sampler.lock().take().map(PerfSampler::spawn);
        let mut report = self.issue_all().await;

        if let Some(sampling) = sampling {
            let sampler = sampling.stop().await?;
            report.samples = sampler.ticks();
            report.snapshots = sampler.snapshots();
            *self.sampler.lock() = Some(sampler);
        }
        Ok(report)
    }

    /// Runs every issuer to completion and reports duration and throughput.
    ///
    /// Proposal errors are counted and logged; they never stop an issuer.
    pub async fn issue_all(&self) -> DriverReport {
        let concurrency = self.config.concurrency.max(1);
        let num_txns = self.config.num_txns;

        info!(
            node = %self.consensus.name(),
            num_txns,
            txn_size = self.config.txn_size,
            concurrency,
            "Running benchmark"
        );

        let committed_before = self.committed.load(Ordering::Relaxed);
        let failed_before = self.failures.load(Ordering::Relaxed);
        let start = Instant::now();

        let handles: Vec<_> = (0..concurrency as u64)
            .map(|issuer| {
                let consensus = Arc::clone(&self.consensus);
                let committed = Arc::clone(&self.committed);
                let failures = Arc::clone(&self.failures);
                let txn_size = self.config.txn_size;

                tokio::spawn(async move {
                    let mut payload = vec![0u8; txn_size];
                    rand::thread_rng().fill_bytes(&mut payload);
                    let payload = Bytes::from(payload);

                    for n in 0..num_txns {
                        let key = issuer * num_txns + n;
                        let command = WriteCommand::new(key, payload.clone());
                        match consensus.propose(command).await {
                            Ok(_) => {
                                committed.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                failures.fetch_add(1, Ordering::Relaxed);
                                metrics::PROPOSE_FAILURES.inc();
                                warn!(issuer, key, error = %e, "Write command failed");
                            }
                        }
                    }
                })
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Benchmark issuer task aborted");
            }
        }

        let duration = start.elapsed();
        let secs = duration.as_secs_f64();
        let throughput = if secs == 0.0 {
            0.0
        } else {
            num_txns as f64 / secs
        };

        let report = DriverReport {
            issued: concurrency as u64 * num_txns,
            committed: self.committed.load(Ordering::Relaxed) - committed_before,
            failed: self.failures.load(Ordering::Relaxed) - failed_before,
            duration,
            throughput,
            samples: 0,
            snapshots: 0,
        };

        info!(
            duration_ms = duration.as_millis() as u64,
            throughput = report.throughput,
            committed = report.committed,
            failed = report.failed,
            "Benchmark complete"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::JoinRequest;
    use crate::error::CoreError;
    use crate::membership::MembershipGate;
    use crate::sampler::SnapshotPolicy;
    use crate::state_machine::BenchDb;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Applies directly, failing every `fail_every`-th proposal.
    struct FlakyConsensus {
        db: Arc<BenchDb>,
        fail_every: u64,
        calls: AtomicU64,
        keys: Mutex<HashSet<u64>>,
    }

    impl FlakyConsensus {
        fn new(fail_every: u64) -> Self {
            Self {
                db: Arc::new(BenchDb::new()),
                fail_every,
                calls: AtomicU64::new(0),
                keys: Mutex::new(HashSet::new()),
            }
        }
    }

    #[async_trait]
    impl Consensus for FlakyConsensus {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn start(&self) -> CoreResult<()> {
            Ok(())
        }
        fn is_log_empty(&self) -> bool {
            true
        }
        fn member_count(&self) -> usize {
            1
        }
        async fn add_member(&self, _request: JoinRequest) -> CoreResult<usize> {
            Ok(1)
        }
        async fn propose(&self, command: WriteCommand) -> CoreResult<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && call % self.fail_every == 0 {
                return Err(CoreError::propose_failed("injected"));
            }
            self.keys.lock().insert(command.key());
            command.apply(&self.db);
            Ok(call)
        }
        async fn take_snapshot(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_single_issuer_scenario() {
        let consensus = Arc::new(FlakyConsensus::new(0));
        let driver = BenchmarkDriver::new(
            consensus.clone(),
            DriverConfig {
                num_txns: 100,
                txn_size: 16,
                concurrency: 1,
            },
        );
        let (_gate, waiter) = MembershipGate::new(1);

        let report = driver.run(waiter).await.unwrap();

        assert_eq!(report.issued, 100);
        assert_eq!(report.committed, 100);
        assert_eq!(report.failed, 0);
        assert_eq!(consensus.db.stats().write_count, 100);
        assert_eq!(consensus.db.get(42).len(), 16);

        let expected = 100.0 / report.duration.as_secs_f64();
        assert!((report.throughput - expected).abs() < 1e-6 * expected.max(1.0));
    }

    #[tokio::test]
    async fn test_fan_out_issues_concurrency_times_num_txns() {
        let consensus = Arc::new(FlakyConsensus::new(0));
        let driver = BenchmarkDriver::new(
            consensus.clone(),
            DriverConfig {
                num_txns: 50,
                txn_size: 8,
                concurrency: 4,
            },
        );

        let report = driver.issue_all().await;

        assert_eq!(report.issued, 200);
        assert_eq!(report.committed, 200);
        assert_eq!(consensus.db.stats().write_count, 200);
        // Every issuer writes its own key range
        assert_eq!(consensus.keys.lock().len(), 200);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_do_not_stop_issuers() {
        let consensus = Arc::new(FlakyConsensus::new(5));
        let driver = BenchmarkDriver::new(
            consensus.clone(),
            DriverConfig {
                num_txns: 20,
                txn_size: 4,
                concurrency: 2,
            },
        );

        let report = driver.issue_all().await;

        assert_eq!(report.issued, 40);
        assert_eq!(report.failed, 8);
        assert_eq!(report.committed, 32);
        assert_eq!(driver.failures(), 8);
        assert_eq!(consensus.db.stats().write_count, 32);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_one_issuer() {
        let consensus = Arc::new(FlakyConsensus::new(0));
        let driver = BenchmarkDriver::new(
            consensus.clone(),
            DriverConfig {
                num_txns: 10,
                txn_size: 1,
                concurrency: 0,
            },
        );

        let report = driver.issue_all().await;
        assert_eq!(report.issued, 10);
        assert_eq!(consensus.db.stats().write_count, 10);
    }

    #[tokio::test]
    async fn test_run_owns_sampler_for_the_run() {
        let consensus = Arc::new(FlakyConsensus::new(0));
        let sampler = PerfSampler::new(
            consensus.db.clone(),
            consensus.clone(),
            Duration::from_secs(3600),
            SnapshotPolicy::disabled(),
        );
        let driver = BenchmarkDriver::new(
            consensus.clone(),
            DriverConfig {
                num_txns: 30,
                txn_size: 4,
                concurrency: 1,
            },
        )
        .with_sampler(sampler);

        let (_gate, waiter) = MembershipGate::new(1);
        let report = driver.run(waiter).await.unwrap();
        assert_eq!(report.committed, 30);
        assert_eq!(report.samples, 0);
        assert_eq!(report.snapshots, 0);

        // Handed back after the run, ready for the next one.
        let sampler = driver.sampler.lock().take().unwrap();
        assert_eq!(sampler.interval(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_run_fails_when_gate_dropped() {
        let consensus = Arc::new(FlakyConsensus::new(0));
        let driver = BenchmarkDriver::new(consensus.clone(), DriverConfig::default());
        let (gate, waiter) = MembershipGate::new(3);
        drop(gate);

        assert!(matches!(
            driver.run(waiter).await,
            Err(CoreError::GateClosed { target: 3 })
        ));
        assert_eq!(consensus.db.stats().write_count, 0);
    }
}
