//! Periodic throughput/latency sampling and snapshot triggering.
//!
//! Every interval the sampler reads the state machine's cumulative counters,
//! reports the delta since the previous tick, and asks the consensus layer for
//! a snapshot once enough bytes have been written since the last one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::consensus::Consensus;
use crate::error::{CoreError, CoreResult};
use crate::metrics;
use crate::state_machine::BenchDb;

/// When to request log compaction, in bytes written since the last snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotPolicy {
    /// Byte threshold; `<= 0` disables snapshots.
    pub threshold_bytes: i64,

    /// Bytes accounted per applied write.
    pub txn_size: u64,
}

impl SnapshotPolicy {
    pub fn new(threshold_bytes: i64, txn_size: u64) -> Self {
        Self {
            threshold_bytes,
            txn_size,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold_bytes > 0
    }

    /// Whether `writes_since` writes of `txn_size` bytes reach the threshold.
    pub fn should_snapshot(&self, writes_since: u64) -> bool {
        self.is_enabled()
            && writes_since.saturating_mul(self.txn_size) >= self.threshold_bytes as u64
    }
}

/// Result of one sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Writes applied during the interval.
    pub writes: u64,
    /// Writes applied since process start.
    pub total_writes: u64,
    /// `writes / interval_secs`.
    pub interval_throughput: f64,
    /// Mean issue-to-apply latency of the interval's writes.
    pub avg_delay_ms: f64,
    pub snapshot_triggered: bool,
}

/// Samples [`BenchDb`] counters on a fixed interval.
pub struct PerfSampler {
    db: Arc<BenchDb>,
    consensus: Arc<dyn Consensus>,
    interval: Duration,
    policy: SnapshotPolicy,
    last_write_count: u64,
    last_latency_ms: u64,
    last_snapshot_write_count: u64,
    ticks: u64,
    snapshots: u64,
}

impl PerfSampler {
    /// Creates a sampler whose baselines start at the current counters.
    pub fn new(
        db: Arc<BenchDb>,
        consensus: Arc<dyn Consensus>,
        interval: Duration,
        policy: SnapshotPolicy,
    ) -> Self {
        let stats = db.stats();
        Self {
            db,
            consensus,
            interval,
            policy,
            last_write_count: stats.write_count,
            last_latency_ms: stats.cumulative_latency_ms,
            last_snapshot_write_count: stats.write_count,
            ticks: 0,
            snapshots: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Snapshots successfully requested so far.
    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }

    /// Takes one sample and evaluates the snapshot policy.
    pub async fn tick(&mut self) -> Sample {
        let stats = self.db.stats();
        let writes = stats.write_count.saturating_sub(self.last_write_count);
        let latency = stats
            .cumulative_latency_ms
            .saturating_sub(self.last_latency_ms);

        let interval_secs = self.interval.as_secs_f64();
        let interval_throughput = if interval_secs > 0.0 {
            writes as f64 / interval_secs
        } else {
            0.0
        };
        let avg_delay_ms = latency as f64 / writes.max(1) as f64;

        self.last_write_count = stats.write_count;
        self.last_latency_ms = stats.cumulative_latency_ms;
        self.ticks += 1;
        metrics::INTERVAL_THROUGHPUT.set(interval_throughput);

        info!(
            writes,
            total_writes = stats.write_count,
            throughput = interval_throughput,
            avg_delay_ms,
            "Perf sample"
        );

        let since_snapshot = stats
            .write_count
            .saturating_sub(self.last_snapshot_write_count);
        let mut snapshot_triggered = false;
        if self.policy.should_snapshot(since_snapshot) {
            info!(
                writes_since_snapshot = since_snapshot,
                threshold_bytes = self.policy.threshold_bytes,
                "Snapshot threshold reached"
            );
            match self.consensus.take_snapshot().await {
                Ok(()) => {
                    self.last_snapshot_write_count = stats.write_count;
                    self.snapshots += 1;
                    snapshot_triggered = true;
                }
                Err(e) => {
                    // Baseline kept so the next tick retries.
                    warn!(error = %e, "Snapshot request failed");
                }
            }
        }

        Sample {
            writes,
            total_writes: stats.write_count,
            interval_throughput,
            avg_delay_ms,
            snapshot_triggered,
        }
    }

    /// Runs the sampler on its interval until the returned handle is stopped.
    pub fn spawn(mut self) -> SamplerHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            self
        });

        info!(interval_secs = period.as_secs_f64(), "Perf sampler started");
        SamplerHandle {
            stop: stop_tx,
            handle,
        }
    }
}

/// Handle to a running [`PerfSampler`].
pub struct SamplerHandle {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<PerfSampler>,
}

impl SamplerHandle {
    /// Stops the tick loop and returns the sampler.
    pub async fn stop(self) -> CoreResult<PerfSampler> {
        // The loop may already have exited; a closed channel is fine.
        let _ = self.stop.send(());
        let sampler = self
            .handle
            .await
            .map_err(|e| CoreError::internal(format!("perf sampler task failed: {}", e)))?;

        info!(
            ticks = sampler.ticks,
            snapshots = sampler.snapshots,
            "Perf sampler stopped"
        );
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::WriteCommand;
    use crate::consensus::JoinRequest;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct SnapshotCounter {
        calls: AtomicU64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Consensus for SnapshotCounter {
        fn name(&self) -> &str {
            "counter"
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
        async fn propose(&self, _command: WriteCommand) -> CoreResult<u64> {
            Ok(0)
        }
        async fn take_snapshot(&self) -> CoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoreError::internal("disk full"));
            }
            Ok(())
        }
    }

    fn write_n(db: &BenchDb, n: u64, issued_at_ms: u64) {
        for key in 0..n {
            db.put(key, Bytes::from_static(b"0123456789abcdef"), issued_at_ms);
        }
    }

    #[test]
    fn test_policy_threshold() {
        let policy = SnapshotPolicy::new(100, 16);
        assert!(!policy.should_snapshot(6)); // 96 bytes
        assert!(policy.should_snapshot(7)); // 112 bytes = ceil(100/16) writes

        assert!(!SnapshotPolicy::new(0, 16).should_snapshot(1_000_000));
        assert!(!SnapshotPolicy::new(-5, 16).should_snapshot(1_000_000));
        assert!(!SnapshotPolicy::disabled().is_enabled());
    }

    #[tokio::test]
    async fn test_tick_computes_interval_stats() {
        let clock = Arc::new(ManualClock::new(10_000));
        let db = Arc::new(BenchDb::with_clock(clock.clone()));
        let consensus = Arc::new(SnapshotCounter::default());
        let mut sampler = PerfSampler::new(
            db.clone(),
            consensus,
            Duration::from_secs(2),
            SnapshotPolicy::disabled(),
        );

        write_n(&db, 10, 9_996); // 4ms each
        let sample = sampler.tick().await;
        assert_eq!(sample.writes, 10);
        assert_eq!(sample.total_writes, 10);
        assert_eq!(sample.interval_throughput, 5.0);
        assert_eq!(sample.avg_delay_ms, 4.0);

        write_n(&db, 4, 9_990); // 10ms each
        let sample = sampler.tick().await;
        assert_eq!(sample.writes, 4);
        assert_eq!(sample.total_writes, 14);
        assert_eq!(sample.interval_throughput, 2.0);
        assert_eq!(sample.avg_delay_ms, 10.0);
    }

    #[tokio::test]
    async fn test_idle_interval_does_not_divide_by_zero() {
        let db = Arc::new(BenchDb::new());
        let consensus = Arc::new(SnapshotCounter::default());
        let mut sampler = PerfSampler::new(
            db,
            consensus,
            Duration::from_secs(1),
            SnapshotPolicy::disabled(),
        );

        let sample = sampler.tick().await;
        assert_eq!(sample.writes, 0);
        assert_eq!(sample.interval_throughput, 0.0);
        assert_eq!(sample.avg_delay_ms, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_fires_once_at_threshold() {
        let db = Arc::new(BenchDb::new());
        let consensus = Arc::new(SnapshotCounter::default());
        let mut sampler = PerfSampler::new(
            db.clone(),
            consensus.clone(),
            Duration::from_secs(1),
            SnapshotPolicy::new(100, 16),
        );

        write_n(&db, 6, crate::clock::now_ms());
        assert!(!sampler.tick().await.snapshot_triggered);
        assert_eq!(consensus.calls.load(Ordering::SeqCst), 0);

        write_n(&db, 1, crate::clock::now_ms());
        assert!(sampler.tick().await.snapshot_triggered);
        assert_eq!(consensus.calls.load(Ordering::SeqCst), 1);

        // Baseline reset: nothing new written, no second snapshot
        assert!(!sampler.tick().await.snapshot_triggered);
        write_n(&db, 6, crate::clock::now_ms());
        assert!(!sampler.tick().await.snapshot_triggered);
        assert_eq!(consensus.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sampler.snapshots(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_retries_next_tick() {
        let db = Arc::new(BenchDb::new());
        let consensus = Arc::new(SnapshotCounter::default());
        consensus.fail.store(true, Ordering::SeqCst);
        let mut sampler = PerfSampler::new(
            db.clone(),
            consensus.clone(),
            Duration::from_secs(1),
            SnapshotPolicy::new(32, 16),
        );

        write_n(&db, 2, crate::clock::now_ms());
        assert!(!sampler.tick().await.snapshot_triggered);

        consensus.fail.store(false, Ordering::SeqCst);
        assert!(sampler.tick().await.snapshot_triggered);
        assert_eq!(consensus.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sampler_ticks_until_stopped() {
        let db = Arc::new(BenchDb::new());
        let consensus = Arc::new(SnapshotCounter::default());
        let sampler = PerfSampler::new(
            db,
            consensus,
            Duration::from_secs(1),
            SnapshotPolicy::disabled(),
        );

        let handle = sampler.spawn();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let sampler = handle.stop().await.unwrap();

        assert_eq!(sampler.ticks(), 3);
    }
}
