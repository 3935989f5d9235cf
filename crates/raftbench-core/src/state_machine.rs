//! Replicated key/value state machine.
//!
//! The consensus layer replays every committed [`WriteCommand`] into a
//! [`BenchDb`]. Besides the key/value store it keeps the counters the
//! performance sampler reads: total applied writes, the running sum of
//! issue-to-apply latency, and a small latency histogram.
//!
//! # Key wrap-around
//!
//! When the store has been pre-filled with [`BenchDb::fill`], every put is
//! remapped to `key % store_len`. Pre-filling exists to pin the process at a
//! target memory footprint, and wrapping keeps writes inside that working set
//! instead of growing it. A store that was never pre-filled uses keys as-is.
//!
//! [`WriteCommand`]: crate::command::WriteCommand

use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::metrics;

/// Number of buckets in the latency histogram (`delay % 10`).
pub const HISTOGRAM_BUCKETS: usize = 10;

/// Point-in-time view of the write counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Commands applied since process start.
    pub write_count: u64,
    /// Sum of `apply_time - issue_time` over all applied commands.
    pub cumulative_latency_ms: u64,
}

struct DbInner {
    store: HashMap<u64, Bytes>,
    histogram: [u64; HISTOGRAM_BUCKETS],
    wrap_keys: bool,
}

/// The key/value database driven by committed commands.
pub struct BenchDb {
    inner: Mutex<DbInner>,
    // Written only while `inner` is locked; read lock-free by the sampler.
    write_count: AtomicU64,
    cumulative_latency_ms: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl BenchDb {
    /// Creates an empty database on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty database on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(DbInner {
                store: HashMap::new(),
                histogram: [0; HISTOGRAM_BUCKETS],
                wrap_keys: false,
            }),
            write_count: AtomicU64::new(0),
            cumulative_latency_ms: AtomicU64::new(0),
            clock,
        }
    }

    /// Retrieves the value for a given key, empty if absent.
    pub fn get(&self, key: u64) -> Bytes {
        self.inner.lock().store.get(&key).cloned().unwrap_or_default()
    }

    /// Like [`BenchDb::get`], but distinguishes an absent key.
    pub fn try_get(&self, key: u64) -> Option<Bytes> {
        self.inner.lock().store.get(&key).cloned()
    }

    /// Sets the value for a given key and records the apply latency.
    pub fn put(&self, key: u64, value: Bytes, issued_at_ms: u64) {
        let mut inner = self.inner.lock();

        let len = inner.store.len() as u64;
        let key = if inner.wrap_keys && len > 0 {
            key % len
        } else {
            key
        };
        inner.store.insert(key, value);

        // Clocks on different nodes may disagree; a negative delay counts as 0.
        let delay = self.clock.now_ms().saturating_sub(issued_at_ms);
        inner.histogram[(delay % HISTOGRAM_BUCKETS as u64) as usize] += 1;
        self.write_count.fetch_add(1, Ordering::Release);
        self.cumulative_latency_ms.fetch_add(delay, Ordering::Release);
        drop(inner);

        metrics::WRITES_APPLIED.inc();
        metrics::APPLY_LATENCY_MS.observe(delay as f64);
    }

    /// Serializes the whole store into an opaque snapshot blob.
    ///
    /// The store lock is held for the duration of the encode, so the blob
    /// never contains a half-applied put.
    pub fn save(&self) -> CoreResult<Vec<u8>> {
        let inner = self.inner.lock();
        let blob = serde_json::to_vec(&inner.store).map_err(CoreError::serialization)?;
        debug!(keys = inner.store.len(), bytes = blob.len(), "State machine saved");
        Ok(blob)
    }

    /// Accepts a snapshot blob produced by [`BenchDb::save`].
    ///
    /// Installing snapshot contents is owned by the consensus layer; this
    /// state machine accepts the blob and leaves its store untouched.
    pub fn recovery(&self, blob: &[u8]) -> CoreResult<()> {
        debug!(bytes = blob.len(), "Snapshot recovery requested (no-op)");
        Ok(())
    }

    /// Pre-populates keys `0..num_keys` with random values of `value_size` bytes.
    ///
    /// Must run before any command is applied. Once filled, puts wrap their key
    /// modulo the store length (see module docs).
    pub fn fill(&self, num_keys: u64, value_size: usize) {
        let mut inner = self.inner.lock();
        let mut rng = rand::thread_rng();

        inner.store.reserve(num_keys as usize);
        for key in 0..num_keys {
            let mut value = vec![0u8; value_size];
            rng.fill_bytes(&mut value);
            inner.store.insert(key, Bytes::from(value));
        }
        inner.wrap_keys = num_keys > 0;

        info!(
            keys = num_keys,
            value_size,
            approx_bytes = num_keys.saturating_mul(value_size as u64),
            "State machine pre-filled"
        );
    }

    /// Lock-free read of the write counters; may trail an in-flight put.
    pub fn stats(&self) -> DbStats {
        DbStats {
            write_count: self.write_count.load(Ordering::Acquire),
            cumulative_latency_ms: self.cumulative_latency_ms.load(Ordering::Acquire),
        }
    }

    /// Copy of the `delay % 10` latency histogram.
    pub fn histogram(&self) -> [u64; HISTOGRAM_BUCKETS] {
        self.inner.lock().histogram
    }

    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BenchDb {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BenchDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchDb")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
