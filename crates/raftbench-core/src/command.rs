//! Write command replicated through the consensus log.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::state_machine::BenchDb;

/// One write intent: store `value` under `key`.
///
/// The issue timestamp is captured at construction and travels with the
/// command through the log so the state machine can measure end-to-end
/// commit latency when the command is finally applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCommand {
    key: u64,
    value: Bytes,
    #[serde(rename = "timest")]
    issued_at_ms: u64,
}

impl WriteCommand {
    /// Name of the command in the log.
    pub const NAME: &'static str = "write";

    /// Creates a new write command stamped with the current time.
    pub fn new(key: u64, value: impl Into<Bytes>) -> Self {
        Self::with_timestamp(key, value, clock::now_ms())
    }

    /// Creates a write command with an explicit issue time.
    pub fn with_timestamp(key: u64, value: impl Into<Bytes>, issued_at_ms: u64) -> Self {
        Self {
            key,
            value: value.into(),
            issued_at_ms,
        }
    }

    /// Dispatch token used by the consensus layer.
    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn issued_at_ms(&self) -> u64 {
        self.issued_at_ms
    }

    /// Applies the committed command to the state machine.
    ///
    /// Consumes the command: a committed entry is applied exactly once.
    pub fn apply(self, db: &BenchDb) {
        db.put(self.key, self.value, self.issued_at_ms);
    }
}
