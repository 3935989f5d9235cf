//! Core of the raftbench load-generation harness.
//!
//! A replicated write benchmark: a [`BenchDb`] state machine fed by a
//! [`Consensus`] implementation, a [`MembershipGate`] holding the run until
//! the cluster reaches its target size, a [`BenchmarkDriver`] issuing writes,
//! and a [`PerfSampler`] reporting interval throughput and triggering
//! snapshots.

pub mod clock;
pub mod command;
pub mod config;
pub mod consensus;
pub mod driver;
pub mod error;
pub mod local;
pub mod membership;
pub mod metrics;
pub mod sampler;
pub mod state_machine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command::WriteCommand;
pub use config::{BenchConfig, LoggingConfig, NodeConfig, PerfConfig, WorkloadConfig};
pub use consensus::{Consensus, JoinRequest};
pub use driver::{BenchmarkDriver, DriverConfig, DriverReport};
pub use error::{CoreError, CoreResult};
pub use local::{LocalConsensus, LocalConsensusConfig, SnapshotMeta};
pub use membership::{GateWaiter, MembershipGate};
pub use sampler::{PerfSampler, Sample, SamplerHandle, SnapshotPolicy};
pub use state_machine::{BenchDb, DbStats, HISTOGRAM_BUCKETS};
