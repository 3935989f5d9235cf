//! Node lifecycle: storage, state machine, consensus, cluster mode, benchmark.
//!
//! A node either bootstraps a new cluster (empty log, nothing to join),
//! joins an existing one through its leader, or recovers from its own log.
//! Only the bootstrapping node runs the benchmark.

use raftbench_core::{
    BenchConfig, BenchDb, BenchmarkDriver, Consensus, CoreResult, DriverReport, GateWaiter,
    JoinRequest, LocalConsensus, LocalConsensusConfig, MembershipGate, PerfSampler,
};
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{NodeError, NodeResult};
use crate::join::JoinClient;
use crate::server::{self, AppState};

/// How this node entered the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMode {
    /// First-time cluster initialization; this node drives the benchmark.
    Bootstrap,
    /// Joined the cluster through `leader`.
    Join { leader: String },
    /// Restarted over an existing log.
    Recover,
}

impl NodeMode {
    pub fn decide(join: Option<&str>, log_empty: bool) -> Self {
        match join {
            Some(leader) if !leader.is_empty() => Self::Join {
                leader: leader.to_string(),
            },
            _ if log_empty => Self::Bootstrap,
            _ => Self::Recover,
        }
    }

    pub fn runs_benchmark(&self) -> bool {
        matches!(self, Self::Bootstrap)
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Join { leader } => write!(f, "join({})", leader),
            Self::Recover => write!(f, "recover"),
        }
    }
}

/// A node with storage, consensus and cluster membership settled.
pub struct Node {
    config: BenchConfig,
    mode: NodeMode,
    db: Arc<BenchDb>,
    consensus: Arc<LocalConsensus>,
    gate: Arc<MembershipGate>,
    waiter: Option<GateWaiter>,
}

impl Node {
    /// Runs every setup step up to (not including) serving HTTP.
    ///
    /// Any error here is fatal for the process.
    pub async fn prepare(config: BenchConfig) -> NodeResult<Self> {
        let data_dir = config.node.data_dir.clone();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|source| NodeError::Storage {
                path: data_dir.display().to_string(),
                source,
            })?;

        let db = Arc::new(BenchDb::new());
        let prefill = config.prefill_keys();
        if prefill > 0 {
            info!(
                keys = prefill,
                value_size = config.bench.txn_size,
                footprint_bytes = config.perf.memory_footprint_bytes,
                "Pre-filling state machine"
            );
            db.fill(prefill, config.bench.txn_size);
        }

        let name = config.connection_string();
        let consensus = Arc::new(
            LocalConsensus::bootstrap(
                name.clone(),
                &data_dir,
                db.clone(),
                LocalConsensusConfig::default(),
            )
            .await?,
        );
        consensus.start().await?;

        let mode = NodeMode::decide(config.node.join.as_deref(), consensus.is_log_empty());
        info!(node = %name, mode = %mode, "Cluster mode decided");

        match &mode {
            NodeMode::Join { leader } => {
                let client = JoinClient::new()?;
                client.join(leader, &JoinRequest::for_address(&name)).await?;
            }
            NodeMode::Bootstrap => {
                consensus.add_member(JoinRequest::for_address(&name)).await?;
            }
            NodeMode::Recover => {
                info!(
                    node = %name,
                    commit_index = consensus.commit_index(),
                    "Recovered from existing log; benchmark will not run"
                );
            }
        }

        let (gate, waiter) = MembershipGate::new(config.bench.peers);
        gate.observe(consensus.member_count());

        Ok(Self {
            config,
            mode,
            db,
            consensus,
            gate: Arc::new(gate),
            waiter: Some(waiter),
        })
    }

    pub fn mode(&self) -> &NodeMode {
        &self.mode
    }

    pub fn db(&self) -> &Arc<BenchDb> {
        &self.db
    }

    pub fn consensus(&self) -> &Arc<LocalConsensus> {
        &self.consensus
    }

    pub fn gate(&self) -> &Arc<MembershipGate> {
        &self.gate
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            consensus: self.consensus.clone(),
            db: self.db.clone(),
            gate: self.gate.clone(),
        }
    }

    /// Spawns the benchmark task on the bootstrapping node.
    ///
    /// Returns `None` on joining or recovering nodes, or if already spawned.
    pub fn spawn_benchmark(&mut self) -> Option<JoinHandle<CoreResult<DriverReport>>> {
        if !self.mode.runs_benchmark() {
            return None;
        }
        let waiter = self.waiter.take()?;

        let sampler = PerfSampler::new(
            self.db.clone(),
            self.consensus.clone(),
            self.config.perf.show_interval(),
            self.config.snapshot_policy(),
        );
        let driver = BenchmarkDriver::new(self.consensus.clone(), self.config.driver_config())
            .with_sampler(sampler);

        Some(tokio::spawn(run_benchmark(driver, waiter)))
    }

    /// Binds the HTTP listener, starts the benchmark if this node owns it,
    /// and serves until shutdown.
    pub async fn run(mut self) -> NodeResult<()> {
        let bind_addr = format!("{}:{}", self.config.node.host, self.config.node.port);
        let listener = TcpListener::bind(&bind_addr).await?;

        let benchmark = self.spawn_benchmark();
        let app = server::build_router(self.app_state());
        server::serve(listener, app).await?;

        if let Some(handle) = benchmark {
            if !handle.is_finished() {
                info!("Benchmark still running at shutdown; aborting it");
            }
            handle.abort();
        }
        Ok(())
    }
}

async fn run_benchmark(driver: BenchmarkDriver, waiter: GateWaiter) -> CoreResult<DriverReport> {
    let report = driver.run(waiter).await?;

    info!(
        issued = report.issued,
        committed = report.committed,
        failed = report.failed,
        duration_ms = report.duration.as_millis() as u64,
        throughput = report.throughput,
        samples = report.samples,
        snapshots = report.snapshots,
        "Benchmark finished"
    );
    if report.failed > 0 {
        error!(failed = report.failed, "Some write commands were not committed");
    }
    Ok(report)
}
