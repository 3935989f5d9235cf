//! Command-line flags, layered over [`BenchConfig`].

use clap::{ArgAction, Parser};
use raftbench_core::BenchConfig;
use std::path::PathBuf;

use crate::error::NodeResult;

#[derive(Parser, Debug, Default)]
#[command(name = "raftbench-node")]
#[command(about = "Replicated key-value write benchmark node", long_about = None)]
#[command(version, disable_help_flag = true)]
pub struct Cli {
    /// Directory for the consensus log and snapshots
    #[arg(value_name = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Hostname other nodes reach this node at
    #[arg(short = 'h', long)]
    pub host: Option<String>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// host:port of the leader to join
    #[arg(long)]
    pub join: Option<String>,

    /// Write commands per issuer
    #[arg(long)]
    pub txns: Option<u64>,

    /// Value size of each write in bytes
    #[arg(long)]
    pub txn_size: Option<usize>,

    /// Concurrent issuers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Cluster size to wait for before benchmarking
    #[arg(long)]
    pub peers: Option<usize>,

    /// Seconds between perf samples
    #[arg(long)]
    pub show_interval: Option<u64>,

    /// Bytes written between snapshots (<= 0 disables)
    #[arg(long, allow_negative_numbers = true)]
    pub snapshot_threshold: Option<i64>,

    /// Pre-fill the store to about this many bytes
    #[arg(long)]
    pub memory_footprint: Option<u64>,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(long, env = "RAFTBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

impl Cli {
    /// Loads file and environment configuration, then applies the flags.
    pub fn load_config(&self) -> NodeResult<BenchConfig> {
        let mut config = BenchConfig::load_from(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Overrides `config` with every flag that was given.
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(dir) = &self.data_dir {
            config.node.data_dir = dir.clone();
        }
        if let Some(host) = &self.host {
            config.node.host = host.clone();
        }
        if let Some(port) = self.port {
            config.node.port = port;
        }
        if let Some(join) = &self.join {
            config.node.join = Some(join.clone());
        }
        if let Some(txns) = self.txns {
            config.bench.txns = txns;
        }
        if let Some(txn_size) = self.txn_size {
            config.bench.txn_size = txn_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.bench.concurrency = concurrency;
        }
        if let Some(peers) = self.peers {
            config.bench.peers = peers;
        }
        if let Some(secs) = self.show_interval {
            config.perf.show_interval_secs = secs;
        }
        if let Some(threshold) = self.snapshot_threshold {
            config.perf.snapshot_threshold_bytes = threshold;
        }
        if let Some(footprint) = self.memory_footprint {
            config.perf.memory_footprint_bytes = footprint;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.logging.format = format.clone();
        }
    }
}
