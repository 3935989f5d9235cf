//! Configuration management for raftbench
//!
//! Sources, lowest to highest precedence:
//! - Built-in defaults
//! - A YAML/TOML/JSON file (`RAFTBENCH_CONFIG` or an explicit path)
//! - Environment variables (`RAFTBENCH__BENCH__TXNS=5000`)
//!
//! Command-line flags are applied on top by the node binary.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::DriverConfig;
use crate::sampler::SnapshotPolicy;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Root configuration structure for a raftbench node
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BenchConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub bench: WorkloadConfig,

    #[serde(default)]
    pub perf: PerfConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BenchConfig {
    /// Load configuration from defaults, the optional file named by
    /// `RAFTBENCH_CONFIG`, and `RAFTBENCH__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("RAFTBENCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like [`BenchConfig::load`] with an explicit config file.
    ///
    /// An explicit file must exist; the environment still overrides it.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Example: RAFTBENCH__PERF__SNAPSHOT_THRESHOLD_BYTES=1048576
        builder = builder.add_source(
            Environment::with_prefix("RAFTBENCH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: BenchConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Node
            .set_default("node.host", "localhost")?
            .set_default("node.port", 4001)?
            .set_default("node.data_dir", "data")?
            // Workload
            .set_default("bench.txns", 10_000)?
            .set_default("bench.txn_size", 128)?
            .set_default("bench.concurrency", 1)?
            .set_default("bench.peers", 1)?
            // Perf
            .set_default("perf.show_interval_secs", 1)?
            .set_default("perf.snapshot_threshold_bytes", 0)?
            .set_default("perf.memory_footprint_bytes", 0)?
            // Logging
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.host.is_empty() {
            return Err(ConfigError::Message("node.host must not be empty".to_string()));
        }

        if self.node.port == 0 {
            return Err(ConfigError::Message("node.port must be > 0".to_string()));
        }

        if self.bench.txn_size == 0 {
            return Err(ConfigError::Message("bench.txn_size must be > 0".to_string()));
        }

        if self.perf.show_interval_secs == 0 {
            return Err(ConfigError::Message(
                "perf.show_interval_secs must be > 0".to_string(),
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Message(format!(
                "logging.level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_LOG_FORMATS.contains(&format.as_str()) {
            return Err(ConfigError::Message(format!(
                "logging.format must be one of {:?}, got '{}'",
                VALID_LOG_FORMATS, self.logging.format
            )));
        }

        Ok(())
    }

    /// This node's connection string, `http://host:port`.
    pub fn connection_string(&self) -> String {
        format!("http://{}:{}", self.node.host, self.node.port)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            num_txns: self.bench.txns,
            txn_size: self.bench.txn_size,
            concurrency: self.bench.concurrency,
        }
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::new(self.perf.snapshot_threshold_bytes, self.bench.txn_size as u64)
    }

    /// Keys to pre-fill so the store holds roughly `memory_footprint_bytes`.
    pub fn prefill_keys(&self) -> u64 {
        if self.bench.txn_size == 0 {
            return 0;
        }
        self.perf.memory_footprint_bytes / self.bench.txn_size as u64
    }
}

/// Identity and storage of this node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NodeConfig {
    pub host: String,

    pub port: u16,

    /// `host:port` of the bootstrap node to join; unset to bootstrap or recover
    #[serde(default)]
    pub join: Option<String>,

    /// Directory holding the consensus log and snapshots
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4001,
            join: None,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Benchmark workload
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WorkloadConfig {
    /// Write commands per issuer
    pub txns: u64,

    /// Value size in bytes
    pub txn_size: usize,

    pub concurrency: usize,

    /// Cluster size to wait for before the benchmark starts
    pub peers: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            txns: 10_000,
            txn_size: 128,
            concurrency: 1,
            peers: 1,
        }
    }
}

/// Sampling, snapshot and pre-fill knobs
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PerfConfig {
    pub show_interval_secs: u64,

    /// Bytes written between snapshots; `<= 0` disables snapshots
    pub snapshot_threshold_bytes: i64,

    /// Target store size before the benchmark; 0 skips pre-fill
    pub memory_footprint_bytes: u64,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            show_interval_secs: 1,
            snapshot_threshold_bytes: 0,
            memory_footprint_bytes: 0,
        }
    }
}

impl PerfConfig {
    pub fn show_interval(&self) -> Duration {
        Duration::from_secs(self.show_interval_secs)
    }
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = BenchConfig::default();

        assert_eq!(config.node.host, "localhost");
        assert_eq!(config.node.port, 4001);
        assert_eq!(config.node.join, None);
        assert_eq!(config.bench.txns, 10_000);
        assert_eq!(config.bench.txn_size, 128);
        assert_eq!(config.bench.concurrency, 1);
        assert_eq!(config.bench.peers, 1);
        assert_eq!(config.perf.show_interval(), Duration::from_secs(1));
        assert_eq!(config.perf.snapshot_threshold_bytes, 0);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_defaults_match_struct_defaults() {
        let config: BenchConfig = BenchConfig::set_defaults(Config::builder())
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config, BenchConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = BenchConfig::default();
        config.node.port = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.bench.txn_size = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.perf.show_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.logging.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "node:\n  port: 4002\n  join: \"localhost:4001\"\nbench:\n  txns: 100\n  txn_size: 16\nperf:\n  snapshot_threshold_bytes: 1024"
        )
        .unwrap();

        let config = BenchConfig::load_from(Some(file.path())).unwrap();

        assert_eq!(config.node.port, 4002);
        assert_eq!(config.node.join.as_deref(), Some("localhost:4001"));
        assert_eq!(config.node.host, "localhost");
        assert_eq!(config.bench.txns, 100);
        assert_eq!(config.bench.txn_size, 16);
        assert_eq!(config.bench.concurrency, 1);
        assert_eq!(config.perf.snapshot_threshold_bytes, 1024);
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(BenchConfig::load_from(Some(&missing)).is_err());
    }

    #[test]
    fn test_derived_values() {
        let mut config = BenchConfig::default();
        config.node.host = "10.0.0.5".to_string();
        config.node.port = 4003;
        config.bench.txn_size = 100;
        config.perf.memory_footprint_bytes = 1_050;
        config.perf.snapshot_threshold_bytes = 500;

        assert_eq!(config.connection_string(), "http://10.0.0.5:4003");
        assert_eq!(config.prefill_keys(), 10);
        assert_eq!(config.snapshot_policy(), SnapshotPolicy::new(500, 100));
        assert_eq!(config.driver_config().txn_size, 100);
    }
}
