//! Single-process implementation of the [`Consensus`] contract.
//!
//! `LocalConsensus` commits proposals in arrival order and applies each one to
//! the state machine while still holding the log lock, so apply order always
//! equals commit order. It performs no election and no replication: members
//! added through [`Consensus::add_member`] are tracked for the quorum gate
//! only.
//!
//! # On-disk layout
//! - `raft.log`: JSON lines, one `{index, name, command}` entry per commit
//! - `snapshot.bin`: last blob returned by [`BenchDb::save`]
//! - `snapshot.meta`: JSON [`SnapshotMeta`] describing `snapshot.bin`
//!
//! A snapshot truncates `raft.log`; entries after it continue the index.
//! Entries left in the log at or below the snapshot index (a crash between
//! writing the snapshot and truncating the log) are ignored on bootstrap.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::command::WriteCommand;
use crate::consensus::{Consensus, JoinRequest};
use crate::error::{CoreError, CoreResult};
use crate::metrics;
use crate::state_machine::BenchDb;

const LOG_FILE: &str = "raft.log";
const SNAPSHOT_FILE: &str = "snapshot.bin";
const SNAPSHOT_META_FILE: &str = "snapshot.meta";

/// Configuration for LocalConsensus
#[derive(Debug, Clone, Default)]
pub struct LocalConsensusConfig {
    /// fsync the log after every commit (default: false)
    pub sync_on_write: bool,
}

/// Metadata written next to each snapshot blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Index of the last command covered by the snapshot.
    pub last_index: u64,
    /// Size of `snapshot.bin` in bytes.
    pub size_bytes: u64,
    pub created_at_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    index: u64,
    name: String,
    command: WriteCommand,
}

/// Append target of the log.
trait LogSink: Write + Send {
    /// Cuts the sink back to its first `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

struct LogState {
    sink: Box<dyn LogSink>,
    /// Length of the complete entries in `raft.log`.
    len: u64,
    commit_index: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

/// What bootstrap found in `raft.log`.
#[derive(Debug, Default)]
struct LogScan {
    /// Readable entries, including ones already covered by the snapshot.
    entries: u64,
    /// Entries past the snapshot index.
    live: u64,
    /// Highest index logged.
    last_index: u64,
    /// Byte length of the readable prefix.
    valid_len: u64,
}

/// In-process consensus node backed by a JSON-lines log.
pub struct LocalConsensus {
    name: String,
    dir: PathBuf,
    db: Arc<BenchDb>,
    config: LocalConsensusConfig,
    started: AtomicBool,
    log_was_empty: bool,
    log: Mutex<LogState>,
    members: RwLock<BTreeMap<String, String>>,
}

impl LocalConsensus {
    /// Opens (or creates) the node's log under `dir` and binds it to `db`.
    ///
    /// An existing snapshot is handed to [`BenchDb::recovery`]; the commit
    /// index resumes after the snapshot and any logged entries.
    pub async fn bootstrap(
        name: impl Into<String>,
        dir: impl AsRef<Path>,
        db: Arc<BenchDb>,
        config: LocalConsensusConfig,
    ) -> CoreResult<Self> {
        let name = name.into();
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let snapshot = Self::load_snapshot(&dir).await?;
        let snapshot_index = match &snapshot {
            Some((meta, blob)) => {
                db.recovery(blob)?;
                meta.last_index
            }
            None => 0,
        };

        let log_path = dir.join(LOG_FILE);
        let scan = Self::scan_log(&log_path, snapshot_index)?;
        let log_was_empty = snapshot.is_none() && scan.entries == 0;
        let commit_index = snapshot_index.max(scan.last_index);

        let file = Self::open_log(&log_path)?;

        if scan.entries > scan.live {
            warn!(
                node = %name,
                stale_entries = scan.entries - scan.live,
                snapshot_index,
                "Ignoring log entries already covered by the snapshot"
            );
        }
        info!(
            node = %name,
            dir = %dir.display(),
            snapshot_index,
            logged_entries = scan.live,
            commit_index,
            log_empty = log_was_empty,
            "Consensus node bootstrapped"
        );

        Ok(Self {
            name,
            dir,
            db,
            config,
            started: AtomicBool::new(false),
            log_was_empty,
            log: Mutex::new(LogState {
                sink: Box::new(file),
                len: scan.valid_len,
                commit_index,
                broken: false,
            }),
            members: RwLock::new(BTreeMap::new()),
        })
    }

    /// Index of the most recently committed command.
    pub fn commit_index(&self) -> u64 {
        self.log.lock().commit_index
    }

    /// Snapshot metadata currently on disk, if any.
    pub async fn snapshot_meta(&self) -> CoreResult<Option<SnapshotMeta>> {
        Ok(Self::load_snapshot(&self.dir).await?.map(|(meta, _)| meta))
    }

    pub fn members(&self) -> Vec<JoinRequest> {
        self.members
            .read()
            .iter()
            .map(|(name, connection_string)| JoinRequest {
                name: name.clone(),
                connection_string: connection_string.clone(),
            })
            .collect()
    }

    fn ensure_started(&self) -> CoreResult<()> {
        if self.started.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CoreError::not_started(&self.name))
        }
    }

    fn open_log(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Reads the entries in `raft.log` and truncates a torn tail left by a
    /// crash mid-append, so later appends start on a clean line.
    fn scan_log(path: &Path, snapshot_index: u64) -> CoreResult<LogScan> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogScan::default()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut scan = LogScan::default();
        let mut torn = false;

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            if line.trim().is_empty() {
                scan.valid_len += read as u64;
                continue;
            }
            match serde_json::from_str::<LogEntry>(line.trim_end()) {
                Ok(entry) if line.ends_with('\n') => {
                    scan.entries += 1;
                    if entry.index > snapshot_index {
                        scan.live += 1;
                    }
                    scan.last_index = scan.last_index.max(entry.index);
                    scan.valid_len += read as u64;
                }
                _ => {
                    torn = true;
                    break;
                }
            }
        }

        if torn {
            warn!(
                path = %path.display(),
                entries = scan.entries,
                valid_len = scan.valid_len,
                "Truncating unreadable log tail"
            );
            OpenOptions::new().write(true).open(path)?.set_len(scan.valid_len)?;
        }
        Ok(scan)
    }

    async fn load_snapshot(dir: &Path) -> CoreResult<Option<(SnapshotMeta, Vec<u8>)>> {
        let meta_path = dir.join(SNAPSHOT_META_FILE);
        let meta_bytes = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: SnapshotMeta =
            serde_json::from_slice(&meta_bytes).map_err(CoreError::deserialization)?;
        let blob = tokio::fs::read(dir.join(SNAPSHOT_FILE)).await?;
        Ok(Some((meta, blob)))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> CoreResult<()> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn snapshot_locked(&self, log: &mut LogState) -> CoreResult<SnapshotMeta> {
        let blob = self.db.save()?;
        let meta = SnapshotMeta {
            last_index: log.commit_index,
            size_bytes: blob.len() as u64,
            created_at_ms: clock::now_ms(),
        };

        Self::write_atomic(&self.dir.join(SNAPSHOT_FILE), &blob)?;
        Self::write_atomic(
            &self.dir.join(SNAPSHOT_META_FILE),
            &serde_json::to_vec(&meta).map_err(CoreError::serialization)?,
        )?;

        // Compact: entries up to last_index are covered by the snapshot.
        log.sink.truncate(0)?;
        log.len = 0;
        log.broken = false;

        Ok(meta)
    }

    /// Writes one encoded entry; on failure the log is cut back to its last
    /// complete entry.
    fn append_locked(&self, log: &mut LogState, line: &[u8]) -> io::Result<()> {
        match write_entry(log.sink.as_mut(), line, self.config.sync_on_write) {
            Ok(()) => {
                log.len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = log.sink.truncate(log.len) {
                    log.broken = true;
                    error!(
                        node = %self.name,
                        error = %rollback,
                        len = log.len,
                        "Failed to roll back partial log append; rejecting further proposals"
                    );
                }
                Err(e)
            }
        }
    }
}

fn write_entry(sink: &mut dyn LogSink, line: &[u8], sync: bool) -> io::Result<()> {
    sink.write_all(line)?;
    sink.flush()?;
    if sync {
        sink.sync()?;
    }
    Ok(())
}

#[async_trait]
impl Consensus for LocalConsensus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> CoreResult<()> {
        if !self.started.swap(true, Ordering::AcqRel) {
            info!(node = %self.name, "Consensus node started");
        }
        Ok(())
    }

    fn is_log_empty(&self) -> bool {
        self.log_was_empty
    }

    fn member_count(&self) -> usize {
        self.members.read().len()
    }

    async fn add_member(&self, request: JoinRequest) -> CoreResult<usize> {
        self.ensure_started()?;
        if request.name.is_empty() {
            return Err(CoreError::ValidationError(
                "join request name cannot be empty".to_string(),
            ));
        }

        let count = {
            let mut members = self.members.write();
            members.insert(request.name.clone(), request.connection_string.clone());
            members.len()
        };
        metrics::CLUSTER_MEMBERS.set(count as i64);

        info!(
            member = %request.name,
            connection = %request.connection_string,
            members = count,
            "Member joined"
        );
        Ok(count)
    }

    async fn propose(&self, command: WriteCommand) -> CoreResult<u64> {
        self.ensure_started()?;

        let mut log = self.log.lock();
        if log.broken {
            return Err(CoreError::propose_failed(
                "log is unusable after a failed rollback",
            ));
        }

        let index = log.commit_index + 1;
        let entry = LogEntry {
            index,
            name: command.name().to_string(),
            command,
        };

        let mut line = serde_json::to_vec(&entry).map_err(CoreError::serialization)?;
        line.push(b'\n');
        if let Err(e) = self.append_locked(&mut log, &line) {
            return Err(CoreError::propose_failed(format!(
                "log append at index {} failed: {}",
                index, e
            )));
        }

        log.commit_index = index;
        entry.command.apply(&self.db);
        Ok(index)
    }

    async fn take_snapshot(&self) -> CoreResult<()> {
        self.ensure_started()?;

        let mut log = self.log.lock();
        match self.snapshot_locked(&mut log) {
            Ok(meta) => {
                metrics::SNAPSHOTS.with_label_values(&["success"]).inc();
                info!(
                    node = %self.name,
                    last_index = meta.last_index,
                    bytes = meta.size_bytes,
                    "Snapshot taken"
                );
                Ok(())
            }
            Err(e) => {
                metrics::SNAPSHOTS.with_label_values(&["failed"]).inc();
                debug!(node = %self.name, error = %e, "Snapshot attempt aborted");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LocalConsensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalConsensus")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
