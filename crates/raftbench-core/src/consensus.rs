//! Contract between the harness and the consensus/replication layer.
//!
//! Election, replication and durability live behind [`Consensus`]. The
//! harness only proposes commands, watches membership, and asks for
//! snapshots.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::WriteCommand;
use crate::error::CoreResult;

/// Request a node sends to the bootstrap node to become a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    #[serde(rename = "connectionString")]
    pub connection_string: String,
}

impl JoinRequest {
    /// Join request for a node that names itself by its connection string.
    pub fn for_address(connection_string: impl Into<String>) -> Self {
        let connection_string = connection_string.into();
        Self {
            name: connection_string.clone(),
            connection_string,
        }
    }
}

/// Handle to a running consensus node.
#[async_trait]
pub trait Consensus: Send + Sync {
    /// Name of this node in the cluster.
    fn name(&self) -> &str;

    /// Starts the node; proposals are rejected before this.
    async fn start(&self) -> CoreResult<()>;

    /// Whether the persisted log was empty when the node was bootstrapped.
    ///
    /// An empty log on a node without a leader to join means first-time
    /// cluster initialization; a non-empty one means recovery.
    fn is_log_empty(&self) -> bool;

    /// Number of members currently in the cluster.
    fn member_count(&self) -> usize;

    /// Adds a member relayed from a join request; returns the new member count.
    async fn add_member(&self, request: JoinRequest) -> CoreResult<usize>;

    /// Proposes a command and blocks until it is committed and applied.
    ///
    /// Returns the log index the command was committed at.
    async fn propose(&self, command: WriteCommand) -> CoreResult<u64>;

    /// Requests log compaction now.
    async fn take_snapshot(&self) -> CoreResult<()>;
}
