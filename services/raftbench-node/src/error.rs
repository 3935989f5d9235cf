//! Errors raised while setting up and serving a node.

use raftbench_core::CoreError;
use thiserror::Error;

/// Failures that stop a node from starting or serving.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unable to create storage directory {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("consensus error: {0}")]
    Consensus(#[from] CoreError),

    #[error("failed to join leader {leader}: {message}")]
    Join { leader: String, message: String },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

impl NodeError {
    pub fn join(leader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Join {
            leader: leader.into(),
            message: message.into(),
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
