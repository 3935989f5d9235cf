//! raftbench node: CLI, HTTP surface and cluster bootstrap around
//! `raftbench-core`.

pub mod cli;
pub mod error;
pub mod join;
pub mod logging;
pub mod node;
pub mod server;

pub use cli::Cli;
pub use error::{NodeError, NodeResult};
pub use join::JoinClient;
pub use node::{Node, NodeMode};
pub use server::{build_router, AppState};
