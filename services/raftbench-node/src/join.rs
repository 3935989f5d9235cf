//! HTTP client used by a joining node to register with the bootstrap node.

use raftbench_core::JoinRequest;
use std::time::Duration;
use tracing::info;

use crate::error::{NodeError, NodeResult};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends join requests to a leader's `POST /join` endpoint.
#[derive(Debug, Clone)]
pub struct JoinClient {
    http: reqwest::Client,
}

impl JoinClient {
    pub fn new() -> NodeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(JOIN_TIMEOUT)
            .build()
            .map_err(|e| NodeError::join("-", format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// `leader` is `host:port`, optionally with an `http://` scheme.
    pub fn join_url(leader: &str) -> String {
        let base = leader.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}/join", base)
        } else {
            format!("http://{}/join", base)
        }
    }

    /// Posts `request` to the leader; any non-2xx answer is an error.
    ///
    /// Returns the member count reported by the leader, if it sent one.
    pub async fn join(&self, leader: &str, request: &JoinRequest) -> NodeResult<Option<usize>> {
        let url = Self::join_url(leader);
        info!(leader = %leader, name = %request.name, "Attempting to join leader");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| NodeError::join(leader, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NodeError::join(
                leader,
                format!("leader answered {}: {}", status, body),
            ));
        }

        let members = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body.get("members").and_then(|m| m.as_u64()))
            .map(|m| m as usize);

        info!(leader = %leader, members = ?members, "Joined cluster");
        Ok(members)
    }
}
