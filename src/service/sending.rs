//! Best-effort cache invalidation across sibling replicas

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{Config, Result};

/// Body of the `tokens/refresh` peer endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct RefreshRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) owner: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub(crate) index: bool,
}

impl RefreshRequest {
    pub(crate) fn for_token(token: &str, owner: Option<&str>) -> Self {
        Self {
            token: Some(token.to_owned()),
            owner: owner.map(ToOwned::to_owned),
            index: false,
        }
    }

    pub(crate) fn for_index() -> Self {
        Self {
            index: true,
            ..Self::default()
        }
    }
}

pub(crate) struct Service {
    client: reqwest::Client,
    peers: Vec<String>,
    maximum_requests: Arc<Semaphore>,
}

impl Service {
    pub(crate) fn load(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.peer_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            peers: config.peers.clone(),
            maximum_requests: Arc::new(Semaphore::new(
                config.max_concurrent_peer_requests.into(),
            )),
        })
    }

    /// Tells every sibling replica to drop its cached copies of the affected
    /// records. Blocks until all peers have answered or timed out. Failures
    /// are logged and swallowed, the originating operation has already
    /// committed.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn broadcast_refresh(&self, request: RefreshRequest) {
        futures_util::future::join_all(
            self.peers.iter().map(|peer| self.refresh_peer(peer, &request)),
        )
        .await;
    }

    async fn refresh_peer(&self, peer: &str, request: &RefreshRequest) {
        let permit = self.maximum_requests.acquire().await;

        let url = format!("{}/tokens/refresh", peer.trim_end_matches('/'));

        match self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(_) => debug!(%url, "Refreshed peer"),
            Err(error) => warn!(%error, %url, "Failed to refresh peer"),
        }

        drop(permit);
    }
}
