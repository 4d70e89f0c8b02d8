//! C1 — Node Client. A stateless HTTP façade over the upstream node's REST
//! API, with bounded exponential backoff on transient failures. Grounded on
//! the teacher's manual RPC-polling style in `monitor.rs` (no retry crate —
//! the backoff loop is a dozen lines and the teacher never reaches for one
//! either), ported from `reqwest::blocking` to the async client since this
//! crate has no synchronous RPC boundary to straddle.

use std::time::Duration;

use tracing::warn;

use crate::error::{WatcherError, WatcherResult};
use crate::metrics;
use crate::node::model::{Block, Header, NodeInfo, Output};

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 10_000;

pub struct NodeClient {
    http: reqwest::Client,
    base_url: String,
}

impl NodeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> WatcherResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WatcherError::Config(format!("building node http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Runs `op` with bounded exponential backoff. `NotFound` is returned
    /// immediately (never retried — it's "wait", not "hiccup"); `Protocol`
    /// is returned immediately (it's fatal, not transient); `Transient` is
    /// retried up to [`MAX_RETRIES`] times.
    async fn with_retry<T, F, Fut>(&self, endpoint: &'static str, mut op: F) -> WatcherResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = WatcherResult<T>>,
    {
        let mut attempt = 0u32;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        loop {
            let timer = metrics::Timer::start();
            let result = op().await;
            let elapsed = timer.elapsed_secs();
            match result {
                Ok(value) => {
                    metrics::record_node_call(endpoint, "ok", elapsed);
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && matches!(e, WatcherError::Transient(_)) => {
                    metrics::record_node_call(endpoint, "retry", elapsed);
                    attempt += 1;
                    if attempt > MAX_RETRIES {
                        return Err(e);
                    }
                    warn!(endpoint, attempt, backoff_ms, error = %e, "node call failed, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
                }
                Err(e) => {
                    let outcome = if matches!(e, WatcherError::NotFound(_)) { "not_found" } else { "error" };
                    metrics::record_node_call(endpoint, outcome, elapsed);
                    return Err(e);
                }
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> WatcherResult<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(WatcherError::NotFound(format!("{path} -> 404")));
        }
        if status.is_server_error() {
            return Err(WatcherError::Transient(format!("{path} -> {status}")));
        }
        if !status.is_success() {
            return Err(WatcherError::Protocol(format!("{path} -> {status}")));
        }
        resp.json::<T>()
            .await
            .map_err(|e| WatcherError::Protocol(format!("{path}: unexpected shape: {e}")))
    }

    pub async fn get_info(&self) -> WatcherResult<NodeInfo> {
        self.with_retry("info", || self.get_json::<NodeInfo>("/info")).await
    }

    /// Returns `None` if the node doesn't yet have a block at `height`
    /// (the node returns an empty array, not a 404).
    pub async fn get_block_id_at(&self, height: i64) -> WatcherResult<Option<String>> {
        let path = format!("/blocks/at/{height}");
        let ids: Vec<String> = self.with_retry("blocks_at", || self.get_json::<Vec<String>>(&path)).await?;
        Ok(ids.into_iter().next())
    }

    pub async fn get_block(&self, id: &str) -> WatcherResult<Block> {
        let path = format!("/blocks/{id}");
        self.with_retry("block", || self.get_json::<Block>(&path)).await
    }

    pub async fn get_header(&self, id: &str) -> WatcherResult<Header> {
        let path = format!("/blocks/{id}/header");
        self.with_retry("header", || self.get_json::<Header>(&path)).await
    }

    pub async fn get_genesis_boxes(&self) -> WatcherResult<Vec<Output>> {
        self.with_retry("genesis", || self.get_json::<Vec<Output>>("/utxo/genesis")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let client = NodeClient::new("http://localhost:9053/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.url("/info"), "http://localhost:9053/info");
    }
}
