//! C5 — Chain Tracker. Drives the forward/rollback state machine described
//! in §4.5, orchestrating C1 (node fetch), C2 (normalize) and C3/C4 (commit
//! + apply_forward, or apply_revert + revert, in one DB transaction each).
//! Grounded on the teacher's polling-loop shape in `monitor.rs`/`reorg.rs`
//! (fetch tip, detect mismatch against local chain, walk back), generalized
//! from "detect a reorg on an already-synced UTXO index" to "drive a full
//! block-by-block ingestion loop against a remote node".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Row};
use tracing::{info, warn};

use crate::config::{MetricsConfig, NodeConfig, TrackerConfig};
use crate::db;
use crate::error::{WatcherError, WatcherResult};
use crate::metrics;
use crate::node::model::Block;
use crate::node::NodeClient;
use crate::normalize::{self, GENESIS_HEADER_ID};

#[derive(Debug, Clone, PartialEq)]
struct Tip {
    height: i64,
    id: String,
}

/// The four states named in §4.5. Held only for observability — the control
/// flow itself lives in [`ChainTracker::tick`]'s match arms, not a literal
/// state field transitioned by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Forward,
    Rollback,
    Fatal,
}

pub struct ChainTracker {
    pool: PgPool,
    node: NodeClient,
    tip: Tip,
    poll_interval: Duration,
    max_rollback_depth: u32,
    metrics_cfg: MetricsConfig,
    shutdown: Arc<AtomicBool>,
    state: TrackerState,
}

impl ChainTracker {
    /// Loads `tip` from `core.headers`, bootstrapping the genesis
    /// pseudo-block first if the table is empty. §4.2 genesis handling.
    pub async fn new(
        pool: PgPool,
        node: NodeClient,
        node_cfg: &NodeConfig,
        tracker_cfg: &TrackerConfig,
        metrics_cfg: MetricsConfig,
    ) -> WatcherResult<Self> {
        let tip = match load_tip(&pool).await? {
            Some(tip) => tip,
            None => bootstrap_genesis(&pool, &node, &metrics_cfg).await?,
        };

        Ok(Self {
            pool,
            node,
            tip,
            poll_interval: Duration::from_millis(node_cfg.poll_interval_ms),
            max_rollback_depth: tracker_cfg.max_rollback_depth,
            metrics_cfg,
            shutdown: spawn_shutdown_listener(),
            state: TrackerState::Idle,
        })
    }

    pub fn tip_height(&self) -> i64 {
        self.tip.height
    }

    /// Runs until a cooperative shutdown signal lands between blocks, or a
    /// fatal error (Protocol, Integrity, ForkTooDeep) propagates out.
    pub async fn run(&mut self) -> WatcherResult<()> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(tip_height = self.tip.height, "cooperative shutdown, exiting between blocks");
                return Ok(());
            }
            if let Err(e) = self.tick().await {
                self.state = TrackerState::Fatal;
                return Err(e);
            }
        }
    }

    /// One iteration of §4.5's main loop.
    async fn tick(&mut self) -> WatcherResult<()> {
        self.state = TrackerState::Idle;
        let info = self.node.get_info().await?;
        if info.full_height <= self.tip.height {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(());
        }

        let next_height = self.tip.height + 1;
        let Some(block_id) = self.node.get_block_id_at(next_height).await? else {
            tokio::time::sleep(self.poll_interval).await;
            return Ok(());
        };

        let block = self.node.get_block(&block_id).await?;
        if block.header.parent_id == self.tip.id {
            self.state = TrackerState::Forward;
            self.apply_forward_block(&block).await?;
        } else {
            self.state = TrackerState::Rollback;
            warn!(
                tip_height = self.tip.height,
                tip_id = %self.tip.id,
                got_parent_id = %block.header.parent_id,
                "fork detected"
            );
            metrics::FORKS_DETECTED.inc();
            self.rollback_and_resync().await?;
        }
        Ok(())
    }

    async fn apply_forward_block(&mut self, block: &Block) -> WatcherResult<()> {
        let timer = metrics::Timer::start();
        let batch = normalize::normalize(block);

        let mut tx = db::begin(&self.pool).await?;
        db::core::commit(&mut tx, &batch).await?;
        db::derived::apply_forward(&mut tx, &batch, &self.metrics_cfg).await?;
        tx.commit().await?;

        self.tip = Tip { height: batch.header().height, id: batch.header().id.clone() };
        metrics::TIP_HEIGHT.set(self.tip.height);
        metrics::BLOCKS_APPLIED.inc();
        metrics::DB_TXN_DURATION.observe(timer.elapsed_secs());
        Ok(())
    }

    /// Walks backward reverting committed blocks until the node's branch at
    /// `tip.height + 1` chains onto the (shrinking) local tip, or until
    /// `max_rollback_depth` is exceeded. §4.5 step 4.
    async fn rollback_and_resync(&mut self) -> WatcherResult<()> {
        let mut attempted = 0u32;
        loop {
            attempted += 1;
            check_rollback_bound(attempted, self.max_rollback_depth)?;

            let timer = metrics::Timer::start();
            let reverted_header_id = self.tip.id.clone();
            let reverted_height = self.tip.height;

            let mut tx = db::begin(&self.pool).await?;
            db::derived::apply_revert(&mut tx, &reverted_header_id, reverted_height).await?;
            db::core::revert(&mut tx, &reverted_header_id).await?;
            tx.commit().await?;

            metrics::BLOCKS_REVERTED.inc();
            metrics::DB_TXN_DURATION.observe(timer.elapsed_secs());

            self.tip = load_tip(&self.pool)
                .await?
                .ok_or_else(|| WatcherError::integrity(None, None, "rolled back past genesis"))?;
            metrics::TIP_HEIGHT.set(self.tip.height);

            let Some(next_id) = self.node.get_block_id_at(self.tip.height + 1).await? else {
                metrics::LAST_ROLLBACK_DEPTH.set(attempted as i64);
                return Ok(());
            };
            let next_header = self.node.get_header(&next_id).await?;
            if next_header.parent_id == self.tip.id {
                metrics::LAST_ROLLBACK_DEPTH.set(attempted as i64);
                return Ok(());
            }
        }
    }
}

pub(crate) fn check_rollback_bound(attempted: u32, max: u32) -> WatcherResult<()> {
    if attempted > max {
        return Err(WatcherError::ForkTooDeep { attempted, max });
    }
    Ok(())
}

async fn load_tip(pool: &PgPool) -> WatcherResult<Option<Tip>> {
    let row = sqlx::query("SELECT height, id FROM core.headers ORDER BY height DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| Tip { height: row.get("height"), id: row.get("id") }))
}

async fn bootstrap_genesis(pool: &PgPool, node: &NodeClient, metrics_cfg: &MetricsConfig) -> WatcherResult<Tip> {
    info!("core.headers empty, synthesizing genesis pseudo-block");
    let genesis_boxes = node.get_genesis_boxes().await?;
    let batch = normalize::normalize_genesis(&genesis_boxes);

    let mut tx = db::begin(pool).await?;
    db::core::commit(&mut tx, &batch).await?;
    db::derived::apply_forward(&mut tx, &batch, metrics_cfg).await?;
    tx.commit().await?;

    Ok(Tip { height: 0, id: GENESIS_HEADER_ID.to_string() })
}

fn spawn_shutdown_listener() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_for_task = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            flag_for_task.store(true, Ordering::SeqCst);
        }
    });
    flag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_within_bound_is_ok() {
        assert!(check_rollback_bound(10, 48).is_ok());
        assert!(check_rollback_bound(48, 48).is_ok());
    }

    #[test]
    fn rollback_past_bound_is_fork_too_deep() {
        let err = check_rollback_bound(49, 48).unwrap_err();
        assert!(matches!(err, WatcherError::ForkTooDeep { attempted: 49, max: 48 }));
    }
}
