//! C4 — Derived-State Engine. `apply_forward`/`apply_revert` orchestrate
//! `balances`, `unspent` and `metrics_schema` within the same transaction
//! C3 uses, so a committed/reverted block's canonical and derived state
//! never diverge. §4.4.

use sqlx::{Postgres, Transaction};

use super::{balances, metrics_schema, unspent};
use crate::config::MetricsConfig;
use crate::error::WatcherResult;
use crate::normalize::BlockBatch;

/// Must run in the same transaction as, and after, [`super::core::commit`]:
/// it prices inputs and reads minted-asset rows that `commit` just inserted.
pub async fn apply_forward(
    tx: &mut Transaction<'_, Postgres>,
    batch: &BlockBatch,
    metrics_cfg: &MetricsConfig,
) -> WatcherResult<()> {
    let header = batch.header().clone();

    let erg_diffs = balances::compute_erg_diffs(tx, batch).await?;
    let token_diffs = balances::compute_token_diffs(tx, batch).await?;

    balances::insert_erg_diffs(tx, &header.id, header.height, &erg_diffs).await?;
    balances::insert_token_diffs(tx, &header.id, header.height, &token_diffs).await?;

    let erg_deltas = balances::sum_erg_by_address(&erg_diffs);
    let token_deltas = balances::sum_tokens_by_address(&token_diffs);
    balances::apply_erg_balance_deltas(tx, &erg_deltas).await?;
    balances::apply_token_balance_deltas(tx, &token_deltas).await?;

    unspent::apply_forward(tx, batch).await?;
    metrics_schema::apply_forward(tx, batch, metrics_cfg).await?;

    Ok(())
}

/// Must run in the same transaction as, and *before*, [`super::core::revert`]:
/// it reads `core.inputs`/`core.outputs` rows for `header_id` that
/// `core::revert` is about to delete.
pub async fn apply_revert(tx: &mut Transaction<'_, Postgres>, header_id: &str, height: i64) -> WatcherResult<()> {
    let erg_diffs = balances::erg_diffs_for_header(tx, header_id).await?;
    let token_diffs = balances::token_diffs_for_header(tx, header_id).await?;

    let erg_deltas = balances::sum_erg_by_address(&erg_diffs).into_iter().map(|(a, v)| (a, -v)).collect();
    let token_deltas =
        balances::sum_tokens_by_address(&token_diffs).into_iter().map(|(k, v)| (k, -v)).collect();
    balances::apply_erg_balance_deltas(tx, &erg_deltas).await?;
    balances::apply_token_balance_deltas(tx, &token_deltas).await?;

    balances::delete_diffs_for_header(tx, header_id).await?;

    unspent::apply_revert(tx, header_id).await?;
    metrics_schema::apply_revert(tx, height).await?;

    Ok(())
}
