//! §3 invariant 3 — conservation is checked and recorded, not enforced by
//! DB constraints: for every transaction, Σ input values + Σ minted tokens
//! must equal Σ output values + Σ burned tokens. Runs at the end of
//! `core::commit`, after this block's own outputs are visible, so a
//! same-block chained transaction's inputs resolve the same way an
//! ordinary cross-block input does.

use std::collections::HashMap;

use sqlx::{Postgres, Row, Transaction};
use tracing::warn;

use crate::error::WatcherResult;
use crate::metrics;
use crate::normalize::BlockBatch;

#[derive(Debug, PartialEq)]
pub(crate) enum Mismatch {
    Erg { tx_id: String, input_total: i64, output_total: i64 },
    TokenOveremission { tx_id: String, token_id: String, expected: i64, actual: i64 },
}

pub async fn check(tx: &mut Transaction<'_, Postgres>, batch: &BlockBatch) -> WatcherResult<()> {
    if batch.transactions.is_empty() {
        return Ok(());
    }

    let input_box_ids: Vec<String> = batch.inputs.iter().map(|i| i.box_id.clone()).collect();
    let input_values = fetch_input_values(tx, &input_box_ids).await?;
    let input_assets = fetch_input_assets(tx, &input_box_ids).await?;

    for tx_row in &batch.transactions {
        for mismatch in evaluate_transaction(&tx_row.id, batch, &input_values, &input_assets) {
            metrics::CONSERVATION_MISMATCHES.inc();
            match &mismatch {
                Mismatch::Erg { tx_id, input_total, output_total } => {
                    warn!(tx_id, input_total, output_total, "erg conservation mismatch");
                }
                Mismatch::TokenOveremission { tx_id, token_id, expected, actual } => {
                    warn!(tx_id, token_id, expected, actual, "token conservation mismatch: more emitted than accounted for");
                }
            }
        }
    }

    Ok(())
}

async fn fetch_input_values(
    tx: &mut Transaction<'_, Postgres>,
    box_ids: &[String],
) -> WatcherResult<HashMap<String, i64>> {
    if box_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query("SELECT box_id, value FROM core.outputs WHERE box_id = ANY($1)")
        .bind(box_ids)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.into_iter().map(|row| (row.get("box_id"), row.get("value"))).collect())
}

async fn fetch_input_assets(
    tx: &mut Transaction<'_, Postgres>,
    box_ids: &[String],
) -> WatcherResult<HashMap<String, Vec<(String, i64)>>> {
    if box_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query("SELECT box_id, token_id, amount FROM core.box_assets WHERE box_id = ANY($1)")
        .bind(box_ids)
        .fetch_all(&mut **tx)
        .await?;
    let mut assets: HashMap<String, Vec<(String, i64)>> = HashMap::new();
    for row in rows {
        let box_id: String = row.get("box_id");
        let token_id: String = row.get("token_id");
        let amount: i64 = row.get("amount");
        assets.entry(box_id).or_default().push((token_id, amount));
    }
    Ok(assets)
}

/// Pure evaluation of one transaction's conservation, given already-fetched
/// prices/assets for its inputs. A burn (output total less than input total
/// plus minted) is allowed and not reported; only an excess (more emitted
/// than accounted for) is a mismatch, alongside any plain ERG imbalance.
pub(crate) fn evaluate_transaction(
    tx_id: &str,
    batch: &BlockBatch,
    input_values: &HashMap<String, i64>,
    input_assets: &HashMap<String, Vec<(String, i64)>>,
) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    let inputs: Vec<_> = batch.inputs.iter().filter(|i| i.tx_id == tx_id).collect();
    let outputs: Vec<_> = batch.outputs.iter().filter(|o| o.tx_id == tx_id).collect();

    let input_total: i64 = inputs.iter().filter_map(|i| input_values.get(&i.box_id)).sum();
    let output_total: i64 = outputs.iter().map(|o| o.value).sum();
    if input_total != output_total {
        mismatches.push(Mismatch::Erg { tx_id: tx_id.to_string(), input_total, output_total });
    }

    let mut input_tokens: HashMap<&str, i64> = HashMap::new();
    for i in &inputs {
        if let Some(assets) = input_assets.get(&i.box_id) {
            for (token_id, amount) in assets {
                *input_tokens.entry(token_id.as_str()).or_insert(0) += amount;
            }
        }
    }

    let minted: HashMap<&str, i64> = batch
        .tokens
        .iter()
        .filter(|t| outputs.iter().any(|o| o.box_id == t.box_id))
        .map(|t| (t.id.as_str(), t.emission_amount))
        .collect();

    let mut output_tokens: HashMap<&str, i64> = HashMap::new();
    for o in &outputs {
        for asset in batch.box_assets.iter().filter(|a| a.box_id == o.box_id) {
            *output_tokens.entry(asset.token_id.as_str()).or_insert(0) += asset.amount;
        }
    }

    let mut token_ids: std::collections::BTreeSet<&str> = input_tokens.keys().copied().collect();
    token_ids.extend(output_tokens.keys().copied());
    for token_id in token_ids {
        let expected = input_tokens.get(token_id).copied().unwrap_or(0) + minted.get(token_id).copied().unwrap_or(0);
        let actual = output_tokens.get(token_id).copied().unwrap_or(0);
        if actual > expected {
            mismatches.push(Mismatch::TokenOveremission {
                tx_id: tx_id.to_string(),
                token_id: token_id.to_string(),
                expected,
                actual,
            });
        }
    }

    mismatches
}
