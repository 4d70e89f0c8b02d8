//! `bal.*` diff/balance maintenance — the per-address and per-(address,token)
//! halves of C4. Split out of `derived.rs` since the erg and token arms are
//! structurally identical aside from the extra `token_id` column; kept
//! private to `db` since nothing outside C4 calls these directly.

use std::collections::HashMap;

use sqlx::{Postgres, QueryBuilder, Row, Transaction};

use crate::error::WatcherResult;
use crate::normalize::BlockBatch;

pub struct ErgDiff {
    pub address: String,
    pub tx_id: String,
    pub value: i64,
}

pub struct TokenDiff {
    pub address: String,
    pub token_id: String,
    pub tx_id: String,
    pub value: i64,
}

/// Looks up `(address, value)` for a set of already-committed `box_id`s —
/// used to price an input, since `InputRow` only carries the box id.
async fn output_addresses_and_values(
    tx: &mut Transaction<'_, Postgres>,
    box_ids: &[String],
) -> WatcherResult<HashMap<String, (String, i64)>> {
    if box_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = sqlx::query("SELECT box_id, address, value FROM core.outputs WHERE box_id = ANY($1)")
        .bind(box_ids)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let box_id: String = row.get("box_id");
            let address: String = row.get("address");
            let value: i64 = row.get("value");
            (box_id, (address, value))
        })
        .collect())
}

async fn spent_box_assets(
    tx: &mut Transaction<'_, Postgres>,
    box_ids: &[String],
) -> WatcherResult<Vec<(String, String, i64)>> {
    if box_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query("SELECT box_id, token_id, amount FROM core.box_assets WHERE box_id = ANY($1)")
        .bind(box_ids)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("box_id"), row.get("token_id"), row.get("amount")))
        .collect())
}

/// Negative entries for every spent input, positive for every created
/// output. §4.4 step 1.
pub async fn compute_erg_diffs(tx: &mut Transaction<'_, Postgres>, batch: &BlockBatch) -> WatcherResult<Vec<ErgDiff>> {
    let mut diffs = Vec::with_capacity(batch.inputs.len() + batch.outputs.len());

    let input_box_ids: Vec<String> = batch.inputs.iter().map(|i| i.box_id.clone()).collect();
    let spent = output_addresses_and_values(tx, &input_box_ids).await?;
    for input in &batch.inputs {
        if let Some((address, value)) = spent.get(&input.box_id) {
            diffs.push(ErgDiff { address: address.clone(), tx_id: input.tx_id.clone(), value: -value });
        }
    }

    for output in &batch.outputs {
        diffs.push(ErgDiff { address: output.address.clone(), tx_id: output.tx_id.clone(), value: output.value });
    }

    Ok(diffs)
}

/// Negative entries for every spent input's assets, positive for every
/// created output's assets (this already covers full mint emission, since
/// the minting output's `box_assets` row carries the emitted amount).
/// §4.4 step 2.
pub async fn compute_token_diffs(
    tx: &mut Transaction<'_, Postgres>,
    batch: &BlockBatch,
) -> WatcherResult<Vec<TokenDiff>> {
    let mut diffs = Vec::new();

    let input_box_ids: Vec<String> = batch.inputs.iter().map(|i| i.box_id.clone()).collect();
    let owners = output_addresses_and_values(tx, &input_box_ids).await?;
    let spent_assets = spent_box_assets(tx, &input_box_ids).await?;
    let input_tx_id: HashMap<&str, &str> =
        batch.inputs.iter().map(|i| (i.box_id.as_str(), i.tx_id.as_str())).collect();
    for (box_id, token_id, amount) in &spent_assets {
        if let (Some((address, _)), Some(tx_id)) = (owners.get(box_id), input_tx_id.get(box_id.as_str())) {
            diffs.push(TokenDiff {
                address: address.clone(),
                token_id: token_id.clone(),
                tx_id: tx_id.to_string(),
                value: -amount,
            });
        }
    }

    let output_address: HashMap<&str, &str> =
        batch.outputs.iter().map(|o| (o.box_id.as_str(), o.address.as_str())).collect();
    let output_tx_id: HashMap<&str, &str> =
        batch.outputs.iter().map(|o| (o.box_id.as_str(), o.tx_id.as_str())).collect();
    for asset in &batch.box_assets {
        if let (Some(address), Some(tx_id)) =
            (output_address.get(asset.box_id.as_str()), output_tx_id.get(asset.box_id.as_str()))
        {
            diffs.push(TokenDiff {
                address: address.to_string(),
                token_id: asset.token_id.clone(),
                tx_id: tx_id.to_string(),
                value: asset.amount,
            });
        }
    }

    Ok(diffs)
}

pub async fn insert_erg_diffs(
    tx: &mut Transaction<'_, Postgres>,
    header_id: &str,
    height: i64,
    diffs: &[ErgDiff],
) -> WatcherResult<()> {
    if diffs.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::new("INSERT INTO bal.erg_diffs (height, address, tx_id, header_id, value) ");
    qb.push_values(diffs, |mut b, d| {
        b.push_bind(height).push_bind(&d.address).push_bind(&d.tx_id).push_bind(header_id).push_bind(d.value);
    });
    qb.build().execute(&mut **tx).await?;
    Ok(())
}

pub async fn insert_token_diffs(
    tx: &mut Transaction<'_, Postgres>,
    header_id: &str,
    height: i64,
    diffs: &[TokenDiff],
) -> WatcherResult<()> {
    if diffs.is_empty() {
        return Ok(());
    }
    let mut qb =
        QueryBuilder::new("INSERT INTO bal.tokens_diffs (address, token_id, height, tx_id, header_id, value) ");
    qb.push_values(diffs, |mut b, d| {
        b.push_bind(&d.address).push_bind(&d.token_id).push_bind(height).push_bind(&d.tx_id).push_bind(header_id).push_bind(d.value);
    });
    qb.build().execute(&mut **tx).await?;
    Ok(())
}

/// Upserts `bal.erg` running balances by `delta` per address; rows that
/// reach exactly zero are deleted. §4.4 step 3.
pub async fn apply_erg_balance_deltas(
    tx: &mut Transaction<'_, Postgres>,
    deltas: &HashMap<String, i64>,
) -> WatcherResult<()> {
    for (address, delta) in deltas {
        if *delta == 0 {
            continue;
        }
        sqlx::query(
            "INSERT INTO bal.erg (address, value) VALUES ($1, $2) \
             ON CONFLICT (address) DO UPDATE SET value = bal.erg.value + EXCLUDED.value",
        )
        .bind(address)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query("DELETE FROM bal.erg WHERE value = 0").execute(&mut **tx).await?;
    Ok(())
}

pub async fn apply_token_balance_deltas(
    tx: &mut Transaction<'_, Postgres>,
    deltas: &HashMap<(String, String), i64>,
) -> WatcherResult<()> {
    for ((address, token_id), delta) in deltas {
        if *delta == 0 {
            continue;
        }
        sqlx::query(
            "INSERT INTO bal.tokens (address, token_id, value) VALUES ($1, $2, $3) \
             ON CONFLICT (address, token_id) DO UPDATE SET value = bal.tokens.value + EXCLUDED.value",
        )
        .bind(address)
        .bind(token_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
    }
    sqlx::query("DELETE FROM bal.tokens WHERE value = 0").execute(&mut **tx).await?;
    Ok(())
}

pub fn sum_erg_by_address(diffs: &[ErgDiff]) -> HashMap<String, i64> {
    let mut totals = HashMap::new();
    for d in diffs {
        *totals.entry(d.address.clone()).or_insert(0) += d.value;
    }
    totals
}

pub fn sum_tokens_by_address(diffs: &[TokenDiff]) -> HashMap<(String, String), i64> {
    let mut totals = HashMap::new();
    for d in diffs {
        *totals.entry((d.address.clone(), d.token_id.clone())).or_insert(0) += d.value;
    }
    totals
}

pub async fn erg_diffs_for_header(
    tx: &mut Transaction<'_, Postgres>,
    header_id: &str,
) -> WatcherResult<Vec<ErgDiff>> {
    let rows = sqlx::query("SELECT address, tx_id, value FROM bal.erg_diffs WHERE header_id = $1")
        .bind(header_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| ErgDiff { address: row.get("address"), tx_id: row.get("tx_id"), value: row.get("value") })
        .collect())
}

pub async fn token_diffs_for_header(
    tx: &mut Transaction<'_, Postgres>,
    header_id: &str,
) -> WatcherResult<Vec<TokenDiff>> {
    let rows = sqlx::query("SELECT address, token_id, tx_id, value FROM bal.tokens_diffs WHERE header_id = $1")
        .bind(header_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| TokenDiff {
            address: row.get("address"),
            token_id: row.get("token_id"),
            tx_id: row.get("tx_id"),
            value: row.get("value"),
        })
        .collect())
}

pub async fn delete_diffs_for_header(tx: &mut Transaction<'_, Postgres>, header_id: &str) -> WatcherResult<()> {
    sqlx::query("DELETE FROM bal.erg_diffs WHERE header_id = $1").bind(header_id).execute(&mut **tx).await?;
    sqlx::query("DELETE FROM bal.tokens_diffs WHERE header_id = $1").bind(header_id).execute(&mut **tx).await?;
    Ok(())
}
