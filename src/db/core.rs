//! C3 — Core Persister. `commit`/`revert` of one block's row-sets into
//! `core.*`, each a single DB transaction, FK-safe order one way and its
//! mirror the other. Grounded on the batch-upsert shape in the arch-indexer
//! pipeline (`QueryBuilder::push_values`), adapted from upsert-on-conflict
//! to plain insert since `core.*` rows are append-only until a `revert`.

use sqlx::{Postgres, QueryBuilder, Transaction};

use super::conservation;
use crate::error::WatcherResult;
use crate::normalize::BlockBatch;

/// Inserts every row-set in `batch` within the caller's transaction, in the
/// order required to satisfy foreign keys: header, transactions, outputs,
/// inputs, data_inputs, tokens, box_registers, box_assets. §4.3.
pub async fn commit(tx: &mut Transaction<'_, Postgres>, batch: &BlockBatch) -> WatcherResult<()> {
    let header = batch.header();
    sqlx::query("INSERT INTO core.headers (height, id, parent_id, timestamp) VALUES ($1, $2, $3, $4)")
        .bind(header.height)
        .bind(&header.id)
        .bind(&header.parent_id)
        .bind(header.timestamp)
        .execute(&mut **tx)
        .await?;

    if !batch.transactions.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO core.transactions (id, header_id, height, index) ");
        qb.push_values(&batch.transactions, |mut b, row| {
            b.push_bind(&row.id).push_bind(&row.header_id).push_bind(row.height).push_bind(row.index);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.outputs.is_empty() {
        let mut qb = QueryBuilder::new(
            "INSERT INTO core.outputs (box_id, tx_id, header_id, creation_height, address, index, value) ",
        );
        qb.push_values(&batch.outputs, |mut b, row| {
            b.push_bind(&row.box_id)
                .push_bind(&row.tx_id)
                .push_bind(&row.header_id)
                .push_bind(row.creation_height)
                .push_bind(&row.address)
                .push_bind(row.index)
                .push_bind(row.value);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.inputs.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO core.inputs (box_id, tx_id, header_id, index) ");
        qb.push_values(&batch.inputs, |mut b, row| {
            b.push_bind(&row.box_id).push_bind(&row.tx_id).push_bind(&row.header_id).push_bind(row.index);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.data_inputs.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO core.data_inputs (box_id, tx_id, header_id, index) ");
        qb.push_values(&batch.data_inputs, |mut b, row| {
            b.push_bind(&row.box_id).push_bind(&row.tx_id).push_bind(&row.header_id).push_bind(row.index);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.tokens.is_empty() {
        let mut qb = QueryBuilder::new(
            "INSERT INTO core.tokens (id, box_id, emission_amount, name, description, decimals, standard) ",
        );
        qb.push_values(&batch.tokens, |mut b, row| {
            b.push_bind(&row.id)
                .push_bind(&row.box_id)
                .push_bind(row.emission_amount)
                .push_bind(&row.name)
                .push_bind(&row.description)
                .push_bind(row.decimals)
                .push_bind(&row.standard);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.box_registers.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO core.box_registers (box_id, register_id, raw) ");
        qb.push_values(&batch.box_registers, |mut b, row| {
            b.push_bind(&row.box_id).push_bind(&row.register_id).push_bind(&row.raw);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.box_assets.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO core.box_assets (box_id, token_id, amount) ");
        qb.push_values(&batch.box_assets, |mut b, row| {
            b.push_bind(&row.box_id).push_bind(&row.token_id).push_bind(row.amount);
        });
        qb.build().execute(&mut **tx).await?;
    }

    conservation::check(tx, batch).await?;

    Ok(())
}

/// Deletes every row keyed by `header_id` across `core.*`, in reverse FK
/// order. After this call the header is gone and no dangling references
/// remain. §4.3.
pub async fn revert(tx: &mut Transaction<'_, Postgres>, header_id: &str) -> WatcherResult<()> {
    sqlx::query(
        "DELETE FROM core.box_assets WHERE box_id IN \
         (SELECT box_id FROM core.outputs WHERE header_id = $1)",
    )
    .bind(header_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "DELETE FROM core.box_registers WHERE box_id IN \
         (SELECT box_id FROM core.outputs WHERE header_id = $1)",
    )
    .bind(header_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "DELETE FROM core.tokens WHERE box_id IN \
         (SELECT box_id FROM core.outputs WHERE header_id = $1)",
    )
    .bind(header_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM core.data_inputs WHERE header_id = $1")
        .bind(header_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM core.inputs WHERE header_id = $1")
        .bind(header_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM core.outputs WHERE header_id = $1")
        .bind(header_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM core.transactions WHERE header_id = $1")
        .bind(header_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query("DELETE FROM core.headers WHERE id = $1")
        .bind(header_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
