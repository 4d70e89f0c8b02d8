//! `usp.boxes` — exactly the set of outputs with no matching input. §3, §4.4
//! steps 4 (forward) and the spend-side of revert.

use sqlx::{Postgres, QueryBuilder, Row, Transaction};

use crate::error::WatcherResult;
use crate::normalize::BlockBatch;

pub async fn apply_forward(tx: &mut Transaction<'_, Postgres>, batch: &BlockBatch) -> WatcherResult<()> {
    let header_id = &batch.header().id;

    if !batch.outputs.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO usp.boxes (box_id, header_id) ");
        qb.push_values(&batch.outputs, |mut b, o| {
            b.push_bind(&o.box_id).push_bind(header_id);
        });
        qb.build().execute(&mut **tx).await?;
    }

    if !batch.inputs.is_empty() {
        let box_ids: Vec<String> = batch.inputs.iter().map(|i| i.box_id.clone()).collect();
        sqlx::query("DELETE FROM usp.boxes WHERE box_id = ANY($1)")
            .bind(&box_ids)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

/// Must run before [`super::core::revert`] deletes `core.inputs` for this
/// header — the lookup of which boxes this header spent (and who originally
/// created them) depends on those rows still being present.
pub async fn apply_revert(tx: &mut Transaction<'_, Postgres>, header_id: &str) -> WatcherResult<()> {
    let spent = sqlx::query(
        "SELECT o.box_id, o.header_id FROM core.inputs i \
         JOIN core.outputs o ON o.box_id = i.box_id \
         WHERE i.header_id = $1",
    )
    .bind(header_id)
    .fetch_all(&mut **tx)
    .await?;

    if !spent.is_empty() {
        let mut qb = QueryBuilder::new("INSERT INTO usp.boxes (box_id, header_id) ");
        qb.push_values(&spent, |mut b, row| {
            let box_id: String = row.get("box_id");
            let creating_header_id: String = row.get("header_id");
            b.push_bind(box_id).push_bind(creating_header_id);
        });
        qb.build()
            .execute(&mut **tx)
            .await?;
    }

    sqlx::query("DELETE FROM usp.boxes WHERE header_id = $1").bind(header_id).execute(&mut **tx).await?;

    Ok(())
}
