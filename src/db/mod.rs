//! The persistence layer: C3 (`core`, transactional commit/revert of
//! canonical chain state) and C4 (`balances`/`unspent`/`metrics_schema`,
//! derived-state diffs applied in the same transaction), plus C6
//! (`bootstrap`, one-shot derived-state rebuild). Grounded on the
//! `Arch-Network-arch-rust-indexer` pipeline's `sqlx::Transaction` +
//! `QueryBuilder::push_values` batch-upsert style — the teacher has no SQL
//! layer at all (it persists to RocksDB column families), so this whole
//! module is new construction in an idiom borrowed from elsewhere in the
//! retrieval pack rather than adapted from the teacher directly.

pub mod bootstrap;
pub mod core;
pub mod derived;
pub mod metrics_schema;
pub mod unspent;

mod balances;
mod conservation;

#[cfg(test)]
mod tests;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::DbConfig;
use crate::error::WatcherResult;

pub async fn connect(cfg: &DbConfig) -> WatcherResult<PgPool> {
    let statement_timeout_ms = cfg.statement_timeout_ms;
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("SET statement_timeout = {statement_timeout_ms}"))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .connect(&cfg.conn_str)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> WatcherResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| crate::error::WatcherError::Config(format!("running migrations: {e}")))?;
    Ok(())
}

pub async fn begin(pool: &PgPool) -> WatcherResult<Transaction<'_, Postgres>> {
    Ok(pool.begin().await?)
}

pub async fn meta_get(pool: &PgPool, key: &str) -> WatcherResult<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM meta WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(v,)| v))
}

pub async fn meta_set(tx: &mut Transaction<'_, Postgres>, key: &str, value: &str) -> WatcherResult<()> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
