//! Read-only diagnostic: checks invariants P1-P5 (§8) against a live
//! database and reports violations. Intended for operators investigating a
//! suspected bug, not run on the hot path — P6/P7 are properties of a
//! specific forward/revert or bootstrap sequence rather than a snapshot, and
//! are covered instead by `db::tests`'s `FakeTxn`-driven tests.

use clap::Parser;
use sqlx::{PgPool, Row};

use ergo_watcher::config;
use ergo_watcher::db;

#[derive(Parser, Debug)]
#[command(name = "check-invariants", about = "Checks P1-P5 against a live database")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = config::init_global_config(&cli.config) {
        eprintln!("FATAL: {e}");
        std::process::exit(e.exit_code());
    }
    let cfg = config::get_global_config();

    let pool = match db::connect(&cfg.db).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("FATAL: failed to connect to database: {e}");
            std::process::exit(e.exit_code());
        }
    };

    let mut violations = Vec::new();
    violations.extend(check_p1_chain(&pool).await);
    violations.extend(check_p2_fk_closure(&pool).await);
    violations.extend(check_p3_unspent_set(&pool).await);
    violations.extend(check_p4_erg_balance(&pool).await);
    violations.extend(check_p5_token_balance(&pool).await);

    if violations.is_empty() {
        println!("OK: no invariant violations found");
        std::process::exit(0);
    }

    for v in &violations {
        println!("VIOLATION: {v}");
    }
    std::process::exit(1);
}

async fn count(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query(sql)
        .fetch_one(pool)
        .await
        .map(|row| row.get::<i64, _>(0))
        .unwrap_or(-1)
}

async fn check_p1_chain(pool: &PgPool) -> Vec<String> {
    let mut out = Vec::new();

    let total: i64 = count(pool, "SELECT COUNT(*) FROM core.headers").await;
    let distinct: i64 = count(pool, "SELECT COUNT(DISTINCT height) FROM core.headers").await;
    if total != distinct {
        out.push(format!("P1: {total} header rows but only {distinct} distinct heights"));
    }

    let gap_check = count(
        pool,
        "SELECT (MAX(height) - MIN(height) + 1) - COUNT(*) FROM core.headers",
    )
    .await;
    if gap_check != 0 {
        out.push(format!("P1: height sequence has gaps (difference = {gap_check})"));
    }

    let orphans = count(
        pool,
        "SELECT COUNT(*) FROM core.headers h WHERE h.id <> h.parent_id \
         AND NOT EXISTS (SELECT 1 FROM core.headers p WHERE p.id = h.parent_id)",
    )
    .await;
    if orphans != 0 {
        out.push(format!("P1: {orphans} headers have no matching parent"));
    }

    out
}

async fn check_p2_fk_closure(pool: &PgPool) -> Vec<String> {
    let mut out = Vec::new();
    let dangling = count(
        pool,
        "SELECT COUNT(*) FROM core.inputs i \
         JOIN core.headers ih ON ih.id = i.header_id \
         LEFT JOIN core.outputs o ON o.box_id = i.box_id \
         LEFT JOIN core.headers oh ON oh.id = o.header_id \
         WHERE o.box_id IS NULL OR oh.height > ih.height",
    )
    .await;
    if dangling != 0 {
        out.push(format!("P2: {dangling} inputs reference a missing or later-height output"));
    }
    out
}

async fn check_p3_unspent_set(pool: &PgPool) -> Vec<String> {
    let mut out = Vec::new();

    let phantom = count(
        pool,
        "SELECT COUNT(*) FROM usp.boxes u WHERE NOT EXISTS \
         (SELECT 1 FROM core.outputs o WHERE o.box_id = u.box_id)",
    )
    .await;
    if phantom != 0 {
        out.push(format!("P3: {phantom} usp.boxes rows reference a non-existent output"));
    }

    let missing = count(
        pool,
        "SELECT COUNT(*) FROM core.outputs o WHERE NOT EXISTS (SELECT 1 FROM core.inputs i WHERE i.box_id = o.box_id) \
         AND NOT EXISTS (SELECT 1 FROM usp.boxes u WHERE u.box_id = o.box_id)",
    )
    .await;
    if missing != 0 {
        out.push(format!("P3: {missing} unspent outputs are missing from usp.boxes"));
    }

    let stale = count(
        pool,
        "SELECT COUNT(*) FROM usp.boxes u WHERE EXISTS (SELECT 1 FROM core.inputs i WHERE i.box_id = u.box_id)",
    )
    .await;
    if stale != 0 {
        out.push(format!("P3: {stale} usp.boxes rows reference an already-spent output"));
    }

    out
}

async fn check_p4_erg_balance(pool: &PgPool) -> Vec<String> {
    let mut out = Vec::new();

    let mismatched = count(
        pool,
        "SELECT COUNT(*) FROM bal.erg e WHERE e.value <> \
         (SELECT COALESCE(SUM(value), 0) FROM bal.erg_diffs d WHERE d.address = e.address)",
    )
    .await;
    if mismatched != 0 {
        out.push(format!("P4: {mismatched} bal.erg rows disagree with their erg_diffs sum"));
    }

    let missing = count(
        pool,
        "SELECT COUNT(*) FROM (SELECT address, SUM(value) AS total FROM bal.erg_diffs GROUP BY address \
         HAVING SUM(value) <> 0) s WHERE NOT EXISTS (SELECT 1 FROM bal.erg e WHERE e.address = s.address)",
    )
    .await;
    if missing != 0 {
        out.push(format!("P4: {missing} addresses have a nonzero diff sum but no bal.erg row"));
    }

    out
}

async fn check_p5_token_balance(pool: &PgPool) -> Vec<String> {
    let mut out = Vec::new();

    let mismatched = count(
        pool,
        "SELECT COUNT(*) FROM bal.tokens t WHERE t.value <> \
         (SELECT COALESCE(SUM(value), 0) FROM bal.tokens_diffs d \
          WHERE d.address = t.address AND d.token_id = t.token_id)",
    )
    .await;
    if mismatched != 0 {
        out.push(format!("P5: {mismatched} bal.tokens rows disagree with their tokens_diffs sum"));
    }

    out
}
