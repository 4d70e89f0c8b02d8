//! Integration-style tests for C3/C4/C6 ordering and invariants, run
//! against an in-memory `FakeTxn` standing in for a live
//! `sqlx::Transaction<'_, Postgres>`. The teacher has no equivalent (its
//! RocksDB layer is exercised against a real temp DB); with no Postgres
//! available here, `FakeTxn` re-implements the same insert/diff/revert
//! logic as `core.rs`/`balances.rs`/`unspent.rs`/`derived.rs` against plain
//! Rust collections, so the ordering and invariants can be asserted
//! without a live database connection.

use std::collections::{HashMap, HashSet};

use crate::normalize::{BlockBatch, BoxAssetRow, HeaderRow, InputRow, OutputRow, TokenRow, TransactionRow};
use crate::tracker::check_rollback_bound;

#[derive(Default, Clone, Debug, PartialEq)]
struct FakeTxn {
    headers: Vec<HeaderRow>,
    transactions: Vec<TransactionRow>,
    outputs: HashMap<String, OutputRow>,
    inputs: Vec<InputRow>,
    tokens: Vec<TokenRow>,
    box_assets: Vec<BoxAssetRow>,

    bal_erg: HashMap<String, i64>,
    bal_erg_diffs: Vec<(String, String, String, i64)>, // header_id, address, tx_id, value
    bal_tokens: HashMap<(String, String), i64>,
    bal_tokens_diffs: Vec<(String, String, String, String, i64)>, // header_id, address, token_id, tx_id, value

    usp_boxes: HashMap<String, String>, // box_id -> creating header_id
}

impl FakeTxn {
    /// Mirrors `db::core::commit`'s FK-safe insert order.
    fn commit_core(&mut self, batch: &BlockBatch) {
        self.headers.push(batch.header().clone());
        self.transactions.extend(batch.transactions.iter().cloned());
        for output in &batch.outputs {
            self.outputs.insert(output.box_id.clone(), output.clone());
        }
        self.inputs.extend(batch.inputs.iter().cloned());
        self.tokens.extend(batch.tokens.iter().cloned());
        self.box_assets.extend(batch.box_assets.iter().cloned());
    }

    /// Mirrors `db::core::revert`'s reverse-FK delete order.
    fn revert_core(&mut self, header_id: &str) {
        let box_ids: HashSet<String> =
            self.outputs.values().filter(|o| o.header_id == header_id).map(|o| o.box_id.clone()).collect();
        self.box_assets.retain(|a| !box_ids.contains(&a.box_id));
        self.tokens.retain(|t| !box_ids.contains(&t.box_id));
        self.inputs.retain(|i| i.header_id != header_id);
        self.outputs.retain(|_, o| o.header_id != header_id);
        self.transactions.retain(|t| t.header_id != header_id);
        self.headers.retain(|h| h.id != header_id);
    }

    /// Mirrors `db::derived::apply_forward`: diff computation, balance
    /// deltas and `usp.boxes` maintenance, in that order.
    fn apply_forward_derived(&mut self, batch: &BlockBatch) {
        let header = batch.header().clone();

        let mut erg_diff_rows: Vec<(String, String, i64)> = Vec::new();
        for input in &batch.inputs {
            if let Some(output) = self.outputs.get(&input.box_id) {
                erg_diff_rows.push((output.address.clone(), input.tx_id.clone(), -output.value));
            }
        }
        for output in &batch.outputs {
            erg_diff_rows.push((output.address.clone(), output.tx_id.clone(), output.value));
        }

        let input_tx_id: HashMap<&str, &str> =
            batch.inputs.iter().map(|i| (i.box_id.as_str(), i.tx_id.as_str())).collect();
        let input_box_ids: HashSet<&str> = batch.inputs.iter().map(|i| i.box_id.as_str()).collect();
        let mut token_diff_rows: Vec<(String, String, String, i64)> = Vec::new();
        for asset in &self.box_assets {
            if !input_box_ids.contains(asset.box_id.as_str()) {
                continue;
            }
            if let (Some(output), Some(tx_id)) =
                (self.outputs.get(&asset.box_id), input_tx_id.get(asset.box_id.as_str()))
            {
                token_diff_rows.push((output.address.clone(), asset.token_id.clone(), tx_id.to_string(), -asset.amount));
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
                token_diff_rows.push((address.to_string(), asset.token_id.clone(), tx_id.to_string(), asset.amount));
            }
        }

        let mut erg_delta: HashMap<String, i64> = HashMap::new();
        for (address, tx_id, value) in &erg_diff_rows {
            *erg_delta.entry(address.clone()).or_insert(0) += value;
            self.bal_erg_diffs.push((header.id.clone(), address.clone(), tx_id.clone(), *value));
        }
        for (address, delta) in erg_delta {
            *self.bal_erg.entry(address).or_insert(0) += delta;
        }
        self.bal_erg.retain(|_, v| *v != 0);

        let mut token_delta: HashMap<(String, String), i64> = HashMap::new();
        for (address, token_id, tx_id, value) in &token_diff_rows {
            *token_delta.entry((address.clone(), token_id.clone())).or_insert(0) += value;
            self.bal_tokens_diffs.push((header.id.clone(), address.clone(), token_id.clone(), tx_id.clone(), *value));
        }
        for (key, delta) in token_delta {
            *self.bal_tokens.entry(key).or_insert(0) += delta;
        }
        self.bal_tokens.retain(|_, v| *v != 0);

        for output in &batch.outputs {
            self.usp_boxes.insert(output.box_id.clone(), header.id.clone());
        }
        for input in &batch.inputs {
            self.usp_boxes.remove(&input.box_id);
        }
    }

    /// Mirrors `db::derived::apply_revert`. Must run before `revert_core`,
    /// same as `db::unspent::apply_revert` must run before
    /// `db::core::revert` deletes the `core.inputs`/`core.outputs` rows
    /// this depends on.
    fn apply_revert_derived(&mut self, header_id: &str) {
        let mut erg_delta: HashMap<String, i64> = HashMap::new();
        for (h, address, _tx_id, value) in &self.bal_erg_diffs {
            if h == header_id {
                *erg_delta.entry(address.clone()).or_insert(0) -= value;
            }
        }
        for (address, delta) in &erg_delta {
            *self.bal_erg.entry(address.clone()).or_insert(0) += delta;
        }
        self.bal_erg.retain(|_, v| *v != 0);
        self.bal_erg_diffs.retain(|(h, ..)| h != header_id);

        let mut token_delta: HashMap<(String, String), i64> = HashMap::new();
        for (h, address, token_id, _tx_id, value) in &self.bal_tokens_diffs {
            if h == header_id {
                *token_delta.entry((address.clone(), token_id.clone())).or_insert(0) -= value;
            }
        }
        for (key, delta) in &token_delta {
            *self.bal_tokens.entry(key.clone()).or_insert(0) += delta;
        }
        self.bal_tokens.retain(|_, v| *v != 0);
        self.bal_tokens_diffs.retain(|(h, ..)| h != header_id);

        let spent: Vec<(String, String)> = self
            .inputs
            .iter()
            .filter(|i| i.header_id == header_id)
            .filter_map(|i| self.outputs.get(&i.box_id).map(|o| (i.box_id.clone(), o.header_id.clone())))
            .collect();
        for (box_id, creating_header_id) in spent {
            self.usp_boxes.insert(box_id, creating_header_id);
        }
        self.usp_boxes.retain(|_, h| h != header_id);
    }

    fn apply_block(&mut self, batch: &BlockBatch) {
        self.commit_core(batch);
        self.apply_forward_derived(batch);
    }

    fn revert_block(&mut self, header_id: &str) {
        self.apply_revert_derived(header_id);
        self.revert_core(header_id);
    }
}

fn header(id: &str, parent_id: &str, height: i64) -> HeaderRow {
    HeaderRow { height, id: id.to_string(), parent_id: parent_id.to_string(), timestamp: height * 100 }
}

fn output(box_id: &str, tx_id: &str, header_id: &str, address: &str, value: i64) -> OutputRow {
    OutputRow {
        box_id: box_id.to_string(),
        tx_id: tx_id.to_string(),
        header_id: header_id.to_string(),
        creation_height: 0,
        address: address.to_string(),
        index: 0,
        value,
    }
}

fn input(box_id: &str, tx_id: &str, header_id: &str) -> InputRow {
    InputRow { box_id: box_id.to_string(), tx_id: tx_id.to_string(), header_id: header_id.to_string(), index: 0 }
}

fn batch_of(
    header_row: HeaderRow,
    transactions: Vec<TransactionRow>,
    outputs: Vec<OutputRow>,
    inputs: Vec<InputRow>,
) -> BlockBatch {
    BlockBatch { header: Some(header_row), transactions, outputs, inputs, ..Default::default() }
}

#[test]
fn unspent_set_reflects_outputs_minus_inputs_p3() {
    let mut fake = FakeTxn::default();

    let genesis = batch_of(
        header("genesis", "genesis", 0),
        vec![TransactionRow { id: "gtx".into(), header_id: "genesis".into(), height: 0, index: 0 }],
        vec![output("g0", "gtx", "genesis", "A", 100), output("g1", "gtx", "genesis", "B", 200)],
        vec![],
    );
    fake.apply_block(&genesis);

    let block1 = batch_of(
        header("h1", "genesis", 1),
        vec![TransactionRow { id: "tx1".into(), header_id: "h1".into(), height: 1, index: 0 }],
        vec![output("o1", "tx1", "h1", "C", 100)],
        vec![input("g0", "tx1", "h1")],
    );
    fake.apply_block(&block1);

    let mut unspent: Vec<&String> = fake.usp_boxes.keys().collect();
    unspent.sort();
    assert_eq!(unspent, vec!["g1", "o1"]);
    assert_eq!(fake.bal_erg.get("A"), None);
    assert_eq!(fake.bal_erg.get("B"), Some(&200));
    assert_eq!(fake.bal_erg.get("C"), Some(&100));
}

#[test]
fn apply_revert_after_apply_forward_is_identity_p6() {
    let mut fake = FakeTxn::default();

    let genesis = batch_of(
        header("genesis", "genesis", 0),
        vec![TransactionRow { id: "gtx".into(), header_id: "genesis".into(), height: 0, index: 0 }],
        vec![output("g0", "gtx", "genesis", "A", 100), output("g1", "gtx", "genesis", "B", 200)],
        vec![],
    );
    fake.apply_block(&genesis);
    let snapshot_after_genesis = fake.clone();

    let block1 = batch_of(
        header("h1", "genesis", 1),
        vec![TransactionRow { id: "tx1".into(), header_id: "h1".into(), height: 1, index: 0 }],
        vec![output("o1", "tx1", "h1", "C", 100)],
        vec![input("g0", "tx1", "h1")],
    );
    fake.apply_block(&block1);
    assert_ne!(fake, snapshot_after_genesis);

    fake.revert_block("h1");
    assert_eq!(fake, snapshot_after_genesis);
}

#[test]
fn token_mint_row_and_balance_disappear_on_revert_scenario_3() {
    let mut fake = FakeTxn::default();

    let genesis = batch_of(
        header("genesis", "genesis", 0),
        vec![TransactionRow { id: "gtx".into(), header_id: "genesis".into(), height: 0, index: 0 }],
        vec![output("g0", "gtx", "genesis", "A", 100)],
        vec![],
    );
    fake.apply_block(&genesis);
    let snapshot_after_genesis = fake.clone();

    let mut mint_block = batch_of(
        header("h1", "genesis", 1),
        vec![TransactionRow { id: "tx1".into(), header_id: "h1".into(), height: 1, index: 0 }],
        vec![output("o1", "tx1", "h1", "A", 100)],
        vec![input("g0", "tx1", "h1")],
    );
    mint_block.tokens.push(TokenRow { id: "g0".into(), box_id: "o1".into(), emission_amount: 1_000, ..Default::default() });
    mint_block.box_assets.push(BoxAssetRow { box_id: "o1".into(), token_id: "g0".into(), amount: 1_000 });
    fake.apply_block(&mint_block);

    assert_eq!(fake.tokens.len(), 1);
    assert_eq!(fake.bal_tokens.get(&("A".to_string(), "g0".to_string())), Some(&1_000));

    fake.revert_block("h1");
    assert!(fake.tokens.is_empty());
    assert!(fake.bal_tokens.is_empty());
    assert_eq!(fake, snapshot_after_genesis);
}

#[test]
fn fork_of_depth_one_replaces_the_losing_branch_scenario_4() {
    let mut fake = FakeTxn::default();

    let genesis = batch_of(
        header("genesis", "genesis", 0),
        vec![TransactionRow { id: "gtx".into(), header_id: "genesis".into(), height: 0, index: 0 }],
        vec![output("g0", "gtx", "genesis", "A", 100)],
        vec![],
    );
    fake.apply_block(&genesis);

    let losing = batch_of(
        header("h1a", "genesis", 1),
        vec![TransactionRow { id: "tx1a".into(), header_id: "h1a".into(), height: 1, index: 0 }],
        vec![output("o1a", "tx1a", "h1a", "B", 100)],
        vec![input("g0", "tx1a", "h1a")],
    );
    fake.apply_block(&losing);

    fake.revert_block("h1a");

    let winning = batch_of(
        header("h1b", "genesis", 1),
        vec![TransactionRow { id: "tx1b".into(), header_id: "h1b".into(), height: 1, index: 0 }],
        vec![output("o1b", "tx1b", "h1b", "C", 100)],
        vec![input("g0", "tx1b", "h1b")],
    );
    fake.apply_block(&winning);

    assert!(fake.headers.iter().any(|h| h.id == "h1b"));
    assert!(!fake.headers.iter().any(|h| h.id == "h1a"));
    assert!(!fake.outputs.contains_key("o1a"));
    assert!(fake.outputs.contains_key("o1b"));
    assert_eq!(fake.bal_erg.get("B"), None);
    assert_eq!(fake.bal_erg.get("C"), Some(&100));
    assert_eq!(fake.usp_boxes.get("o1b"), Some(&"h1b".to_string()));
}

#[test]
fn rollback_stops_at_max_depth_leaving_db_unchanged_scenario_6() {
    let mut fake = FakeTxn::default();
    let depth = 3u32;

    fake.apply_block(&batch_of(header("genesis", "genesis", 0), vec![], vec![], vec![]));
    let mut parent = "genesis".to_string();
    for height in 1..=depth {
        let id = format!("h{height}");
        fake.apply_block(&batch_of(header(&id, &parent, height as i64), vec![], vec![], vec![]));
        parent = id;
    }

    let max = depth - 1;
    let mut attempted = 0u32;
    let result = loop {
        attempted += 1;
        if let Err(e) = check_rollback_bound(attempted, max) {
            break Err(e);
        }
        let tip_id = fake.headers.iter().max_by_key(|h| h.height).unwrap().id.clone();
        fake.revert_block(&tip_id);
    };

    assert!(result.is_err());
    // Exactly `max` reverts landed before the bound tripped; the would-be
    // (max+1)th revert never ran, so the fake DB stops at that point rather
    // than rolling back any further.
    assert_eq!(fake.headers.len() as u32, depth + 1 - max);
}
