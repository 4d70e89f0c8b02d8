//! C2 — Block Normalizer. A pure function turning one node block payload
//! into an ordered [`BlockBatch`] of typed row-sets, FK-safe to insert as-is.
//! Grounded on the teacher's `parser.rs`/`types.rs` split (dumb wire model in
//! one module, normalized domain rows in another) — here split further into
//! `batch` (row types), `address` (ErgoTree mapping) and `eip4` (token
//! metadata tolerance) since none of those concerns share a natural home.

pub mod address;
pub mod batch;
pub mod eip4;

pub use batch::{
    BlockBatch, BoxAssetRow, BoxRegisterRow, DataInputRow, HeaderRow, InputRow, OutputRow,
    TokenRow, TransactionRow,
};

use crate::node::model::{Block, Output};

/// Synthetic header id for the genesis pseudo-block. Stable across runs so
/// bootstrap and a fresh tracker agree on it without persisting it anywhere.
pub const GENESIS_HEADER_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000000000000000";
pub const GENESIS_PARENT_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000000000000000";
pub const GENESIS_TX_ID: &str =
    "0000000000000000000000000000000000000000000000000000000000000000000000000001";

/// Normalizes one real block into an ordered, FK-safe [`BlockBatch`].
pub fn normalize(block: &Block) -> BlockBatch {
    let header = HeaderRow {
        height: block.header.height,
        id: block.header.id.clone(),
        parent_id: block.header.parent_id.clone(),
        timestamp: block.header.timestamp,
    };

    let mut batch = BlockBatch {
        header: Some(header),
        ..Default::default()
    };

    for (tx_index, tx) in block.block_transactions.transactions.iter().enumerate() {
        normalize_transaction(&mut batch, &block.header.id, block.header.height, tx_index as i32, tx);
    }

    batch
}

/// Synthesizes the genesis pseudo-block: genesis boxes wrapped in a single
/// dummy transaction at height 0 under a stable synthetic header, so later
/// real blocks' inputs have something to reference. §4.2.
pub fn normalize_genesis(boxes: &[Output]) -> BlockBatch {
    let header = HeaderRow {
        height: 0,
        id: GENESIS_HEADER_ID.to_string(),
        parent_id: GENESIS_PARENT_ID.to_string(),
        timestamp: 0,
    };

    let mut batch = BlockBatch {
        header: Some(header),
        ..Default::default()
    };

    batch.transactions.push(TransactionRow {
        id: GENESIS_TX_ID.to_string(),
        header_id: GENESIS_HEADER_ID.to_string(),
        height: 0,
        index: 0,
    });

    for (output_index, output) in boxes.iter().enumerate() {
        normalize_output(&mut batch, GENESIS_TX_ID, GENESIS_HEADER_ID, output_index as i32, output);
    }

    batch
}

fn normalize_transaction(
    batch: &mut BlockBatch,
    header_id: &str,
    height: i64,
    tx_index: i32,
    tx: &crate::node::model::Transaction,
) {
    batch.transactions.push(TransactionRow {
        id: tx.id.clone(),
        header_id: header_id.to_string(),
        height,
        index: tx_index,
    });

    for (input_index, input) in tx.inputs.iter().enumerate() {
        batch.inputs.push(InputRow {
            box_id: input.box_id.clone(),
            tx_id: tx.id.clone(),
            header_id: header_id.to_string(),
            index: input_index as i32,
        });
    }

    for (data_input_index, data_input) in tx.data_inputs.iter().enumerate() {
        batch.data_inputs.push(DataInputRow {
            box_id: data_input.box_id.clone(),
            tx_id: tx.id.clone(),
            header_id: header_id.to_string(),
            index: data_input_index as i32,
        });
    }

    for (output_index, output) in tx.outputs.iter().enumerate() {
        normalize_output(batch, &tx.id, header_id, output_index as i32, output);
    }

    if let Some(first_input) = tx.inputs.first() {
        normalize_mint(batch, &first_input.box_id, tx);
    }
}

fn normalize_output(batch: &mut BlockBatch, tx_id: &str, header_id: &str, output_index: i32, output: &Output) {
    batch.outputs.push(OutputRow {
        box_id: output.box_id.clone(),
        tx_id: tx_id.to_string(),
        header_id: header_id.to_string(),
        creation_height: output.creation_height,
        address: address::derive_address(&output.ergo_tree),
        index: output_index,
        value: output.value,
    });

    for (register_id, raw) in &output.additional_registers {
        batch.box_registers.push(BoxRegisterRow {
            box_id: output.box_id.clone(),
            register_id: register_id.clone(),
            raw: raw.clone(),
        });
    }

    for asset in &output.assets {
        batch.box_assets.push(BoxAssetRow {
            box_id: output.box_id.clone(),
            token_id: asset.token_id.clone(),
            amount: asset.amount,
        });
    }
}

/// A token mints in `tx` iff some output carries an asset whose token id
/// equals `tx`'s first input's box id (the Ergo minting rule). Emission
/// amount is the sum across every output asset entry for that token id,
/// since the issuing output is free to split the mint across several.
fn normalize_mint(batch: &mut BlockBatch, first_input_box_id: &str, tx: &crate::node::model::Transaction) {
    let mut minting_box_id: Option<&str> = None;
    let mut emission_amount: i64 = 0;

    for output in &tx.outputs {
        for asset in &output.assets {
            if asset.token_id == first_input_box_id {
                minting_box_id.get_or_insert(output.box_id.as_str());
                emission_amount += asset.amount;
            }
        }
    }

    let Some(minting_box_id) = minting_box_id else {
        return;
    };

    let minting_output = tx
        .outputs
        .iter()
        .find(|o| o.box_id == minting_box_id)
        .expect("minting_box_id was taken from tx.outputs");

    let metadata = eip4::parse_eip4(&minting_output.additional_registers);

    batch.tokens.push(TokenRow {
        id: first_input_box_id.to_string(),
        box_id: minting_box_id.to_string(),
        emission_amount,
        name: metadata.name,
        description: metadata.description,
        decimals: metadata.decimals,
        standard: metadata.standard,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::model::{Asset, Block, BlockTransactions, DataInput, Header, Input, Output, Registers, Transaction};

    fn output(box_id: &str, value: i64, assets: Vec<Asset>) -> Output {
        Output {
            box_id: box_id.to_string(),
            ergo_tree: "0008cd02".to_string(),
            value,
            creation_height: 1,
            assets,
            additional_registers: Registers::new(),
        }
    }

    #[test]
    fn transaction_and_output_indices_follow_position() {
        let block = Block {
            header: Header { id: "h1".into(), parent_id: "h0".into(), height: 1, timestamp: 100 },
            block_transactions: BlockTransactions {
                transactions: vec![
                    Transaction {
                        id: "tx0".into(),
                        inputs: vec![],
                        data_inputs: vec![],
                        outputs: vec![output("box0", 10, vec![]), output("box1", 20, vec![])],
                    },
                    Transaction {
                        id: "tx1".into(),
                        inputs: vec![Input { box_id: "box0".into() }],
                        data_inputs: vec![DataInput { box_id: "box1".into() }],
                        outputs: vec![output("box2", 5, vec![])],
                    },
                ],
            },
        };

        let batch = normalize(&block);
        assert_eq!(batch.transactions[0].index, 0);
        assert_eq!(batch.transactions[1].index, 1);
        assert_eq!(batch.outputs[0].index, 0);
        assert_eq!(batch.outputs[1].index, 1);
        assert_eq!(batch.outputs[2].index, 0);
        assert_eq!(batch.inputs[0].box_id, "box0");
        assert_eq!(batch.data_inputs[0].box_id, "box1");
    }

    #[test]
    fn mint_detected_when_token_id_equals_first_input_box_id() {
        let minted_token = Asset { token_id: "box0".into(), amount: 1_000 };
        let block = Block {
            header: Header { id: "h1".into(), parent_id: "h0".into(), height: 1, timestamp: 100 },
            block_transactions: BlockTransactions {
                transactions: vec![Transaction {
                    id: "tx0".into(),
                    inputs: vec![Input { box_id: "box0".into() }],
                    data_inputs: vec![],
                    outputs: vec![output("box1", 1, vec![minted_token])],
                }],
            },
        };

        let batch = normalize(&block);
        assert_eq!(batch.tokens.len(), 1);
        assert_eq!(batch.tokens[0].id, "box0");
        assert_eq!(batch.tokens[0].box_id, "box1");
        assert_eq!(batch.tokens[0].emission_amount, 1_000);
        assert_eq!(batch.tokens[0].standard, None);
    }

    #[test]
    fn no_mint_row_when_asset_token_id_differs_from_first_input() {
        let carried_token = Asset { token_id: "some-other-token".into(), amount: 5 };
        let block = Block {
            header: Header { id: "h1".into(), parent_id: "h0".into(), height: 1, timestamp: 100 },
            block_transactions: BlockTransactions {
                transactions: vec![Transaction {
                    id: "tx0".into(),
                    inputs: vec![Input { box_id: "box0".into() }],
                    data_inputs: vec![],
                    outputs: vec![output("box1", 1, vec![carried_token])],
                }],
            },
        };

        let batch = normalize(&block);
        assert!(batch.tokens.is_empty());
        assert_eq!(batch.box_assets.len(), 1);
    }

    #[test]
    fn genesis_batch_wraps_boxes_in_single_dummy_transaction_at_height_zero() {
        let boxes = vec![output("g0", 100, vec![]), output("g1", 200, vec![])];
        let batch = normalize_genesis(&boxes);

        assert_eq!(batch.header().height, 0);
        assert_eq!(batch.header().id, GENESIS_HEADER_ID);
        assert_eq!(batch.transactions.len(), 1);
        assert_eq!(batch.transactions[0].id, GENESIS_TX_ID);
        assert_eq!(batch.outputs.len(), 2);
        assert_eq!(batch.outputs[0].tx_id, GENESIS_TX_ID);
        assert_eq!(batch.outputs[1].index, 1);
    }
}
