//! JSON shapes returned by the upstream Ergo-family node, per §6/§9: dynamic,
//! duck-typed JSON parsed into an explicit, tolerant model. Unknown fields are
//! ignored (`serde`'s default behavior); fields the node is free to omit are
//! `Option<T>`. A field that's required for the watcher's own invariants but
//! missing is a [`crate::error::WatcherError::Protocol`] at the call site,
//! not here.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "fullHeight")]
    pub full_height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub id: String,
    #[serde(rename = "parentId")]
    pub parent_id: String,
    pub height: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    #[serde(rename = "tokenId")]
    pub token_id: String,
    pub amount: i64,
}

/// A register payload. The node returns these as a map of register id
/// ("R4".."R9") to a Sigma-serialized hex string; `additionalRegisters` only
/// ever carries the non-standard ones (R0-R3 are structural and never
/// appear here).
pub type Registers = std::collections::BTreeMap<String, String>;

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    #[serde(rename = "boxId")]
    pub box_id: String,
    #[serde(rename = "ergoTree")]
    pub ergo_tree: String,
    pub value: i64,
    #[serde(rename = "creationHeight")]
    pub creation_height: i64,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(rename = "additionalRegisters", default)]
    pub additional_registers: Registers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Input {
    #[serde(rename = "boxId")]
    pub box_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataInput {
    #[serde(rename = "boxId")]
    pub box_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(rename = "dataInputs", default)]
    pub data_inputs: Vec<DataInput>,
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTransactions {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    pub header: Header,
    #[serde(rename = "blockTransactions")]
    pub block_transactions: BlockTransactions,
}
