//! The row-sets a [`super::normalize`] call produces, one struct per `core.*`
//! table in §3, in the insertion order C3 needs to satisfy FKs.

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRow {
    pub height: i64,
    pub id: String,
    pub parent_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRow {
    pub id: String,
    pub header_id: String,
    pub height: i64,
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub box_id: String,
    pub tx_id: String,
    pub header_id: String,
    pub creation_height: i64,
    pub address: String,
    pub index: i32,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRow {
    pub box_id: String,
    pub tx_id: String,
    pub header_id: String,
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataInputRow {
    pub box_id: String,
    pub tx_id: String,
    pub header_id: String,
    pub index: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenRow {
    pub id: String,
    pub box_id: String,
    pub emission_amount: i64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub decimals: Option<i32>,
    pub standard: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxRegisterRow {
    pub box_id: String,
    pub register_id: String,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxAssetRow {
    pub box_id: String,
    pub token_id: String,
    pub amount: i64,
}

/// One fully-normalized block, in FK-safe insertion order. §4.2.
#[derive(Debug, Clone, Default)]
pub struct BlockBatch {
    pub header: Option<HeaderRow>,
    pub transactions: Vec<TransactionRow>,
    pub outputs: Vec<OutputRow>,
    pub inputs: Vec<InputRow>,
    pub data_inputs: Vec<DataInputRow>,
    pub tokens: Vec<TokenRow>,
    pub box_registers: Vec<BoxRegisterRow>,
    pub box_assets: Vec<BoxAssetRow>,
}

impl BlockBatch {
    pub fn header(&self) -> &HeaderRow {
        self.header.as_ref().expect("normalize() always sets header")
    }
}
