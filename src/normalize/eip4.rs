//! EIP-4 token metadata tolerance: registers R4-R6 on a minting output carry
//! name, description and decimal count as Sigma-serialized `Coll[Byte]`
//! values. The node hands these back as raw hex, so we decode the Sigma
//! encoding ourselves rather than trust the shape.
//!
//! A `Coll[SByte]` is serialized as a single type-code byte (`0x0e`), a
//! VLQ-encoded length, then that many raw bytes — see the Ergo serialization
//! spec. Anything that doesn't match this shape exactly is "not EIP-4
//! compliant", not an error: §4.3 says metadata fields stay `None`, the
//! mint itself is still recorded.

const COLL_BYTE_TYPE_CODE: u8 = 0x0e;

fn decode_coll_byte(hex_str: &str) -> Option<Vec<u8>> {
    let bytes = hex::decode(hex_str).ok()?;
    let mut iter = bytes.iter().copied();
    if iter.next()? != COLL_BYTE_TYPE_CODE {
        return None;
    }
    let mut len: u64 = 0;
    let mut shift = 0u32;
    loop {
        let b = iter.next()?;
        len |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
    let content: Vec<u8> = iter.collect();
    if content.len() as u64 != len {
        return None;
    }
    Some(content)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub decimals: Option<i32>,
    pub standard: Option<String>,
}

/// Parses R4/R5/R6 off a minting output's registers. All three must decode
/// and R6 must be an ASCII decimal integer for the mint to count as EIP-4
/// compliant; partial matches are discarded rather than reported half-true.
pub fn parse_eip4(registers: &crate::node::model::Registers) -> TokenMetadata {
    let name = registers.get("R4").and_then(|r| decode_coll_byte(r)).and_then(|b| String::from_utf8(b).ok());
    let description = registers.get("R5").and_then(|r| decode_coll_byte(r)).and_then(|b| String::from_utf8(b).ok());
    let decimals = registers
        .get("R6")
        .and_then(|r| decode_coll_byte(r))
        .and_then(|b| String::from_utf8(b).ok())
        .and_then(|s| s.parse::<i32>().ok());

    match (name, description, decimals) {
        (Some(name), Some(description), Some(decimals)) => TokenMetadata {
            name: Some(name),
            description: Some(description),
            decimals: Some(decimals),
            standard: Some("EIP-004".to_string()),
        },
        _ => TokenMetadata::default(),
    }
}
