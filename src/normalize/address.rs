//! ErgoTree -> address mapping. §4.1 only requires this be a deterministic,
//! pluggable function (equal trees produce equal addresses); it's not on the
//! hot path for any invariant. Ported from the teacher's P2PKH hash+checksum
//! encoder (`address.rs`, `hash_address`) onto Ergo's address layout: a
//! single prefix byte followed by the tree's raw content and a 4-byte
//! double-SHA256 checksum, base58-encoded — structurally the same shape the
//! teacher used for its own chain's addresses, just without network-specific
//! P2PKH/P2SH branching this watcher has no use for.

use sha2::{Digest, Sha256};

/// Mainnet P2S-style prefix byte. We only ever encode, never decode back to
/// a network, so a single constant prefix is enough.
const ADDRESS_PREFIX: u8 = 0x01;

pub type AddressFn = fn(&str) -> String;

/// Default ErgoTree -> address mapping used by [`super::normalize`].
pub fn derive_address(ergo_tree_hex: &str) -> String {
    let tree_bytes = match hex::decode(ergo_tree_hex) {
        Ok(b) => b,
        Err(_) => return format!("unparsed:{ergo_tree_hex}"),
    };

    let mut payload = Vec::with_capacity(1 + tree_bytes.len());
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(&tree_bytes);

    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..4]);

    bs58::encode(payload).into_string()
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_trees_produce_equal_addresses() {
        let tree = "0008cd0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        assert_eq!(derive_address(tree), derive_address(tree));
    }

    #[test]
    fn different_trees_produce_different_addresses() {
        let a = derive_address("0008cd0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798");
        let b = derive_address("100204a00b08cd03");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hex_is_tolerated_not_panicked_on() {
        let addr = derive_address("not-hex");
        assert!(addr.starts_with("unparsed:"));
    }
}
