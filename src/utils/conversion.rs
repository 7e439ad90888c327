//! Hex encoding and big-integer parsing helpers.

use alloy::primitives::{hex, U256};
use std::str::FromStr;

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a decimal string into a U256, falling back to zero.
///
/// Token ids and total supplies are persisted as decimal text; a row that
/// fails to parse is treated as zero rather than poisoning the batch.
pub fn parse_u256(value: &str) -> U256 {
    U256::from_str(value).unwrap_or(U256::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_encode_lowercase() {
        assert_eq!(hex_encode(&[0xAB, 0xCD]), "0xabcd");
    }

    #[test]
    fn test_parse_u256_roundtrip() {
        let v = U256::from(123456789u64);
        assert_eq!(parse_u256(&v.to_string()), v);
    }

    #[test]
    fn test_parse_u256_garbage_is_zero() {
        assert_eq!(parse_u256("not-a-number"), U256::ZERO);
    }
}
