//! Address records produced by generators.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Regtest key every session imports and mines its coinbase outputs to.
///
/// Testnet/regtest WIF and legacy version bytes are shared by all supported
/// chains, so the same pair is valid on each of them.
pub const COINBASE_KEY: &str = "cVpF924EspNh8KjYsfhgY96mmxvT6DgdWiTYMtMjuM74hJaU5psW";

/// Legacy P2PKH address of [`COINBASE_KEY`].
pub const COINBASE_ADDRESS: &str = "mjTkW3DjgyZck4KbiRusZsqTgaYTxdSz6z";

/// Script type of a generated address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    P2pkh,
    P2wpkh,
    P2sh,
    P2wsh,
}

impl AddressType {
    pub const ALL: [AddressType; 4] = [
        AddressType::P2pkh,
        AddressType::P2wpkh,
        AddressType::P2sh,
        AddressType::P2wsh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::P2pkh => "p2pkh",
            AddressType::P2wpkh => "p2wpkh",
            AddressType::P2sh => "p2sh",
            AddressType::P2wsh => "p2wsh",
        }
    }

    /// Key under which the session exports the count for this type.
    pub fn count_key(&self) -> String {
        format!("{}_address_count", self.as_str())
    }

    /// `address_type` argument understood by the node's `getnewaddress`.
    ///
    /// P2WSH has no single-key form; generators build it from a multisig.
    pub fn wallet_address_type(&self) -> Option<&'static str> {
        match self {
            AddressType::P2pkh => Some("legacy"),
            AddressType::P2wpkh => Some("bech32"),
            AddressType::P2sh => Some("p2sh-segwit"),
            AddressType::P2wsh => None,
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address minted by a generator.
///
/// `key_index` must be unique across the whole session; generators derive
/// it from their id offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "type")]
    pub kind: AddressType,
    pub key_index: u64,
}

impl Address {
    pub fn new(kind: AddressType, key_index: u64) -> Self {
        Address { kind, key_index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_keys() {
        let keys: Vec<String> = AddressType::ALL.iter().map(|t| t.count_key()).collect();
        assert_eq!(
            keys,
            vec![
                "p2pkh_address_count",
                "p2wpkh_address_count",
                "p2sh_address_count",
                "p2wsh_address_count",
            ]
        );
    }

    #[test]
    fn test_address_serializes_type_field() {
        let json = serde_json::to_string(&Address::new(AddressType::P2wsh, 10003)).unwrap();
        assert_eq!(json, r#"{"type":"p2wsh","key_index":10003}"#);
    }
}
