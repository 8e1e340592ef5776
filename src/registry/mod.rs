//! # Address Registry
//!
//! Per-session tally of the addresses generators created, partitioned by
//! script type. The registry is rebuilt from the generators' address lists
//! once the pipeline has finished and feeds two things:
//!
//! - **Sanity check**: every `key_index` must be unique across the session.
//!   Generators partition their identifiers with their id offset, so a
//!   collision means a plug-in minted outside its range. This is logged as
//!   a warning and never aborts the session.
//! - **Address counts**: one `<type>_address_count` entry per script type
//!   in the session's key-value output.
//!
//! ## Coinbase Baseline
//!
//! The coinbase key is imported by the session itself and is never part of
//! a generator's address list. It accounts for two P2PKH addresses, which
//! the registry adds as a baseline:
//!
//! ```text
//! p2pkh_address_count  = 2 + generated P2PKH addresses
//! p2wpkh_address_count = generated P2WPKH addresses
//! p2sh_address_count   = generated P2SH addresses
//! p2wsh_address_count  = generated P2WSH addresses
//! ```

use crate::address::{Address, AddressType};
use crate::KvMap;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

/// P2PKH addresses owned by the coinbase key.
pub const COINBASE_P2PKH_ADDRESSES: usize = 2;

/// Address tally for one session.
#[derive(Debug, Default, Clone)]
pub struct AddressRegistry {
    /// Generator name -> addresses it produced, in pipeline order
    sources: Vec<(String, Vec<Address>)>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the addresses one generator produced.
    pub fn record(&mut self, generator: &str, addresses: &[Address]) {
        debug!("Generator {} produced {} addresses", generator, addresses.len());
        self.sources.push((generator.to_string(), addresses.to_vec()));
    }

    /// Total addresses produced by generators (baseline excluded).
    pub fn total(&self) -> usize {
        self.sources.iter().map(|(_, addrs)| addrs.len()).sum()
    }

    /// Count for one script type, including the coinbase baseline.
    pub fn count(&self, kind: AddressType) -> usize {
        let generated = self
            .sources
            .iter()
            .flat_map(|(_, addrs)| addrs.iter())
            .filter(|addr| addr.kind == kind)
            .count();
        match kind {
            AddressType::P2pkh => generated + COINBASE_P2PKH_ADDRESSES,
            _ => generated,
        }
    }

    /// Counts for every script type.
    pub fn counts(&self) -> BTreeMap<AddressType, usize> {
        AddressType::ALL.iter().map(|&kind| (kind, self.count(kind))).collect()
    }

    /// Key indices minted more than once, with the generators that minted them.
    pub fn duplicates(&self) -> BTreeMap<u64, Vec<String>> {
        let mut owners: HashMap<u64, Vec<String>> = HashMap::new();
        for (generator, addrs) in &self.sources {
            for addr in addrs {
                owners.entry(addr.key_index).or_default().push(generator.clone());
            }
        }
        owners.into_iter().filter(|(_, gens)| gens.len() > 1).collect()
    }

    /// Check that key indices are unique across the session.
    ///
    /// Logs a warning on collision and returns `false`; never fails.
    pub fn sanity_check(&self) -> bool {
        let duplicates = self.duplicates();
        if duplicates.is_empty() {
            return true;
        }
        warn!("Addresses are not unique.");
        for (key_index, generators) in &duplicates {
            warn!("  key_index {} minted by {}", key_index, generators.join(", "));
        }
        false
    }

    /// Write the per-type counts into the session's key-value output.
    pub fn export_counts(&self, kv: &mut KvMap) {
        self.sanity_check();
        for (kind, count) in self.counts() {
            kv.insert(kind.count_key(), serde_json::Value::from(count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(kind: AddressType, key_index: u64) -> Address {
        Address::new(kind, key_index)
    }

    #[test]
    fn test_empty_registry_has_coinbase_baseline() {
        let registry = AddressRegistry::new();
        assert_eq!(registry.count(AddressType::P2pkh), 2);
        assert_eq!(registry.count(AddressType::P2wsh), 0);
        assert_eq!(registry.total(), 0);
        assert!(registry.sanity_check());
    }

    #[test]
    fn test_counts_by_type() {
        let mut registry = AddressRegistry::new();
        registry.record(
            "Addresses",
            &[
                addr(AddressType::P2pkh, 20000),
                addr(AddressType::P2wpkh, 20001),
                addr(AddressType::P2sh, 20002),
                addr(AddressType::P2wsh, 20003),
            ],
        );
        registry.record("Change", &[addr(AddressType::P2wpkh, 30000)]);

        assert_eq!(registry.count(AddressType::P2pkh), 3);
        assert_eq!(registry.count(AddressType::P2wpkh), 2);
        assert_eq!(registry.count(AddressType::P2sh), 1);
        assert_eq!(registry.count(AddressType::P2wsh), 1);
        assert_eq!(registry.total(), 5);
    }

    #[test]
    fn test_duplicate_key_index_is_reported_not_fatal() {
        let mut registry = AddressRegistry::new();
        registry.record("First", &[addr(AddressType::P2pkh, 7)]);
        registry.record("Second", &[addr(AddressType::P2wpkh, 7), addr(AddressType::P2sh, 8)]);

        let dups = registry.duplicates();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[&7], vec!["First".to_string(), "Second".to_string()]);
        assert!(!registry.sanity_check());

        let mut kv = KvMap::new();
        registry.export_counts(&mut kv);
        assert_eq!(kv["p2pkh_address_count"], 3);
        assert_eq!(kv["p2wpkh_address_count"], 1);
        assert_eq!(kv["p2sh_address_count"], 1);
        assert_eq!(kv["p2wsh_address_count"], 0);
    }
}
