//! Supported chain kinds.
//!
//! Each chain kind maps to the config file name its node reads from the
//! data directory and to any chain-specific flags the node must be launched
//! with.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The node flavour a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Bitcoin Core
    Btc,
    /// Bitcoin Cash (Bitcoin ABC style node)
    Bch,
    /// Litecoin Core
    Ltc,
}

/// Raised when a chain name has no known config-file mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown chain '{0}'. Please add an entry for the config file name.")]
pub struct UnsupportedChainError(pub String);

impl ChainKind {
    pub const ALL: [ChainKind; 3] = [ChainKind::Btc, ChainKind::Bch, ChainKind::Ltc];

    /// Short lowercase name, also used as the output subdirectory.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Btc => "btc",
            ChainKind::Bch => "bch",
            ChainKind::Ltc => "ltc",
        }
    }

    /// Name of the config file the node looks for in its data directory.
    pub fn config_file_name(&self) -> &'static str {
        match self {
            ChainKind::Btc | ChainKind::Bch => "bitcoin.conf",
            ChainKind::Ltc => "litecoin.conf",
        }
    }

    /// Extra launch flags for this chain.
    ///
    /// Bitcoin Cash gets the legacy address encoding (cashaddr breaks
    /// address handling in generators) and CTOR enabled from genesis.
    pub fn launch_flags(&self) -> &'static [&'static str] {
        match self {
            ChainKind::Bch => &["-usecashaddr=0", "-magneticanomalyactivationtime=0"],
            ChainKind::Btc | ChainKind::Ltc => &[],
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = UnsupportedChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnsupportedChainError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_mapping() {
        assert_eq!(ChainKind::Btc.config_file_name(), "bitcoin.conf");
        assert_eq!(ChainKind::Bch.config_file_name(), "bitcoin.conf");
        assert_eq!(ChainKind::Ltc.config_file_name(), "litecoin.conf");
    }

    #[test]
    fn test_only_cash_fork_has_flags() {
        assert!(ChainKind::Btc.launch_flags().is_empty());
        assert!(ChainKind::Ltc.launch_flags().is_empty());
        assert_eq!(
            ChainKind::Bch.launch_flags(),
            &["-usecashaddr=0", "-magneticanomalyactivationtime=0"]
        );
    }

    #[test]
    fn test_parse_chain_names() {
        assert_eq!("btc".parse::<ChainKind>(), Ok(ChainKind::Btc));
        assert_eq!("BCH".parse::<ChainKind>(), Ok(ChainKind::Bch));
        assert_eq!(" ltc ".parse::<ChainKind>(), Ok(ChainKind::Ltc));

        let err = "doge".parse::<ChainKind>().unwrap_err();
        assert_eq!(err, UnsupportedChainError("doge".to_string()));
        assert!(err.to_string().contains("doge"));
    }

    #[test]
    fn test_yaml_names() {
        let kind: ChainKind = serde_yaml::from_str("bch").unwrap();
        assert_eq!(kind, ChainKind::Bch);
        assert_eq!(kind.to_string(), "bch");
    }
}
