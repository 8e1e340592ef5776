//! Run configuration.
//!
//! A run is described by an optional YAML file; every field has a default so
//! an empty file (or no file at all) yields a runnable configuration.
//! Command-line flags are applied on top through [`CliOverrides`].

use crate::address::{COINBASE_ADDRESS, COINBASE_KEY};
use crate::chain::ChainKind;
use crate::clock::{DEFAULT_EPOCH, MAX_EPOCH};
use crate::generator::builtin;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether to build one chain or a shared chain forked into two.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One session against one node
    #[default]
    Single,
    /// Shared history followed by independent `main` and `fork` sessions
    Fork,
}

/// Validation errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("Unknown chain '{0}'")]
    UnknownChain(String),
    #[error("Unknown generator '{0}' in pipeline")]
    UnknownGenerator(String),
    #[error("Pipeline must contain at least one generator")]
    EmptyPipeline,
    #[error("Invalid node settings: {0}")]
    InvalidNode(String),
    #[error("start_time {0} is beyond the latest usable epoch {max}", max = MAX_EPOCH)]
    InvalidStartTime(u64),
    #[error("Fork mode requires general.node_dir")]
    MissingNodeDir,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub node: NodeConfig,
    /// Generator names in execution order
    pub pipeline: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            general: GeneralConfig::default(),
            node: NodeConfig::default(),
            pipeline: builtin::DEFAULT_PIPELINE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Session-level settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_dir: Option<PathBuf>,
    pub chain: String,
    pub executable: String,
    /// Mock-time epoch of the first block
    pub start_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub mode: RunMode,
    pub truncate_block_file: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            output_dir: PathBuf::from("../files/"),
            node_dir: None,
            chain: "btc".to_string(),
            executable: "bitcoind".to_string(),
            start_time: DEFAULT_EPOCH,
            log_level: None,
            mode: RunMode::Single,
            truncate_block_file: true,
        }
    }
}

/// Node process and RPC settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub rpc_port: u16,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Worst-case wait for the RPC port after launch
    #[serde(with = "humantime_serde")]
    pub settle_timeout: Duration,
    /// Delay between readiness probes
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Grace period after a stop request before the process is killed
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// WIF of the coinbase key, imported at the start of every session
    pub coinbase_key: String,
    /// Legacy address of `coinbase_key`; every generated block pays to it
    pub coinbase_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            rpc_port: 18443,
            rpc_user: "testchain".to_string(),
            rpc_password: "testchain".to_string(),
            settle_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            shutdown_timeout: Duration::from_secs(30),
            coinbase_key: COINBASE_KEY.to_string(),
            coinbase_address: COINBASE_ADDRESS.to_string(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval.is_zero() {
            return Err(ValidationError::InvalidNode(
                "poll_interval cannot be zero".to_string(),
            ));
        }
        if self.poll_interval > self.settle_timeout {
            return Err(ValidationError::InvalidNode(format!(
                "poll_interval ({:?}) exceeds settle_timeout ({:?})",
                self.poll_interval, self.settle_timeout
            )));
        }
        if self.rpc_port == 0 {
            return Err(ValidationError::InvalidNode("rpc_port cannot be 0".to_string()));
        }
        if self.coinbase_key.trim().is_empty() || self.coinbase_address.trim().is_empty() {
            return Err(ValidationError::InvalidNode(
                "coinbase_key and coinbase_address must both be set".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.chain_kind()?;
        self.node.validate()?;

        if self.general.start_time > MAX_EPOCH {
            return Err(ValidationError::InvalidStartTime(self.general.start_time));
        }

        if self.pipeline.is_empty() {
            return Err(ValidationError::EmptyPipeline);
        }
        for name in &self.pipeline {
            if builtin::lookup(name).is_none() {
                return Err(ValidationError::UnknownGenerator(name.clone()));
            }
        }

        if self.general.mode == RunMode::Fork && self.general.node_dir.is_none() {
            return Err(ValidationError::MissingNodeDir);
        }
        Ok(())
    }

    pub fn chain_kind(&self) -> Result<ChainKind, ValidationError> {
        self.general
            .chain
            .parse()
            .map_err(|_| ValidationError::UnknownChain(self.general.chain.clone()))
    }
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub output_dir: Option<PathBuf>,
    pub node_dir: Option<PathBuf>,
    pub chain: Option<String>,
    pub executable: Option<String>,
    pub mode: Option<RunMode>,
    pub start_time: Option<u64>,
    pub no_truncate: bool,
    pub debug: bool,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut Config) {
        let general = &mut config.general;
        if let Some(dir) = &self.output_dir {
            general.output_dir = dir.clone();
        }
        if let Some(dir) = &self.node_dir {
            general.node_dir = Some(dir.clone());
        }
        if let Some(chain) = &self.chain {
            general.chain = chain.clone();
        }
        if let Some(exec) = &self.executable {
            general.executable = exec.clone();
        }
        if let Some(mode) = self.mode {
            general.mode = mode;
        }
        if let Some(start) = self.start_time {
            general.start_time = start;
        }
        if self.no_truncate {
            general.truncate_block_file = false;
        }
        if self.debug {
            general.log_level = Some("debug".to_string());
        }
    }
}

/// Parse a YAML configuration file without validating it.
///
/// Used when command-line overrides still have to be applied; an empty
/// document yields the defaults.
pub fn read_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open config file '{}'", config_path.display()))?;
    let config: Option<Config> = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file '{}'", config_path.display()))?;

    Ok(config.unwrap_or_default())
}

/// Load, parse and validate configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    let config = read_config(config_path)?;
    config.validate()?;
    Ok(config)
}
