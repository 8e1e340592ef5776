//! # Testchain - Deterministic synthetic blockchains for analysis tooling
//!
//! This library drives a regtest full node over JSON-RPC and replays a fixed
//! pipeline of transaction-pattern generators against it, producing chains
//! that serve as ground truth for blockchain-analysis tools.
//!
//! ## Overview
//!
//! Given the same configuration, node binary and generator pipeline, every
//! run produces the same chain. Block timestamps come from a monotonic mock
//! clock, and generator randomness is seeded from each generator's id offset.
//!
//! ## Architecture
//!
//! - `chain`: supported chain kinds and their node conventions
//! - `clock`: monotonic mock-time allocation
//! - `cospend`: co-spend clustering (union-find)
//! - `address` / `registry`: addresses created by generators, duplicate detection
//! - `rpc`: blocking JSON-RPC client
//! - `node`: node process launch, readiness polling and teardown
//! - `generator`: generator contract and built-in generators
//! - `pipeline`: ordered generator execution
//! - `session`: one node plus the state its generators share
//! - `export`: output files (`output.json`, `cospends.txt`, block file)
//! - `forker`: shared chain forked into `main` and `fork`
//! - `config`: YAML configuration and command-line overrides
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use testchain::{GeneratorPipeline, Session, SessionOptions};
//! use testchain::config::Config;
//! use testchain::generator::Branch;
//!
//! let config = Config::default();
//! let pipeline = GeneratorPipeline::from_names(config.pipeline.as_slice())?;
//! let mut session = Session::open(SessionOptions {
//!     output_dir: config.general.output_dir.clone(),
//!     node_dir: None,
//!     chain: config.chain_kind()?,
//!     executable: config.general.executable.clone(),
//!     start_time: config.general.start_time,
//!     node: config.node.clone(),
//!     truncate_block_file: true,
//!     branch: Branch::Shared,
//! })?;
//! let report = session.run(&pipeline)?;
//! println!("generated {} blocks", report.blocks_generated());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeMap;

pub mod address;
pub mod chain;
pub mod clock;
pub mod config;
pub mod cospend;
pub mod error;
pub mod export;
pub mod forker;
pub mod generator;
pub mod node;
pub mod pipeline;
pub mod registry;
pub mod rpc;
pub mod session;

/// Key-value outputs generators record; written as `output.json`.
pub type KvMap = BTreeMap<String, serde_json::Value>;

pub use chain::ChainKind;
pub use clock::TimestampAllocator;
pub use config::{Config, RunMode};
pub use cospend::CospendTracker;
pub use error::SessionError;
pub use forker::{ChainForker, ForkOptions, ForkReport};
pub use generator::{Branch, Generator, GeneratorKind, SessionContext};
pub use pipeline::GeneratorPipeline;
pub use registry::AddressRegistry;
pub use rpc::RpcSession;
pub use session::{Session, SessionOptions, SessionReport};
