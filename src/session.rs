//! One chain-building session.
//!
//! A session owns exactly one node process and the state every generator
//! shares: the mock clock, the key-value output map, the co-spend tracker
//! and, once the pipeline finished, the address registry. Its lifetime is a
//! single [`Session::run`]; the node is stopped at the end of the run, or
//! when the session is dropped on an error path.

use crate::address::AddressType;
use crate::chain::ChainKind;
use crate::clock::TimestampAllocator;
use crate::config::NodeConfig;
use crate::cospend::CospendTracker;
use crate::error::SessionError;
use crate::export::SessionExporter;
use crate::generator::{Branch, SessionContext};
use crate::node::{NodeHandle, NodeLaunch, NodeSupervisor};
use crate::pipeline::GeneratorPipeline;
use crate::registry::AddressRegistry;
use crate::rpc::RpcSession;
use crate::KvMap;
use log::info;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Inputs of one session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub output_dir: PathBuf,
    /// Existing node data directory; scratch directory when `None`
    pub node_dir: Option<PathBuf>,
    pub chain: ChainKind,
    pub executable: String,
    /// Mock-time epoch; the first block is stamped one interval later
    pub start_time: u64,
    pub node: NodeConfig,
    pub truncate_block_file: bool,
    pub branch: Branch,
}

/// What a finished session produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub chain: ChainKind,
    pub branch: Branch,
    pub start_height: u64,
    pub end_height: u64,
    /// Mock-time cursor after the last generator
    pub final_time: u64,
    pub address_counts: BTreeMap<AddressType, usize>,
    pub duplicate_addresses: bool,
    pub output_dir: PathBuf,
}

impl SessionReport {
    pub fn blocks_generated(&self) -> u64 {
        self.end_height.saturating_sub(self.start_height)
    }
}

pub struct Session {
    options: SessionOptions,
    node: NodeHandle,
    rpc: RpcSession,
    clock: TimestampAllocator,
    kv: KvMap,
    cospends: CospendTracker,
    registry: AddressRegistry,
}

impl Session {
    /// Start the node and import the coinbase key.
    pub fn open(options: SessionOptions) -> Result<Self, SessionError> {
        info!(
            "Opening {} session for {} at mock-time {}",
            options.branch,
            options.chain,
            TimestampAllocator::new(options.start_time).describe()
        );
        let node = NodeSupervisor::start(&NodeLaunch {
            node_dir: options.node_dir.as_deref(),
            chain: options.chain,
            executable: &options.executable,
            mock_time: options.start_time,
            config: &options.node,
        })?;
        let rpc = node.rpc().clone();

        rpc.import_priv_key(&options.node.coinbase_key, "coinbase")?;

        Ok(Session {
            clock: TimestampAllocator::new(options.start_time),
            options,
            node,
            rpc,
            kv: KvMap::new(),
            cospends: CospendTracker::new(),
            registry: AddressRegistry::new(),
        })
    }

    pub fn chain(&self) -> ChainKind {
        self.options.chain
    }

    pub fn node_dir(&self) -> &Path {
        self.node.data_dir()
    }

    pub fn rpc(&self) -> &RpcSession {
        &self.rpc
    }

    /// Current mock-time cursor.
    pub fn current_time(&self) -> u64 {
        self.clock.current()
    }

    pub fn kv(&self) -> &KvMap {
        &self.kv
    }

    pub fn cospends(&self) -> &CospendTracker {
        &self.cospends
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Run the pipeline, stop the node and export the outputs.
    ///
    /// On error the node directory is left as-is for inspection; the node
    /// itself is stopped when the session is dropped.
    pub fn run(&mut self, pipeline: &GeneratorPipeline) -> Result<SessionReport, SessionError> {
        let start_height = self.rpc.get_block_count()?;
        info!("### Starting with a chain of {} blocks", start_height);

        let generators = {
            let mut ctx = SessionContext {
                rpc: &self.rpc,
                chain: self.options.chain,
                coinbase_address: &self.options.node.coinbase_address,
                kv: &mut self.kv,
                clock: &mut self.clock,
                cospends: &mut self.cospends,
            };
            pipeline.run(&mut ctx, self.options.branch, &mut self.node)?
        };

        self.registry = AddressRegistry::new();
        for generator in &generators {
            self.registry.record(generator.name(), generator.addresses());
        }
        let unique = self.registry.duplicates().is_empty();
        self.registry.export_counts(&mut self.kv);

        let end_height = self.rpc.get_block_count()?;
        info!(
            "### Finishing with a chain of {} blocks, generated {} blocks",
            end_height,
            end_height.saturating_sub(start_height)
        );

        // Stopped first so the node has flushed its block file
        self.node.stop()?;

        let exporter = SessionExporter::new(&self.options.output_dir, self.options.chain);
        exporter.copy_tail_block_file(self.node.data_dir(), self.options.truncate_block_file)?;
        exporter.persist_outputs(&self.kv)?;
        exporter.persist_cospends(&self.cospends)?;

        Ok(SessionReport {
            chain: self.options.chain,
            branch: self.options.branch,
            start_height,
            end_height,
            final_time: self.clock.current(),
            address_counts: self.registry.counts(),
            duplicate_addresses: !unique,
            output_dir: exporter.chain_dir().to_path_buf(),
        })
    }

    /// Stop the node without running anything.
    pub fn close(mut self) -> Result<(), SessionError> {
        self.node.stop()
    }
}
