//! Generator plug-in contract.
//!
//! A generator issues a sequence of RPC calls that leaves a recognizable
//! transaction shape on the chain. Generators are instantiated per session
//! with [`GeneratorParams`] and run strictly one after another against a
//! [`SessionContext`] that carries the state they share: the RPC handle,
//! the mock clock, the key-value output map and the co-spend tracker.
//!
//! Logging goes through the `log` facade; each generator logs under its own
//! name as target.

pub mod builtin;

use crate::address::Address;
use crate::chain::ChainKind;
use crate::clock::TimestampAllocator;
use crate::cospend::CospendTracker;
use crate::error::SessionError;
use crate::rpc::RpcSession;
use crate::KvMap;
use serde_json::Value;
use std::fmt;

/// Spacing between the identifier ranges of consecutive generators.
pub const OFFSET_STRIDE: u64 = 10_000;

/// kv key recording the address coinbase rewards are mined to.
pub const COINBASE_ADDRESS_KEY: &str = "setup_coinbase_address";

/// Which chain of a fork triple a session builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Branch {
    /// A standalone chain, or the common history of a fork
    #[default]
    Shared,
    Main,
    Fork,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Shared => "shared",
            Branch::Main => "main",
            Branch::Fork => "fork",
        }
    }

    /// Per-branch salt generators mix into their seeds so that `main` and
    /// `fork` diverge while each stays reproducible.
    pub fn salt(&self) -> u64 {
        match self {
            Branch::Shared => 0,
            Branch::Main => 1,
            Branch::Fork => 2,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction parameters handed to each generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorParams {
    pub name: &'static str,
    pub chain: ChainKind,
    /// Base of this generator's identifier range: `(position + 1) * 10000`
    pub offset: u64,
    pub branch: Branch,
}

impl GeneratorParams {
    /// Seed for the generator's RNG, unique per generator and branch.
    pub fn seed(&self) -> u64 {
        self.offset ^ self.branch.salt().rotate_left(32)
    }
}

/// State shared by all generators of one session.
pub struct SessionContext<'a> {
    pub rpc: &'a RpcSession,
    pub chain: ChainKind,
    /// Legacy address of the imported coinbase key
    pub coinbase_address: &'a str,
    pub kv: &'a mut KvMap,
    pub clock: &'a mut TimestampAllocator,
    pub cospends: &'a mut CospendTracker,
}

impl SessionContext<'_> {
    /// Next block timestamp from the session's mock clock.
    pub fn next_timestamp(&mut self) -> Result<u64, SessionError> {
        Ok(self.clock.next()?)
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.kv.insert(key.into(), value.into());
    }

    /// The address coinbase rewards go to.
    pub fn mining_address(&self) -> &str {
        self.coinbase_address
    }

    /// Mine `count` blocks one at a time, each stamped with the next mock-time.
    ///
    /// Returns the hashes of the mined blocks.
    pub fn mine_blocks(&mut self, count: u32) -> Result<Vec<String>, SessionError> {
        let address = self.coinbase_address;
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let timestamp = self.next_timestamp()?;
            self.rpc.set_mock_time(timestamp)?;
            hashes.extend(self.rpc.generate_to_address(1, address)?);
        }
        Ok(hashes)
    }
}

/// `getnewaddress` type for a plain P2PKH address, if the chain takes one.
///
/// The cash fork has no address-type argument at all.
pub fn legacy_address_type(chain: ChainKind) -> Option<&'static str> {
    match chain {
        ChainKind::Bch => None,
        ChainKind::Btc | ChainKind::Ltc => Some("legacy"),
    }
}

/// Object-safe half of the plug-in contract.
pub trait Generator {
    fn name(&self) -> &str;

    fn offset(&self) -> u64;

    /// Addresses minted so far, in creation order.
    fn addresses(&self) -> &[Address];

    fn run(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), SessionError>;
}

/// Constructor half of the plug-in contract.
pub trait GeneratorKind: Generator + Sized + 'static {
    const NAME: &'static str;

    fn new(params: GeneratorParams) -> Self;
}

/// A registered generator type.
#[derive(Clone, Copy)]
pub struct Registration {
    pub name: &'static str,
    build: fn(GeneratorParams) -> Box<dyn Generator>,
}

impl Registration {
    pub fn of<G: GeneratorKind>() -> Self {
        Registration {
            name: G::NAME,
            build: |params| -> Box<dyn Generator> { Box::new(G::new(params)) },
        }
    }

    pub fn instantiate(&self, chain: ChainKind, offset: u64, branch: Branch) -> Box<dyn Generator> {
        (self.build)(GeneratorParams {
            name: self.name,
            chain,
            offset,
            branch,
        })
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("name", &self.name).finish()
    }
}
