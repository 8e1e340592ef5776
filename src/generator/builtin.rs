//! Built-in generators.
//!
//! - [`SetupChain`] mines the coinbase-maturity prefix every other generator
//!   spends from.
//! - [`Addresses`] mints one address per supported script type, funds them
//!   and co-spends two of them.
//! - [`FinalizeChain`] confirms whatever is left in the mempool.
//!
//! Blocks pay to the fixed coinbase key, so the setup prefix is identical
//! across runs. Node wallets derive the keys `Addresses` mints from a random
//! seed: the `addresses_<type>` strings, every txid and the final block hash
//! differ between runs. Amounts, counts, heights and co-spend clusters
//! (recorded by `key_index`) depend only on the pipeline position, the
//! branch and the mock clock.

use super::{
    legacy_address_type, Generator, GeneratorKind, GeneratorParams, Registration, SessionContext,
    COINBASE_ADDRESS_KEY,
};
use crate::address::{Address, AddressType};
use crate::chain::ChainKind;
use crate::error::SessionError;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pipeline used when none is configured.
pub const DEFAULT_PIPELINE: [&str; 3] = [SetupChain::NAME, Addresses::NAME, FinalizeChain::NAME];

/// Blocks mined by [`SetupChain`]; coinbase outputs mature after 100.
pub const SETUP_BLOCKS: u32 = 101;

/// Flat fee paid by generated raw transactions, in satoshis.
pub const RAW_TX_FEE: u64 = 10_000;

/// Look up a built-in generator by name.
pub fn lookup(name: &str) -> Option<Registration> {
    match name {
        SetupChain::NAME => Some(Registration::of::<SetupChain>()),
        Addresses::NAME => Some(Registration::of::<Addresses>()),
        FinalizeChain::NAME => Some(Registration::of::<FinalizeChain>()),
        _ => None,
    }
}

/// Mines the initial blocks so the coinbase key has spendable funds.
pub struct SetupChain {
    params: GeneratorParams,
    addresses: Vec<Address>,
}

impl GeneratorKind for SetupChain {
    const NAME: &'static str = "SetupChain";

    fn new(params: GeneratorParams) -> Self {
        SetupChain {
            params,
            addresses: Vec::new(),
        }
    }
}

impl Generator for SetupChain {
    fn name(&self) -> &str {
        self.params.name
    }

    fn offset(&self) -> u64 {
        self.params.offset
    }

    fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    fn run(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), SessionError> {
        let address = ctx.mining_address().to_string();
        info!(target: SetupChain::NAME, "Mining {} blocks to {}", SETUP_BLOCKS, address);
        ctx.record(COINBASE_ADDRESS_KEY, address);
        ctx.mine_blocks(SETUP_BLOCKS)?;

        let height = ctx.rpc.get_block_count()?;
        ctx.record("setup_block_height", height);
        Ok(())
    }
}

/// One address of every script type the chain supports, plus a co-spend.
pub struct Addresses {
    params: GeneratorParams,
    addresses: Vec<Address>,
    rng: StdRng,
}

impl Addresses {
    /// Script types this chain can produce from its wallet.
    pub fn planned_types(chain: ChainKind) -> &'static [AddressType] {
        match chain {
            // No segwit on the cash fork
            ChainKind::Bch => &[AddressType::P2pkh, AddressType::P2sh],
            ChainKind::Btc | ChainKind::Ltc => &AddressType::ALL,
        }
    }

    fn key_index(&self) -> u64 {
        self.params.offset + self.addresses.len() as u64
    }

    fn label(&self, key_index: u64) -> String {
        format!("{}-{}", self.params.name, key_index)
    }

    fn mint(&mut self, ctx: &mut SessionContext<'_>, kind: AddressType) -> Result<(String, u64), SessionError> {
        let key_index = self.key_index();
        let label = self.label(key_index);
        let chain = self.params.chain;

        let address = match (kind, chain) {
            (AddressType::P2pkh, _) => ctx.rpc.get_new_address(&label, legacy_address_type(chain))?,
            // The cash fork wraps a legacy key in a 1-of-1 multisig for P2SH
            (AddressType::P2sh, ChainKind::Bch) => {
                let key = ctx.rpc.get_new_address(&label, None)?;
                ctx.rpc.add_multisig_address(1, &[key], &label, None)?
            }
            (AddressType::P2wsh, _) => {
                let key = ctx.rpc.get_new_address(&label, Some("bech32"))?;
                ctx.rpc.add_multisig_address(1, &[key], &label, Some("bech32"))?
            }
            (_, _) => ctx.rpc.get_new_address(&label, kind.wallet_address_type())?,
        };

        debug!(target: Addresses::NAME, "Minted {} address {} (key_index {})", kind, address, key_index);
        self.addresses.push(Address::new(kind, key_index));
        ctx.record(format!("addresses_{}", kind), address.clone());
        Ok((address, key_index))
    }

    /// Amount in satoshis between 0.1 and 1 coin, rounded to 1000 sats.
    fn amount(&mut self) -> u64 {
        self.rng.gen_range(10_000..=100_000) * 1_000
    }
}

impl GeneratorKind for Addresses {
    const NAME: &'static str = "Addresses";

    fn new(params: GeneratorParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed());
        Addresses {
            params,
            addresses: Vec::new(),
            rng,
        }
    }
}

impl Generator for Addresses {
    fn name(&self) -> &str {
        self.params.name
    }

    fn offset(&self) -> u64 {
        self.params.offset
    }

    fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    fn run(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), SessionError> {
        let kinds = Self::planned_types(self.params.chain);

        let mut funded = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let (address, key_index) = self.mint(ctx, kind)?;
            let sats = self.amount();
            let txid = ctx.rpc.send_to_address(&address, sats)?;
            ctx.record(format!("addresses_{}_funding_txid", kind), txid);
            ctx.record(format!("addresses_{}_amount", kind), sats);
            funded.push((address, key_index));
        }
        ctx.mine_blocks(1)?;

        // Spend the first two funded outputs together
        let pair = &funded[..2];
        let query: Vec<String> = pair.iter().map(|(address, _)| address.clone()).collect();
        let utxos = ctx.rpc.list_unspent(&query)?;
        if utxos.len() < 2 {
            return Err(SessionError::Plugin(format!(
                "expected 2 unspent outputs for co-spend, found {}",
                utxos.len()
            )));
        }
        let inputs = &utxos[..2];
        let spent = inputs
            .iter()
            .map(|utxo| {
                let address = utxo.address.as_deref().ok_or_else(|| {
                    SessionError::Plugin(format!("unspent output {}:{} has no address", utxo.txid, utxo.vout))
                })?;
                pair.iter()
                    .find(|(funded, _)| funded == address)
                    .map(|(_, key_index)| *key_index)
                    .ok_or_else(|| {
                        SessionError::Plugin(format!("unspent output pays unexpected address {}", address))
                    })
            })
            .collect::<Result<Vec<u64>, SessionError>>()?;

        let total: u64 = inputs.iter().map(|u| u.amount_sats()).sum();
        let change = total.checked_sub(RAW_TX_FEE).filter(|v| *v > 0).ok_or_else(|| {
            SessionError::Plugin(format!("co-spend inputs ({} sats) do not cover the fee", total))
        })?;

        let (destination, _) = self.mint(ctx, AddressType::P2pkh)?;
        let raw = ctx.rpc.create_raw_transaction(inputs, &[(destination, change)])?;
        let signed = ctx.rpc.sign_raw_transaction_with_wallet(&raw)?;
        if !signed.complete {
            return Err(SessionError::Plugin("co-spend transaction not fully signed".to_string()));
        }
        let txid = ctx.rpc.send_raw_transaction(&signed.hex)?;
        ctx.record("addresses_cospend_txid", txid);

        for window in spent.windows(2) {
            ctx.cospends.union(window[0], window[1]);
        }
        ctx.mine_blocks(1)?;

        info!(target: Addresses::NAME, "Created {} addresses", self.addresses.len());
        Ok(())
    }
}

/// Mines a final block so nothing is left unconfirmed.
pub struct FinalizeChain {
    params: GeneratorParams,
    addresses: Vec<Address>,
}

impl GeneratorKind for FinalizeChain {
    const NAME: &'static str = "FinalizeChain";

    fn new(params: GeneratorParams) -> Self {
        FinalizeChain {
            params,
            addresses: Vec::new(),
        }
    }
}

impl Generator for FinalizeChain {
    fn name(&self) -> &str {
        self.params.name
    }

    fn offset(&self) -> u64 {
        self.params.offset
    }

    fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    fn run(&mut self, ctx: &mut SessionContext<'_>) -> Result<(), SessionError> {
        ctx.mine_blocks(1)?;
        let height = ctx.rpc.get_block_count()?;
        let hash = ctx.rpc.get_best_block_hash()?;
        ctx.record("final_block_height", height);
        ctx.record("final_block_hash", hash);
        Ok(())
    }
}
