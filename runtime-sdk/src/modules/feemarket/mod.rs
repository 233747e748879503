//! Fee market module.
//!
//! Maintains an EIP-1559 style base fee that adjusts every block from the gas wanted by the
//! previous block, together with the chain-wide minimum gas price.
use num::{bigint::Sign, BigInt, Signed, ToPrimitive, Zero};
use thiserror::Error;

use crate::{
    context::DispatchContext,
    module::{self, Module as _, Parameters as _},
    modules,
    storage::{self, Store},
    types::{decimal::Decimal, transaction::EthereumTx},
};


/// Unique module name.
const MODULE_NAME: &str = "feemarket";

/// Divisor applied to the effective tip when computing transaction priority.
pub const DEFAULT_PRIORITY_REDUCTION: u64 = 1_000_000;
/// Initial base fee.
pub const DEFAULT_BASE_FEE: u128 = 1_000_000_000;
/// Bounds the amount the base fee can change between blocks.
pub const DEFAULT_BASE_FEE_CHANGE_DENOMINATOR: u32 = 8;
/// Bounds the maximum gas limit an EIP-1559 block may have.
pub const DEFAULT_ELASTICITY_MULTIPLIER: u32 = 2;

/// Errors emitted by the fee market module.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("provided fee < minimum global fee ({provided} < {required}). Please increase the priority tip (for EIP-1559 txs) or the gas prices (for access list or legacy txs)")]
    #[sdk_error(code = 1)]
    FeeTooLow { provided: Decimal, required: Decimal },

    #[error("gas prices too low, got: {price} required: {base_fee}. Please retry using a higher gas price or a higher fee")]
    #[sdk_error(code = 2)]
    GasPriceTooLow { price: BigInt, base_fee: BigInt },

    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),
}

/// Parameters for the fee market module.
#[derive(Clone, Debug, cbor::Encode, cbor::Decode)]
pub struct Parameters {
    /// Disables the base fee mechanism entirely.
    #[cbor(optional)]
    pub no_base_fee: bool,
    pub base_fee_change_denominator: u32,
    pub elasticity_multiplier: u32,
    /// Height at which the base fee mechanism activates.
    #[cbor(optional)]
    pub enable_height: u64,
    /// Base fee at activation.
    pub base_fee: u128,
    /// Chain-wide minimum gas price, also the floor of the base fee.
    pub min_gas_price: Decimal,
    /// Fraction of the gas limit that is always charged, also scaling block gas wanted.
    pub min_gas_multiplier: Decimal,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            no_base_fee: false,
            base_fee_change_denominator: DEFAULT_BASE_FEE_CHANGE_DENOMINATOR,
            elasticity_multiplier: DEFAULT_ELASTICITY_MULTIPLIER,
            enable_height: 0,
            base_fee: DEFAULT_BASE_FEE,
            min_gas_price: Decimal::zero(),
            min_gas_multiplier: default_min_gas_multiplier(),
        }
    }
}

fn default_min_gas_multiplier() -> Decimal {
    // One half.
    Decimal::from_raw(BigInt::from(500_000_000_000_000_000u64))
}

impl Parameters {
    /// Whether the base fee mechanism is active at the given height.
    pub fn is_base_fee_enabled(&self, height: u64) -> bool {
        !self.no_base_fee && height >= self.enable_height
    }
}

/// Errors emitted during fee market parameter validation.
#[derive(Error, Debug)]
pub enum ParameterValidationError {
    #[error("base fee change denominator cannot be 0")]
    ZeroBaseFeeChangeDenominator,

    #[error("elasticity multiplier cannot be 0")]
    ZeroElasticityMultiplier,

    #[error("min gas price cannot be negative: {0}")]
    NegativeMinGasPrice(Decimal),

    #[error("min gas multiplier must be between 0 and 1: {0}")]
    InvalidMinGasMultiplier(Decimal),
}

impl module::Parameters for Parameters {
    type Error = ParameterValidationError;

    fn validate_basic(&self) -> Result<(), Self::Error> {
        if self.base_fee_change_denominator == 0 {
            return Err(ParameterValidationError::ZeroBaseFeeChangeDenominator);
        }
        if self.elasticity_multiplier == 0 {
            return Err(ParameterValidationError::ZeroElasticityMultiplier);
        }
        if self.min_gas_price.is_negative() {
            return Err(ParameterValidationError::NegativeMinGasPrice(
                self.min_gas_price.clone(),
            ));
        }
        if self.min_gas_multiplier.is_negative()
            || self.min_gas_multiplier > Decimal::from_integer(1)
        {
            return Err(ParameterValidationError::InvalidMinGasMultiplier(
                self.min_gas_multiplier.clone(),
            ));
        }
        Ok(())
    }
}

/// Genesis state for the fee market module.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct Genesis {
    pub parameters: Parameters,
    /// Gas wanted by the block preceding genesis.
    #[cbor(optional)]
    pub block_gas_wanted: u64,
}

/// State schema constants.
pub mod state {
    /// Current base fee (big-endian magnitude).
    pub const BASE_FEE: &[u8] = &[0x01];
    /// Gas wanted by the previous block.
    pub const BLOCK_GAS_WANTED: &[u8] = &[0x02];
    /// Gas wanted by transactions of the current block so far.
    pub const TRANSIENT_GAS_WANTED: &[u8] = &[0x03];
}

/// Interface that can be called from other modules.
pub trait API {
    /// Current base fee, `None` when the base fee mechanism is not active at the height.
    fn get_base_fee<S: Store>(state: S, height: u64) -> Option<BigInt>;

    /// Set the current base fee.
    fn set_base_fee<S: Store>(state: S, base_fee: &BigInt);

    /// Gas wanted by the previous block.
    fn get_block_gas_wanted<S: Store>(state: S) -> u64;

    /// Gas wanted by transactions of the current block so far.
    fn get_transient_gas_wanted<S: Store>(state: S) -> u64;

    /// Record gas wanted by a transaction of the current block, returning the new total.
    fn add_transient_gas_wanted<S: Store>(state: S, gas: u64) -> Result<u64, Error>;

    /// Compute the base fee of the current block from the previous block.
    ///
    /// Returns `None` when the base fee mechanism is not active or the block gas limit is too
    /// large to derive a gas target.
    fn calculate_base_fee(ctx: &mut DispatchContext<'_>) -> Option<BigInt>;
}

pub struct Module;

impl Module {
    fn set_block_gas_wanted<S: Store>(state: S, gas: u64) {
        let mut store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.insert(state::BLOCK_GAS_WANTED, gas);
    }

    fn reset_transient_gas_wanted<S: Store>(state: S) {
        let mut store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.remove(state::TRANSIENT_GAS_WANTED);
    }
}

impl API for Module {
    fn get_base_fee<S: Store>(mut state: S, height: u64) -> Option<BigInt> {
        let params = Self::params(&mut state);
        if !params.is_base_fee_enabled(height) {
            return None;
        }
        let store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        let base_fee = store
            .get::<_, Vec<u8>>(state::BASE_FEE)
            .map(|raw| BigInt::from_bytes_be(Sign::Plus, &raw))
            .unwrap_or_else(|| BigInt::from(params.base_fee));
        Some(base_fee)
    }

    fn set_base_fee<S: Store>(state: S, base_fee: &BigInt) {
        let mut store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        let (_, raw) = base_fee.abs().to_bytes_be();
        store.insert(state::BASE_FEE, raw);
    }

    fn get_block_gas_wanted<S: Store>(state: S) -> u64 {
        let store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.get(state::BLOCK_GAS_WANTED).unwrap_or_default()
    }

    fn get_transient_gas_wanted<S: Store>(state: S) -> u64 {
        let store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.get(state::TRANSIENT_GAS_WANTED).unwrap_or_default()
    }

    fn add_transient_gas_wanted<S: Store>(mut state: S, gas: u64) -> Result<u64, Error> {
        let total = Self::get_transient_gas_wanted(&mut state)
            .checked_add(gas)
            .ok_or(modules::core::Error::GasOverflow)?;
        let mut store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.insert(state::TRANSIENT_GAS_WANTED, total);
        Ok(total)
    }

    fn calculate_base_fee(ctx: &mut DispatchContext<'_>) -> Option<BigInt> {
        let height = ctx.header().height;
        let max_gas = ctx.header().max_gas;
        let params = Self::params(ctx.runtime_state());
        if !params.is_base_fee_enabled(height) {
            return None;
        }

        // At activation the initial base fee is used as is.
        if height == params.enable_height {
            return Some(BigInt::from(params.base_fee));
        }

        let parent_base_fee = Self::get_base_fee(ctx.runtime_state(), height)?;
        let parent_gas_used = Self::get_block_gas_wanted(ctx.runtime_state());

        let gas_limit = if max_gas == 0 {
            i64::MAX as u64
        } else {
            max_gas
        };
        let parent_gas_target = gas_limit / u64::from(params.elasticity_multiplier);
        if parent_gas_target == 0 {
            return None;
        }
        let denominator = BigInt::from(params.base_fee_change_denominator);

        if parent_gas_used == parent_gas_target {
            return Some(parent_base_fee);
        }

        if parent_gas_used > parent_gas_target {
            // Block used more gas than its target, the base fee increases.
            let gas_used_delta = BigInt::from(parent_gas_used - parent_gas_target);
            let delta = &parent_base_fee * gas_used_delta / BigInt::from(parent_gas_target)
                / &denominator;
            let delta = std::cmp::max(delta, BigInt::from(1));
            return Some(parent_base_fee + delta);
        }

        // Block used less gas than its target, the base fee decreases.
        let gas_used_delta = BigInt::from(parent_gas_target - parent_gas_used);
        let delta =
            &parent_base_fee * gas_used_delta / BigInt::from(parent_gas_target) / &denominator;

        // Transactions below the minimum gas price never reach the mempool so the base fee does
        // not need to go lower.
        let floor = params.min_gas_price.truncate();
        Some(std::cmp::max(parent_base_fee - delta, floor))
    }
}

/// EIP-1559 price per gas: `min(fee cap, base fee + tip cap)`, never negative.
pub fn effective_price(base_fee: &BigInt, fee_cap: &BigInt, tip_cap: &BigInt) -> BigInt {
    let price = std::cmp::min(fee_cap.clone(), base_fee + tip_cap);
    std::cmp::max(price, BigInt::zero())
}

/// Price per gas a transaction pays at the given base fee.
///
/// Flat-priced transactions pay their gas price. Dynamic fee transactions pay
/// [`effective_price`], or their fee cap when there is no base fee.
pub fn effective_gas_price(tx: &EthereumTx, base_fee: Option<&BigInt>) -> BigInt {
    if !tx.is_dynamic_fee() {
        return tx.gas_price();
    }
    match base_fee {
        Some(base_fee) => effective_price(base_fee, &tx.gas_fee_cap(), &tx.gas_tip_cap()),
        None => tx.gas_fee_cap(),
    }
}

/// Fee a transaction pays for its whole gas limit at the given base fee.
pub fn effective_fee(tx: &EthereumTx, base_fee: Option<&BigInt>) -> BigInt {
    effective_gas_price(tx, base_fee) * BigInt::from(tx.gas_limit)
}

/// Mempool priority of a tip above the base fee.
///
/// The tip divided by `DEFAULT_PRIORITY_REDUCTION`, saturating at `i64::MAX` and never
/// negative.
pub fn priority_from_tip(tip: BigInt) -> i64 {
    let priority = tip / BigInt::from(DEFAULT_PRIORITY_REDUCTION);
    if priority.is_negative() {
        return 0;
    }
    priority.to_i64().unwrap_or(i64::MAX)
}

/// Mempool priority of a transaction.
pub fn tx_priority(tx: &EthereumTx, base_fee: Option<&BigInt>) -> i64 {
    let mut tip = effective_gas_price(tx, base_fee);
    if let Some(base_fee) = base_fee {
        tip -= base_fee;
    }
    priority_from_tip(tip)
}

/// Checks that `fee` covers `min_gas_price × gas`.
///
/// A zero minimum gas price accepts everything.
pub fn check_min_gas_price(min_gas_price: &Decimal, fee: &BigInt, gas: u64) -> Result<(), Error> {
    if min_gas_price.is_zero() {
        return Ok(());
    }
    let required = min_gas_price.mul_int(&BigInt::from(gas));
    let provided = Decimal::from_integer(fee.clone());
    if provided < required {
        return Err(Error::FeeTooLow { provided, required });
    }
    Ok(())
}

impl module::Module for Module {
    const NAME: &'static str = MODULE_NAME;
    type Error = Error;
    type Event = ();
    type Parameters = Parameters;
}

impl Module {
    /// Initialize state from genesis.
    pub fn init<S: Store>(mut state: S, genesis: Genesis) {
        genesis
            .parameters
            .validate_basic()
            .expect("invalid genesis parameters");

        Self::set_block_gas_wanted(&mut state, genesis.block_gas_wanted);
        Self::set_base_fee(&mut state, &BigInt::from(genesis.parameters.base_fee));

        // Set genesis parameters.
        Self::set_params(state, genesis.parameters);
    }
}

impl module::BlockHandler for Module {
    fn begin_block(ctx: &mut DispatchContext<'_>) {
        let logger = ctx.get_logger(MODULE_NAME);
        if let Some(base_fee) = Self::calculate_base_fee(ctx) {
            slog::debug!(logger, "updated base fee";
                "height" => ctx.header().height,
                "base_fee" => %base_fee
            );
            Self::set_base_fee(ctx.runtime_state(), &base_fee);
        }
    }

    fn end_block(ctx: &mut DispatchContext<'_>) {
        let params = Self::params(ctx.runtime_state());
        let gas_wanted = Self::get_transient_gas_wanted(ctx.runtime_state());
        let gas_used = ctx.block_gas_used();

        // Scaled gas wanted, but never below the gas actually used.
        let limited = params
            .min_gas_multiplier
            .mul_int(&BigInt::from(gas_wanted))
            .truncate()
            .to_u64()
            .unwrap_or(u64::MAX);
        let block_gas_wanted = std::cmp::max(limited, gas_used);

        Self::set_block_gas_wanted(ctx.runtime_state(), block_gas_wanted);
        Self::reset_transient_gas_wanted(ctx.runtime_state());
    }
}
