//! EVM module.
//!
//! Prepares Ethereum transactions for the interpreter, runs them against a branch of the
//! runtime state and settles gas afterwards. The interpreter itself is abstracted behind
//! [`Executor`].
use num::{BigInt, Signed, ToPrimitive, Zero};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::{
    context::TxContext,
    module::{self, Module as _, Parameters as _},
    modules::{
        self,
        accounts::{Module as Accounts, API as _, ADDRESS_FEE_COLLECTOR},
        core::{Module as Core, API as _},
        feemarket::{self, Module as FeeMarket, API as _},
    },
    storage::{self, Store},
    types::{
        address::Address,
        transaction::{AccessTuple, EthereumTx},
    },
};

#[cfg(test)]
mod test;
pub mod types;

pub use types::{ExecutionOutcome, ExecutionResult, Log, Message, Spec};

/// Unique module name.
const MODULE_NAME: &str = "evm";

/// Default EIP-155 chain identifier.
pub const DEFAULT_CHAIN_ID: u64 = 9000;

/// Base gas of a transaction.
pub const TX_GAS: u64 = 21_000;
/// Base gas of a contract creation transaction (from Homestead).
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
/// Gas per zero byte of data.
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Gas per non-zero byte of data before Istanbul.
pub const TX_DATA_NON_ZERO_GAS_FRONTIER: u64 = 68;
/// Gas per non-zero byte of data from Istanbul (EIP-2028).
pub const TX_DATA_NON_ZERO_GAS_EIP2028: u64 = 16;
/// Gas per access list address (EIP-2930).
pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2_400;
/// Gas per access list storage key (EIP-2930).
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1_900;
/// Gas per 32-byte word of init code (EIP-3860).
pub const INIT_CODE_WORD_GAS: u64 = 2;
/// Maximum refund quotient before London.
pub const REFUND_QUOTIENT: u64 = 2;
/// Maximum refund quotient from London (EIP-3529).
pub const REFUND_QUOTIENT_EIP3529: u64 = 5;

/// Errors emitted by the EVM module.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("failed to transfer {value} from address {from} using the EVM block context transfer function")]
    #[sdk_error(code = 1)]
    EvmCanTransferFailed { value: BigInt, from: Address },

    #[error("max fee per gas less than block base fee ({fee_cap} < {base_fee})")]
    #[sdk_error(code = 2)]
    InsufficientFee { fee_cap: BigInt, base_fee: BigInt },

    #[error("refunded amount value cannot be negative {0}")]
    #[sdk_error(code = 3)]
    InvalidRefund(BigInt),

    #[error("fee collector account failed to refund fees: {0}")]
    #[sdk_error(code = 4)]
    RefundFailed(#[source] modules::accounts::Error),

    #[error("EVM Create operation is disabled")]
    #[sdk_error(code = 5)]
    CreateDisabled,

    #[error("EVM Call operation is disabled")]
    #[sdk_error(code = 6)]
    CallDisabled,

    #[error("execution failed: {0}")]
    #[sdk_error(code = 7)]
    ExecutionFailed(String),

    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),

    #[error("accounts: {0}")]
    #[sdk_error(transparent)]
    Accounts(#[from] modules::accounts::Error),
}

/// Events emitted by the EVM module.
#[derive(Debug, cbor::Encode, crate::Event)]
#[cbor(untagged)]
pub enum Event {
    #[sdk_event(code = 1)]
    EthereumTx { hash: Vec<u8>, gas_limit: u64 },
}

/// Parameters for the EVM module.
#[derive(Clone, Debug, cbor::Encode, cbor::Decode)]
pub struct Parameters {
    /// EIP-155 chain identifier.
    pub chain_id: u64,
    /// Hard fork whose rules apply.
    pub spec: Spec,
    pub enable_create: bool,
    pub enable_call: bool,
    /// Accept legacy transactions without replay protection.
    #[cbor(optional)]
    pub allow_unprotected_txs: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            spec: Spec::default(),
            enable_create: true,
            enable_call: true,
            allow_unprotected_txs: false,
        }
    }
}

/// Errors emitted during EVM parameter validation.
#[derive(Error, Debug)]
pub enum ParameterValidationError {
    #[error("chain id cannot be zero")]
    ZeroChainId,
}

impl module::Parameters for Parameters {
    type Error = ParameterValidationError;

    fn validate_basic(&self) -> Result<(), Self::Error> {
        if self.chain_id == 0 {
            return Err(ParameterValidationError::ZeroChainId);
        }
        Ok(())
    }
}

/// Genesis state for the EVM module.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct Genesis {
    pub parameters: Parameters,
}

/// The interpreter that runs messages.
pub trait Executor {
    /// Execute a message with the given gas budget.
    ///
    /// Value has already been transferred to the callee (or the new contract) in `state`. Any
    /// state written by a reverted message is discarded by the caller.
    fn execute(
        &self,
        state: &mut dyn Store,
        spec: Spec,
        message: &Message,
        gas_limit: u64,
    ) -> ExecutionOutcome;
}

/// Interface that can be called from other modules.
pub trait API {
    /// Base fee in effect for EVM transactions, `None` before London or when the fee market
    /// has no base fee.
    fn base_fee<S: Store>(state: S, height: u64) -> Option<BigInt>;

    /// Whether `from` can transfer `value` under the EVM transfer rule.
    fn can_transfer<S: Store>(state: S, from: Address, value: &BigInt) -> bool;

    /// Return the fee of `leftover_gas` at `gas_price` from the fee collector to `payer`.
    fn refund_gas(
        ctx: &mut TxContext<'_, '_>,
        payer: Address,
        leftover_gas: u64,
        gas_price: &BigInt,
    ) -> Result<(), Error>;

    /// Make the transaction gas meter report exactly `gas_used`.
    fn reset_gas_meter_and_consume_gas(ctx: &mut TxContext<'_, '_>, gas_used: u64);

    /// Run a transaction through the interpreter, returning the gas to charge.
    ///
    /// Does not settle fees.
    fn apply_message<E: Executor + ?Sized>(
        ctx: &mut TxContext<'_, '_>,
        executor: &E,
        tx: &EthereumTx,
        gas_price: &BigInt,
    ) -> Result<ExecutionResult, Error>;

    /// Run a transaction and settle its gas: refund unused fees and reset the gas meter.
    fn apply_transaction<E: Executor + ?Sized>(
        ctx: &mut TxContext<'_, '_>,
        executor: &E,
        tx: &EthereumTx,
    ) -> Result<ExecutionResult, Error>;
}

pub struct Module;

/// Intrinsic gas of a transaction under the given rules.
pub fn intrinsic_gas(
    data: &[u8],
    access_list: &[AccessTuple],
    is_create: bool,
    spec: Spec,
) -> Result<u64, modules::core::Error> {
    let overflow = || modules::core::Error::GasOverflow;

    let mut gas = if is_create && spec >= Spec::Homestead {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };

    if !data.is_empty() {
        let non_zero = data.iter().filter(|b| **b != 0).count() as u64;
        let zero = data.len() as u64 - non_zero;
        let non_zero_gas = if spec >= Spec::Istanbul {
            TX_DATA_NON_ZERO_GAS_EIP2028
        } else {
            TX_DATA_NON_ZERO_GAS_FRONTIER
        };
        gas = non_zero
            .checked_mul(non_zero_gas)
            .and_then(|g| g.checked_add(gas))
            .ok_or_else(overflow)?;
        gas = zero
            .checked_mul(TX_DATA_ZERO_GAS)
            .and_then(|g| g.checked_add(gas))
            .ok_or_else(overflow)?;

        if is_create && spec >= Spec::Shanghai {
            let words = (data.len() as u64 + 31) / 32;
            gas = words
                .checked_mul(INIT_CODE_WORD_GAS)
                .and_then(|g| g.checked_add(gas))
                .ok_or_else(overflow)?;
        }
    }

    if !access_list.is_empty() {
        let keys: u64 = access_list.iter().map(|t| t.storage_keys.len() as u64).sum();
        gas = (access_list.len() as u64)
            .checked_mul(TX_ACCESS_LIST_ADDRESS_GAS)
            .and_then(|g| g.checked_add(gas))
            .ok_or_else(overflow)?;
        gas = keys
            .checked_mul(TX_ACCESS_LIST_STORAGE_KEY_GAS)
            .and_then(|g| g.checked_add(gas))
            .ok_or_else(overflow)?;
    }

    Ok(gas)
}

/// Maximum share of used gas that can be refunded, as a divisor.
pub fn refund_quotient(spec: Spec) -> u64 {
    if spec >= Spec::London {
        REFUND_QUOTIENT_EIP3529
    } else {
        REFUND_QUOTIENT
    }
}

/// Gas returned to the sender: the refund counter capped at `gas_consumed / refund_quotient`.
///
/// # Panics
///
/// Panics if `refund_quotient` is zero.
pub fn gas_to_refund(available_refund: u64, gas_consumed: u64, refund_quotient: u64) -> u64 {
    if refund_quotient == 0 {
        panic!("refund quotient cannot be zero");
    }
    std::cmp::min(available_refund, gas_consumed / refund_quotient)
}

/// Address of a contract created by `sender` with `nonce`.
pub fn contract_address(sender: Address, nonce: u64) -> Address {
    let mut s = rlp::RlpStream::new_list(2);
    s.append(&sender.as_ref().to_vec());
    s.append(&nonce);
    let hash = Keccak256::digest(s.out());
    let mut address = [0u8; Address::SIZE];
    address.copy_from_slice(&hash[12..]);
    Address::from(address)
}

impl Module {
    /// Rejects message kinds disabled by parameters.
    pub fn check_enabled(params: &Parameters, tx: &EthereumTx) -> Result<(), Error> {
        if tx.is_create() && !params.enable_create {
            return Err(Error::CreateDisabled);
        }
        if !tx.is_create() && !params.enable_call {
            return Err(Error::CallDisabled);
        }
        Ok(())
    }
}

impl API for Module {
    fn base_fee<S: Store>(mut state: S, height: u64) -> Option<BigInt> {
        if Self::params(&mut state).spec < Spec::London {
            return None;
        }
        FeeMarket::get_base_fee(state, height)
    }

    fn can_transfer<S: Store>(state: S, from: Address, value: &BigInt) -> bool {
        BigInt::from(Accounts::get_balance(state, from)) >= *value
    }

    fn refund_gas(
        ctx: &mut TxContext<'_, '_>,
        payer: Address,
        leftover_gas: u64,
        gas_price: &BigInt,
    ) -> Result<(), Error> {
        let remaining = BigInt::from(leftover_gas) * gas_price;
        if remaining.is_negative() {
            return Err(Error::InvalidRefund(remaining));
        }
        if remaining.is_zero() {
            return Ok(());
        }
        let amount = remaining
            .to_u128()
            .ok_or(Error::RefundFailed(modules::accounts::Error::InvalidArgument))?;

        Accounts::transfer(ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR, payer, amount)
            .map_err(Error::RefundFailed)
    }

    fn reset_gas_meter_and_consume_gas(ctx: &mut TxContext<'_, '_>, gas_used: u64) {
        if let Some(limit) = Core::gas_meter(ctx).limit() {
            if gas_used > limit {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::error!(logger, "gas used greater than gas wanted";
                    "gas_used" => gas_used,
                    "gas_limit" => limit,
                );
                panic!("gas used {} greater than gas wanted {}", gas_used, limit);
            }
        }
        let meter = Core::gas_meter(ctx);
        let consumed = meter.consumed();
        meter.refund(consumed);
        meter
            .consume(gas_used)
            .expect("gas used is within the meter limit");
    }

    fn apply_message<E: Executor + ?Sized>(
        ctx: &mut TxContext<'_, '_>,
        executor: &E,
        tx: &EthereumTx,
        gas_price: &BigInt,
    ) -> Result<ExecutionResult, Error> {
        let params = Self::params(ctx.runtime_state());
        let fm_params = FeeMarket::params(ctx.runtime_state());
        Self::check_enabled(&params, tx)?;

        let gas_limit = tx.gas_limit;
        let intrinsic = intrinsic_gas(&tx.data, &tx.access_list, tx.is_create(), params.spec)?;
        // Gas already spent on this transaction, e.g. withdrawing rewards to cover the fee.
        let consumed_so_far = Core::used_tx_gas(ctx);
        let upfront = consumed_so_far
            .checked_add(intrinsic)
            .ok_or(modules::core::Error::GasOverflow)?;
        if gas_limit < upfront {
            return Err(modules::core::Error::GasLimitTooLow {
                limit: gas_limit,
                intrinsic: upfront,
            }
            .into());
        }
        let budget = gas_limit - upfront;

        let value = tx
            .value()
            .to_u128()
            .ok_or_else(|| Error::EvmCanTransferFailed {
                value: tx.value(),
                from: tx.from,
            })?;
        let created = tx.to.is_none().then(|| contract_address(tx.from, tx.nonce));
        let message = Message {
            caller: tx.from,
            to: tx.to,
            nonce: tx.nonce,
            value,
            gas_price: gas_price.clone(),
            data: tx.data.clone(),
            access_list: tx.access_list.clone(),
        };

        // Execution writes into its own branch so a revert leaves no trace.
        let outcome = {
            let mut branch = storage::OverlayStore::new(ctx.runtime_state());
            let callee = created.or(tx.to).unwrap_or_default();
            match Accounts::transfer(&mut branch, tx.from, callee, value) {
                Err(err) => ExecutionOutcome {
                    reverted: true,
                    vm_error: Some(err.to_string()),
                    ..Default::default()
                },
                Ok(()) => {
                    let mut outcome = executor.execute(&mut branch, params.spec, &message, budget);
                    if outcome.reverted && outcome.vm_error.is_none() {
                        outcome.vm_error = Some("execution reverted".to_owned());
                    }
                    if outcome.vm_error.is_some() {
                        outcome.logs.clear();
                    } else {
                        if let Some(address) = created {
                            Accounts::set_code(&mut branch, address, outcome.return_data.clone());
                        }
                        branch.commit();
                    }
                    outcome
                }
            }
        };

        let temporary_gas_used = match upfront
            .checked_add(outcome.gas_used)
            .filter(|used| *used <= gas_limit)
        {
            Some(used) => used,
            None => {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::error!(logger, "gas used greater than gas wanted";
                    "upfront" => upfront,
                    "gas_used" => outcome.gas_used,
                    "gas_limit" => gas_limit,
                );
                panic!(
                    "gas used greater than gas wanted: {} + {} > {}",
                    upfront, outcome.gas_used, gas_limit
                )
            }
        };

        let quotient = refund_quotient(params.spec);
        if quotient == 0 {
            let logger = ctx.get_logger(MODULE_NAME);
            slog::error!(logger, "refund quotient cannot be zero"; "spec" => ?params.spec);
        }
        let refund = gas_to_refund(outcome.refund, temporary_gas_used, quotient);
        let leftover_gas = gas_limit - temporary_gas_used + refund;

        // The min gas multiplier sets a floor on the gas charged.
        let min_gas_used = fm_params
            .min_gas_multiplier
            .mul_int(&BigInt::from(gas_limit))
            .truncate()
            .to_u64()
            .unwrap_or(gas_limit);
        let gas_used = std::cmp::max(gas_limit - leftover_gas, min_gas_used);

        let logger = ctx.get_logger(MODULE_NAME);
        slog::debug!(logger, "applied message";
            "hash" => hex::encode(tx.hash()),
            "gas_used" => gas_used,
            "refund" => refund,
            "reverted" => outcome.reverted,
        );

        Ok(ExecutionResult {
            hash: tx.hash().to_vec(),
            gas_used,
            reverted: outcome.reverted,
            logs: outcome.logs,
            vm_error: outcome.vm_error,
            return_data: outcome.return_data,
            contract_address: created,
        })
    }

    fn apply_transaction<E: Executor + ?Sized>(
        ctx: &mut TxContext<'_, '_>,
        executor: &E,
        tx: &EthereumTx,
    ) -> Result<ExecutionResult, Error> {
        let height = ctx.header().height;
        let base_fee = Self::base_fee(ctx.runtime_state(), height);
        let gas_price = feemarket::effective_gas_price(tx, base_fee.as_ref());

        let result = Self::apply_message(ctx, executor, tx, &gas_price)?;

        let leftover_gas = tx.gas_limit - result.gas_used;
        Self::refund_gas(ctx, tx.from, leftover_gas, &gas_price)?;
        Self::reset_gas_meter_and_consume_gas(ctx, result.gas_used);

        Ok(result)
    }
}

impl module::Module for Module {
    const NAME: &'static str = MODULE_NAME;
    type Error = Error;
    type Event = Event;
    type Parameters = Parameters;
}

impl Module {
    /// Initialize state from genesis.
    pub fn init<S: Store>(state: S, genesis: Genesis) {
        genesis
            .parameters
            .validate_basic()
            .expect("invalid genesis parameters");

        // Set genesis parameters.
        Self::set_params(state, genesis.parameters);
    }
}

impl module::BlockHandler for Module {}
