//! Core definitions module.
use num::BigInt;
use thiserror::Error;

use crate::{context::TxContext, module, types::address::Address};

pub mod types;

pub use types::GasMeter;

/// Unique module name.
pub const MODULE_NAME: &str = "core";

/// Errors emitted by the core module.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("malformed transaction: {0}")]
    #[sdk_error(code = 1)]
    MalformedTransaction(#[source] anyhow::Error),

    #[error("rejecting tx with unsupported extension option: {0}")]
    #[sdk_error(code = 2)]
    UnsupportedExtension(String),

    #[error("unknown transaction type")]
    #[sdk_error(code = 3)]
    UnknownTransactionType,

    #[error("invalid {field}: {value}")]
    #[sdk_error(code = 4)]
    InvalidFeeValue { field: &'static str, value: BigInt },

    #[error("invalid nonce: expected {expected}, got {got}")]
    #[sdk_error(code = 5)]
    InvalidNonce { expected: u64, got: u64 },

    #[error("insufficient funds: {0}")]
    #[sdk_error(code = 6)]
    InsufficientFunds(String),

    #[error("gas limit too low: {limit} (gas limit) < {intrinsic} (intrinsic gas)")]
    #[sdk_error(code = 7)]
    GasLimitTooLow { limit: u64, intrinsic: u64 },

    #[error("tx gas ({limit}) exceeds block gas limit ({max})")]
    #[sdk_error(code = 8)]
    GasLimitExceedsBlock { limit: u64, max: u64 },

    #[error("out of gas: limit {limit}, wanted {wanted}")]
    #[sdk_error(code = 9)]
    OutOfGas { limit: u64, wanted: u64 },

    #[error("gas overflow")]
    #[sdk_error(code = 10)]
    GasOverflow,

    #[error("sender mismatch: declared {declared}, recovered {recovered}")]
    #[sdk_error(code = 11)]
    SenderMismatch {
        declared: Address,
        recovered: Address,
    },

    #[error("the sender is not EOA: address {0}")]
    #[sdk_error(code = 12)]
    NotAnEOA(Address),

    #[error("invalid signature: {0}")]
    #[sdk_error(code = 13)]
    InvalidSignature(#[source] anyhow::Error),

    #[error("invalid chain id: expected {expected}, got {got}")]
    #[sdk_error(code = 14)]
    InvalidChainId { expected: u64, got: u64 },

    #[error("account {0} does not exist")]
    #[sdk_error(code = 15)]
    UnknownSender(Address),

    #[error("invariant violation: {0}")]
    #[sdk_error(code = 16)]
    InvariantViolation(String),
}

/// Events emitted by the core module.
#[derive(Debug, PartialEq, Eq, cbor::Encode, crate::Event)]
#[cbor(untagged)]
pub enum Event {
    #[sdk_event(code = 1)]
    GasUsed { amount: u64 },
}

/// Interface for other modules.
pub trait API {
    /// Replace the transaction gas meter.
    fn set_gas_meter(ctx: &mut TxContext<'_, '_>, meter: GasMeter);

    /// Current transaction gas meter.
    fn gas_meter<'c>(ctx: &'c mut TxContext<'_, '_>) -> &'c mut GasMeter;

    /// Attempt to use gas. If the gas specified would cause the total used to exceed the
    /// limit, fails with `Error::OutOfGas` and gas usage is not increased.
    fn use_tx_gas(ctx: &mut TxContext<'_, '_>, gas: u64) -> Result<(), Error>;

    /// Return the remaining gas.
    fn remaining_tx_gas(ctx: &mut TxContext<'_, '_>) -> u64;

    /// Return the used gas.
    fn used_tx_gas(ctx: &mut TxContext<'_, '_>) -> u64;

    /// Set the transaction priority.
    fn set_priority(ctx: &mut TxContext<'_, '_>, priority: i64);

    /// Takes and returns the stored transaction priority.
    fn take_priority(ctx: &mut TxContext<'_, '_>) -> i64;
}

pub struct Module;

const CONTEXT_KEY_GAS_METER: &str = "core.GasMeter";
const CONTEXT_KEY_PRIORITY: &str = "core.Priority";

impl API for Module {
    fn set_gas_meter(ctx: &mut TxContext<'_, '_>, meter: GasMeter) {
        *ctx.tx_value::<GasMeter>(CONTEXT_KEY_GAS_METER) = meter;
    }

    fn gas_meter<'c>(ctx: &'c mut TxContext<'_, '_>) -> &'c mut GasMeter {
        ctx.tx_value::<GasMeter>(CONTEXT_KEY_GAS_METER)
    }

    fn use_tx_gas(ctx: &mut TxContext<'_, '_>, gas: u64) -> Result<(), Error> {
        Self::gas_meter(ctx).consume(gas)
    }

    fn remaining_tx_gas(ctx: &mut TxContext<'_, '_>) -> u64 {
        Self::gas_meter(ctx).remaining()
    }

    fn used_tx_gas(ctx: &mut TxContext<'_, '_>) -> u64 {
        Self::gas_meter(ctx).consumed()
    }

    fn set_priority(ctx: &mut TxContext<'_, '_>, priority: i64) {
        *ctx.tx_value::<i64>(CONTEXT_KEY_PRIORITY) = priority;
    }

    fn take_priority(ctx: &mut TxContext<'_, '_>) -> i64 {
        *ctx.take_tx_value::<i64>(CONTEXT_KEY_PRIORITY)
    }
}

impl module::Module for Module {
    const NAME: &'static str = MODULE_NAME;
    type Error = Error;
    type Event = Event;
    type Parameters = ();
}
