//! Decorators of native Ethereum transactions.
use anyhow::anyhow;
use num::{BigInt, Signed, ToPrimitive, Zero};

use crate::{
    context::{Mode, TxContext},
    crypto::signature::recover_ethereum_signer,
    module::Module as _,
    modules::{
        self,
        accounts::{types::Account, Module as Accounts, API as _, ADDRESS_FEE_COLLECTOR},
        core::{GasMeter, Module as Core, API as _},
        evm::{self as evm_module, Module as Evm, API as _},
        feemarket::{self, Module as FeeMarket, API as _},
        rewards::{Module as Rewards, API as _},
    },
    types::{
        address::Address,
        transaction::{ensure_numeric_width, EthereumTx, Transaction, MAX_NUMERIC_BITS},
    },
};

use super::{
    account_exists, ethereum_tx, gas_wanted, malformed, set_gas_wanted, AnteChain, AnteDecorator,
    Error, Route, MODULE_NAME,
};

/// The decorator chain of native Ethereum transactions.
pub fn chain() -> AnteChain {
    AnteChain::new(
        Route::NativeEvm,
        vec![
            Box::new(SetUpContext),
            Box::new(MempoolFee),
            Box::new(MinGasPrice),
            Box::new(BasicValidation),
            Box::new(SigVerification),
            Box::new(AccountVerification),
            Box::new(GasConsumption),
            Box::new(CanTransfer),
            Box::new(IncrementSenderSequence),
            Box::new(GasWanted),
            Box::new(EmitEvent),
        ],
    )
}

fn base_fee(ctx: &mut TxContext<'_, '_>) -> Option<BigInt> {
    let height = ctx.header().height;
    Evm::base_fee(ctx.runtime_state(), height)
}

/// Installs an infinite gas meter; the real limit is set once the fee is paid.
pub struct SetUpContext;

impl AnteDecorator for SetUpContext {
    fn name(&self) -> &'static str {
        "SetUpContext"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        _tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        Core::set_gas_meter(ctx, GasMeter::infinite());
        Ok(())
    }
}

/// Applies the node's own minimum gas prices while the base fee is disabled.
pub struct MempoolFee;

impl AnteDecorator for MempoolFee {
    fn name(&self) -> &'static str {
        "MempoolFee"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error> {
        if !ctx.is_check_only() || simulate {
            return Ok(());
        }
        if base_fee(ctx).is_some() {
            return Ok(());
        }
        let min_gas_prices = ctx.local_config().min_gas_prices.clone();
        if min_gas_prices.is_zero() {
            return Ok(());
        }

        let tx = ethereum_tx(tx)?;
        feemarket::check_min_gas_price(&min_gas_prices, &tx.fee(), tx.gas_limit)?;
        Ok(())
    }
}

/// Enforces the chain-wide minimum gas price against the effective fee.
pub struct MinGasPrice;

impl AnteDecorator for MinGasPrice {
    fn name(&self) -> &'static str {
        "MinGasPrice"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let min_gas_price = FeeMarket::params(ctx.runtime_state()).min_gas_price;
        if min_gas_price.is_zero() {
            return Ok(());
        }

        let tx = ethereum_tx(tx)?;
        let base_fee = base_fee(ctx);
        let fee = feemarket::effective_fee(tx, base_fee.as_ref());
        feemarket::check_min_gas_price(&min_gas_price, &fee, tx.gas_limit)?;
        Ok(())
    }
}

/// Stateless checks of the transaction fields.
pub struct BasicValidation;

impl AnteDecorator for BasicValidation {
    fn name(&self) -> &'static str {
        "BasicValidation"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        // Already validated when first checked.
        if ctx.is_recheck() {
            return Ok(());
        }
        let tx = ethereum_tx(tx)?;

        for (field, value) in tx.numeric_fields() {
            if value.bits() > MAX_NUMERIC_BITS {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::error!(logger, "numeric field exceeds protocol width";
                    "field" => field,
                    "bits" => value.bits(),
                );
            }
            ensure_numeric_width(field, value);

            if value.is_negative() {
                return Err(modules::core::Error::InvalidFeeValue {
                    field,
                    value: value.clone(),
                }
                .into());
            }
        }

        if tx.gas_limit == 0 {
            return Err(malformed("gas limit must not be zero"));
        }

        let params = Evm::params(ctx.runtime_state());
        if let Some(chain_id) = tx.chain_id {
            if chain_id != params.chain_id {
                return Err(modules::core::Error::InvalidChainId {
                    expected: params.chain_id,
                    got: chain_id,
                }
                .into());
            }
        }
        if tx.is_unprotected() && !params.allow_unprotected_txs {
            return Err(malformed("only replay-protected (EIP-155) transactions allowed"));
        }

        Ok(())
    }
}

/// Recovers the signer of transactions included in a block.
///
/// Checked transactions are authenticated by [`AccountVerification`].
pub struct SigVerification;

impl AnteDecorator for SigVerification {
    fn name(&self) -> &'static str {
        "SigVerification"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        if ctx.mode() != Mode::ExecuteTx {
            return Ok(());
        }
        let tx = ethereum_tx(tx)?;
        verify_sender(tx.from, tx)
    }
}

fn verify_sender(declared: Address, tx: &EthereumTx) -> Result<(), Error> {
    let recovered = recover_ethereum_signer(tx)
        .map_err(|err| modules::core::Error::InvalidSignature(err.into()))?;
    if recovered != declared {
        return Err(modules::core::Error::SenderMismatch {
            declared,
            recovered,
        }
        .into());
    }
    Ok(())
}

/// Admission checks of the sender account.
pub struct AccountVerification;

impl AnteDecorator for AccountVerification {
    fn name(&self) -> &'static str {
        "AccountVerification"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        if !ctx.is_check_only() {
            return Ok(());
        }
        let tx = ethereum_tx(tx)?;
        let sender = tx.from;
        verify_sender(sender, tx)?;

        let state = ctx.runtime_state();
        if Accounts::has_code(&mut *state, sender) {
            return Err(modules::core::Error::NotAnEOA(sender).into());
        }
        if !account_exists(&mut *state, sender) {
            Accounts::set_account(&mut *state, sender, Account::default());
        }

        // Pending rewards can be withdrawn to cover the fee.
        let balance = Accounts::get_balance(&mut *state, sender);
        let rewards = Rewards::get_pending_delegation_rewards(&mut *state, sender);
        let cost = tx.cost();
        if BigInt::from(balance) + BigInt::from(rewards) < cost {
            return Err(modules::core::Error::InsufficientFunds(format!(
                "sender balance < tx cost ({} < {})",
                balance, cost
            ))
            .into());
        }

        Ok(())
    }
}

/// Charges the fee and installs the real gas meter.
pub struct GasConsumption;

impl GasConsumption {
    /// Move `fee` from `sender` to the fee collector.
    ///
    /// When the balance falls short, every pending staking reward of the sender is withdrawn
    /// once and the deduction is retried. The withdrawal is charged to the gas meter.
    fn deduct_fee(ctx: &mut TxContext<'_, '_>, sender: Address, fee: &BigInt) -> Result<(), Error> {
        if fee.is_zero() {
            return Ok(());
        }
        let amount = fee.to_u128().ok_or_else(|| {
            modules::core::Error::InsufficientFunds(format!("fee {} exceeds any balance", fee))
        })?;

        let balance = Accounts::get_balance(ctx.runtime_state(), sender);
        if balance < amount {
            let rewards = Rewards::get_pending_delegation_rewards(ctx.runtime_state(), sender);
            if balance.saturating_add(rewards) < amount {
                return Err(modules::core::Error::InsufficientFunds(format!(
                    "insufficient funds to pay for fees; {} < {}",
                    balance, amount
                ))
                .into());
            }

            let withdrawn = Rewards::withdraw_all_delegation_rewards(ctx, sender)?;
            let logger = ctx.get_logger(MODULE_NAME);
            slog::info!(logger, "withdrew staking rewards to pay for fees";
                "sender" => sender,
                "withdrawn" => withdrawn,
                "fee" => amount,
            );
        }

        Accounts::transfer(ctx.runtime_state(), sender, *ADDRESS_FEE_COLLECTOR, amount)?;
        Ok(())
    }
}

impl AnteDecorator for GasConsumption {
    fn name(&self) -> &'static str {
        "GasConsumption"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let tx = ethereum_tx(tx)?;
        let sender = tx.from;

        if ctx.mode() == Mode::ExecuteTx && !account_exists(ctx.runtime_state(), sender) {
            return Err(modules::core::Error::UnknownSender(sender).into());
        }

        let params = Evm::params(ctx.runtime_state());
        let intrinsic =
            evm_module::intrinsic_gas(&tx.data, &tx.access_list, tx.is_create(), params.spec)?;
        if tx.gas_limit < intrinsic {
            return Err(modules::core::Error::GasLimitTooLow {
                limit: tx.gas_limit,
                intrinsic,
            }
            .into());
        }
        let block_remaining = ctx.block_gas_remaining();
        if tx.gas_limit > block_remaining {
            return Err(modules::core::Error::GasLimitExceedsBlock {
                limit: tx.gas_limit,
                max: block_remaining,
            }
            .into());
        }

        let base_fee = base_fee(ctx);
        if ctx.is_recheck() {
            // The fee was paid when the transaction was first checked.
            Core::set_gas_meter(ctx, GasMeter::new(0));
        } else {
            Core::set_gas_meter(ctx, GasMeter::new(tx.gas_limit));
            let fee = feemarket::effective_fee(tx, base_fee.as_ref());
            Self::deduct_fee(ctx, sender, &fee)?;
        }

        Core::set_priority(ctx, feemarket::tx_priority(tx, base_fee.as_ref()));

        let max_tx_gas_wanted = ctx.local_config().max_tx_gas_wanted;
        let gas_wanted = if ctx.is_check_only() && max_tx_gas_wanted != 0 {
            std::cmp::min(tx.gas_limit, max_tx_gas_wanted)
        } else {
            tx.gas_limit
        };
        set_gas_wanted(ctx, gas_wanted);

        Ok(())
    }
}

/// Applies the EVM transfer rule and the fee cap rule.
pub struct CanTransfer;

impl AnteDecorator for CanTransfer {
    fn name(&self) -> &'static str {
        "CanTransfer"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let tx = ethereum_tx(tx)?;
        let params = Evm::params(ctx.runtime_state());
        Evm::check_enabled(&params, tx)?;

        if let Some(base_fee) = base_fee(ctx) {
            let fee_cap = tx.gas_fee_cap();
            if fee_cap < base_fee {
                return Err(evm_module::Error::InsufficientFee { fee_cap, base_fee }.into());
            }
        }

        let value = tx.value();
        if value.is_positive() && !Evm::can_transfer(ctx.runtime_state(), tx.from, &value) {
            return Err(evm_module::Error::EvmCanTransferFailed {
                value,
                from: tx.from,
            }
            .into());
        }

        Ok(())
    }
}

/// Checks and bumps the sender nonce of transactions included in a block.
pub struct IncrementSenderSequence;

impl AnteDecorator for IncrementSenderSequence {
    fn name(&self) -> &'static str {
        "IncrementSenderSequence"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        if ctx.is_check_only() {
            return Ok(());
        }
        let tx = ethereum_tx(tx)?;
        let sender = tx.from;
        let simulation = ctx.is_simulation();

        let state = ctx.runtime_state();
        if !account_exists(&mut *state, sender) && !simulation {
            return Err(modules::core::Error::UnknownSender(sender).into());
        }

        let nonce = Accounts::get_nonce(&mut *state, sender);
        if tx.nonce != nonce {
            return Err(modules::core::Error::InvalidNonce {
                expected: nonce,
                got: tx.nonce,
            }
            .into());
        }
        let next = nonce
            .checked_add(1)
            .ok_or_else(|| modules::core::Error::MalformedTransaction(anyhow!("nonce overflow")))?;
        Accounts::set_nonce(state, sender, next);

        Ok(())
    }
}

/// Records the gas wanted by the block for the base fee adjustment.
pub struct GasWanted;

impl AnteDecorator for GasWanted {
    fn name(&self) -> &'static str {
        "GasWanted"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        if base_fee(ctx).is_none() {
            return Ok(());
        }
        let gas_wanted = gas_wanted(ctx, tx);
        let max_gas = ctx.header().max_gas;
        if max_gas != 0 && gas_wanted > max_gas {
            return Err(modules::core::Error::GasLimitExceedsBlock {
                limit: gas_wanted,
                max: max_gas,
            }
            .into());
        }

        FeeMarket::add_transient_gas_wanted(ctx.runtime_state(), gas_wanted)?;
        Ok(())
    }
}

/// Emits the transaction event.
pub struct EmitEvent;

impl AnteDecorator for EmitEvent {
    fn name(&self) -> &'static str {
        "EmitEvent"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let tx = ethereum_tx(tx)?;
        ctx.emit_event(evm_module::Event::EthereumTx {
            hash: tx.hash().to_vec(),
            gas_limit: tx.gas_limit,
        });
        Ok(())
    }
}
