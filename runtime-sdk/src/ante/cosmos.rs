//! Decorators of native transactions.
//!
//! The plain, EIP-712 and dynamic fee routes share one chain. The route only changes how
//! signatures are digested and how the fee is priced.
use anyhow::anyhow;
use num::{BigInt, Signed, ToPrimitive, Zero};

use crate::{
    context::{Mode, TxContext},
    crypto::signature::{secp256k1, Eip712Verifier, Secp256k1Verifier, SignatureVerifier},
    module::Module as _,
    modules::{
        self,
        accounts::{Module as Accounts, API as _, ADDRESS_FEE_COLLECTOR},
        core::{GasMeter, Module as Core, API as _},
        evm::{Module as Evm, API as _},
        feemarket::{self, Module as FeeMarket},
    },
    types::{
        address::Address,
        transaction::{ensure_numeric_width, CosmosMsg, CosmosTx, ExtensionOption, Transaction},
    },
};

use super::{account_exists, malformed, set_gas_wanted, AnteChain, AnteDecorator, Error, Route};

/// Gas charged for verifying one secp256k1 signature.
pub const GAS_COST_SIG_VERIFY_SECP256K1: u64 = 1_000;

/// The decorator chain of native transactions on the given route.
pub fn chain(route: Route) -> AnteChain {
    AnteChain::new(
        route,
        vec![
            Box::new(SetUpContext),
            Box::new(RejectEthereumMessages),
            Box::new(ValidateBasic { route }),
            Box::new(MinGasPrice),
            Box::new(DeductFee { route }),
            Box::new(SigVerification { route }),
            Box::new(IncrementSequence),
        ],
    )
}

fn cosmos_tx(tx: &Transaction) -> Result<&CosmosTx, Error> {
    match tx {
        Transaction::Cosmos(tx) => Ok(tx),
        _ => Err(malformed("invalid transaction type")),
    }
}

/// Fields of the EIP-712 extension, if the transaction carries it first.
fn web3_extension(tx: &CosmosTx) -> Option<(u64, Option<Address>, &[u8])> {
    match tx.extension_options.first() {
        Some(ExtensionOption::Web3Tx {
            typed_data_chain_id,
            fee_payer,
            fee_payer_sig,
        }) => Some((*typed_data_chain_id, *fee_payer, fee_payer_sig)),
        _ => None,
    }
}

/// Priority tip cap of the dynamic fee extension, zero without one.
fn max_priority_price(tx: &CosmosTx) -> BigInt {
    match tx.extension_options.first() {
        Some(ExtensionOption::DynamicFeeTx { max_priority_price }) => max_priority_price.clone(),
        _ => BigInt::zero(),
    }
}

/// Account paying the fee.
fn fee_payer(tx: &CosmosTx) -> Option<Address> {
    web3_extension(tx)
        .and_then(|(_, fee_payer, _)| fee_payer)
        .or_else(|| tx.fee_payer())
}

/// Installs a gas meter limited by the declared gas.
pub struct SetUpContext;

impl AnteDecorator for SetUpContext {
    fn name(&self) -> &'static str {
        "SetUpContext"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error> {
        let tx = cosmos_tx(tx)?;
        let meter = if simulate {
            GasMeter::infinite()
        } else {
            GasMeter::new(tx.fee.gas_limit)
        };
        Core::set_gas_meter(ctx, meter);
        set_gas_wanted(ctx, tx.fee.gas_limit);
        Ok(())
    }
}

/// Ethereum messages are only accepted on the Ethereum route.
pub struct RejectEthereumMessages;

impl AnteDecorator for RejectEthereumMessages {
    fn name(&self) -> &'static str {
        "RejectEthereumMessages"
    }

    fn ante_handle(
        &self,
        _ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let tx = cosmos_tx(tx)?;
        if tx
            .messages
            .iter()
            .any(|msg| matches!(msg, CosmosMsg::Ethereum(_)))
        {
            return Err(malformed(
                "ethereum messages must be wrapped in a tx with the ethereum extension option",
            ));
        }
        Ok(())
    }
}

/// Stateless checks of the transaction shape.
pub struct ValidateBasic {
    pub route: Route,
}

impl AnteDecorator for ValidateBasic {
    fn name(&self) -> &'static str {
        "ValidateBasic"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        if ctx.is_recheck() {
            return Ok(());
        }
        let tx = cosmos_tx(tx)?;

        if tx.messages.is_empty() {
            return Err(malformed("must contain at least one message"));
        }
        if tx.signatures.is_empty() {
            return Err(malformed("no signatures supplied"));
        }
        let signers = tx.signers();
        if tx.signatures.len() != signers.len() || tx.signer_infos.len() != signers.len() {
            return Err(modules::core::Error::MalformedTransaction(anyhow!(
                "wrong number of signers; expected {}, got {}",
                signers.len(),
                tx.signatures.len()
            ))
            .into());
        }
        if tx.fee.gas_limit == 0 {
            return Err(malformed("gas limit must not be zero"));
        }

        match self.route {
            Route::LegacyEip712 => {
                let (typed_data_chain_id, payer, _) =
                    web3_extension(tx).ok_or_else(|| malformed("missing web3 extension option"))?;
                let signer = match signers.as_slice() {
                    [signer] => *signer,
                    _ => return Err(malformed("typed data transactions must have one signer")),
                };
                if let Some(payer) = payer {
                    if payer != signer {
                        return Err(modules::core::Error::SenderMismatch {
                            declared: payer,
                            recovered: signer,
                        }
                        .into());
                    }
                }
                let chain_id = Evm::params(ctx.runtime_state()).chain_id;
                if typed_data_chain_id != chain_id {
                    return Err(modules::core::Error::InvalidChainId {
                        expected: chain_id,
                        got: typed_data_chain_id,
                    }
                    .into());
                }
            }
            Route::DynamicFeeExtension => {
                let tip = max_priority_price(tx);
                ensure_numeric_width("max priority price", &tip);
                if tip.is_negative() {
                    return Err(modules::core::Error::InvalidFeeValue {
                        field: "max priority price",
                        value: tip,
                    }
                    .into());
                }
            }
            Route::PlainCosmos | Route::NativeEvm => {}
        }

        Ok(())
    }
}

/// Enforces the chain-wide minimum gas price against the declared fee.
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
        let tx = cosmos_tx(tx)?;
        feemarket::check_min_gas_price(
            &min_gas_price,
            &BigInt::from(tx.fee.amount),
            tx.fee.gas_limit,
        )?;
        Ok(())
    }
}

/// Prices the fee, moves it to the fee collector and sets the priority.
pub struct DeductFee {
    pub route: Route,
}

impl DeductFee {
    /// Fee to charge and the resulting priority.
    fn price(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &CosmosTx,
        simulate: bool,
    ) -> Result<(BigInt, i64), Error> {
        let amount = BigInt::from(tx.fee.amount);
        let gas = BigInt::from(tx.fee.gas_limit);
        if gas.is_zero() {
            return Ok((amount, 0));
        }

        let height = ctx.header().height;
        let base_fee = match Evm::base_fee(ctx.runtime_state(), height) {
            Some(base_fee) => base_fee,
            None => {
                if ctx.is_check_only() && !simulate {
                    let min_gas_prices = ctx.local_config().min_gas_prices.clone();
                    feemarket::check_min_gas_price(&min_gas_prices, &amount, tx.fee.gas_limit)?;
                }
                let priority = (&amount / &gas).to_i64().unwrap_or(i64::MAX);
                return Ok((amount, priority));
            }
        };

        let fee_cap = &amount / &gas;
        if fee_cap < base_fee {
            return Err(feemarket::Error::GasPriceTooLow {
                price: fee_cap,
                base_fee,
            }
            .into());
        }
        let tip = match self.route {
            Route::DynamicFeeExtension => max_priority_price(tx),
            _ => BigInt::zero(),
        };
        let price = feemarket::effective_price(&base_fee, &fee_cap, &tip);
        let priority = feemarket::priority_from_tip(&price - &base_fee);
        Ok((price * gas, priority))
    }
}

impl AnteDecorator for DeductFee {
    fn name(&self) -> &'static str {
        "DeductFee"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error> {
        let tx = cosmos_tx(tx)?;
        let payer = fee_payer(tx).ok_or_else(|| malformed("missing fee payer"))?;
        if ctx.mode() == Mode::ExecuteTx && !account_exists(ctx.runtime_state(), payer) {
            return Err(modules::core::Error::UnknownSender(payer).into());
        }

        let (fee, priority) = self.price(ctx, tx, simulate)?;
        let amount = fee.to_u128().ok_or_else(|| {
            modules::core::Error::InsufficientFunds(format!("fee {} exceeds any balance", fee))
        })?;
        let balance = Accounts::get_balance(ctx.runtime_state(), payer);
        if balance < amount {
            return Err(modules::core::Error::InsufficientFunds(format!(
                "insufficient funds to pay for fees; {} < {}",
                balance, amount
            ))
            .into());
        }
        Accounts::transfer(ctx.runtime_state(), payer, *ADDRESS_FEE_COLLECTOR, amount)?;

        Core::set_priority(ctx, priority);
        Ok(())
    }
}

/// Verifies the signature of every signer.
pub struct SigVerification {
    pub route: Route,
}

impl AnteDecorator for SigVerification {
    fn name(&self) -> &'static str {
        "SigVerification"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error> {
        if ctx.is_recheck() {
            return Ok(());
        }
        let tx = cosmos_tx(tx)?;
        let signers = tx.signers();

        for _ in &signers {
            Core::use_tx_gas(ctx, GAS_COST_SIG_VERIFY_SECP256K1)?;
        }
        // Simulated transactions are not signed yet.
        if simulate {
            return Ok(());
        }

        let web3 = web3_extension(tx);
        let (verifier, chain_id): (&dyn SignatureVerifier, u64) = match self.route {
            Route::LegacyEip712 => (&Eip712Verifier, Evm::params(ctx.runtime_state()).chain_id),
            _ => (&Secp256k1Verifier, ctx.header().chain_id),
        };

        for (i, signer) in signers.iter().enumerate() {
            let info = tx
                .signer_infos
                .get(i)
                .ok_or_else(|| malformed("missing signer info"))?;
            let nonce = Accounts::get_nonce(ctx.runtime_state(), *signer);
            if info.sequence != nonce {
                return Err(modules::core::Error::InvalidNonce {
                    expected: nonce,
                    got: info.sequence,
                }
                .into());
            }

            let pk = secp256k1::PublicKey::from_bytes(&info.public_key)
                .map_err(|err| modules::core::Error::InvalidSignature(err.into()))?;
            if pk.to_address() != *signer {
                return Err(modules::core::Error::SenderMismatch {
                    declared: *signer,
                    recovered: pk.to_address(),
                }
                .into());
            }

            let signature = match (self.route, web3) {
                (Route::LegacyEip712, Some((_, _, fee_payer_sig))) if !fee_payer_sig.is_empty() => {
                    fee_payer_sig
                }
                _ => tx
                    .signatures
                    .get(i)
                    .map(Vec::as_slice)
                    .ok_or_else(|| malformed("missing signature"))?,
            };
            let recovered = verifier
                .recover_signer(tx, chain_id, info.sequence, signature)
                .map_err(|err| modules::core::Error::InvalidSignature(err.into()))?;
            if recovered != *signer {
                return Err(modules::core::Error::InvalidSignature(anyhow!(
                    "signature does not match signer {}",
                    signer
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Bumps the sequence of every signer.
pub struct IncrementSequence;

impl AnteDecorator for IncrementSequence {
    fn name(&self) -> &'static str {
        "IncrementSequence"
    }

    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        _simulate: bool,
    ) -> Result<(), Error> {
        let tx = cosmos_tx(tx)?;
        for signer in tx.signers() {
            let state = ctx.runtime_state();
            let nonce = Accounts::get_nonce(&mut *state, signer);
            let next = nonce.checked_add(1).ok_or_else(|| {
                modules::core::Error::MalformedTransaction(anyhow!("nonce overflow"))
            })?;
            Accounts::set_nonce(state, signer, next);
        }
        Ok(())
    }
}
