//! Ante handlers.
//!
//! Every transaction passes through exactly one chain of decorators before it is executed. The
//! chain is selected once by [`route`] from the shape of the transaction and its first
//! extension option. Decorators run in order and the first failure aborts the chain. All state
//! changes are made on the transaction's branch of the runtime state so the caller decides
//! whether they persist.
use anyhow::anyhow;
use thiserror::Error;

use crate::{
    context::TxContext,
    modules::{
        self,
        accounts::{Module as Accounts, API as _},
        core::{Module as Core, API as _},
    },
    storage::Store,
    types::{
        address::Address,
        transaction::{CosmosMsg, EthereumTx, ExtensionOption, Transaction},
    },
};

pub mod cosmos;
pub mod evm;

/// Unique module name.
const MODULE_NAME: &str = "ante";

const CONTEXT_KEY_GAS_WANTED: &str = "ante.GasWanted";

/// Errors emitted by ante handlers.
///
/// Every variant forwards the module and code of the underlying failure.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),

    #[error("accounts: {0}")]
    #[sdk_error(transparent)]
    Accounts(#[from] modules::accounts::Error),

    #[error("rewards: {0}")]
    #[sdk_error(transparent)]
    Rewards(#[from] modules::rewards::Error),

    #[error("feemarket: {0}")]
    #[sdk_error(transparent)]
    FeeMarket(#[from] modules::feemarket::Error),

    #[error("evm: {0}")]
    #[sdk_error(transparent)]
    Evm(#[from] modules::evm::Error),
}

/// Decorator chain a transaction is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Native Ethereum transaction.
    NativeEvm,
    /// Native transaction signed as EIP-712 typed data.
    LegacyEip712,
    /// Native transaction with the dynamic fee extension.
    DynamicFeeExtension,
    /// Native transaction without extensions.
    PlainCosmos,
}

/// Select the decorator chain for a transaction.
///
/// Only the first extension option of a native transaction is consulted.
pub fn route(tx: &Transaction) -> Result<Route, Error> {
    match tx {
        Transaction::Ethereum(_) => Ok(Route::NativeEvm),
        Transaction::Cosmos(tx) => match tx.extension_options.first() {
            Some(ExtensionOption::EthereumTx) => Ok(Route::NativeEvm),
            Some(ExtensionOption::Web3Tx { .. }) => Ok(Route::LegacyEip712),
            Some(ExtensionOption::DynamicFeeTx { .. }) => Ok(Route::DynamicFeeExtension),
            Some(ExtensionOption::Unknown(type_url)) => {
                Err(modules::core::Error::UnsupportedExtension(type_url.clone()).into())
            }
            None => Ok(Route::PlainCosmos),
        },
        Transaction::Unknown => Err(modules::core::Error::UnknownTransactionType.into()),
    }
}

/// A single validation step.
pub trait AnteDecorator {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Validate the transaction, possibly mutating the transaction's branch of the state.
    fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error>;
}

/// An ordered list of decorators.
pub struct AnteChain {
    route: Route,
    decorators: Vec<Box<dyn AnteDecorator>>,
}

impl AnteChain {
    /// Create a chain from decorators in the order they should run.
    pub fn new(route: Route, decorators: Vec<Box<dyn AnteDecorator>>) -> Self {
        Self { route, decorators }
    }

    /// The chain handling the given route.
    pub fn for_route(route: Route) -> Self {
        match route {
            Route::NativeEvm => evm::chain(),
            route => cosmos::chain(route),
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Names of the decorators in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }

    /// Run every decorator, stopping at the first failure.
    pub fn run(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(), Error> {
        for decorator in &self.decorators {
            if let Err(err) = decorator.ante_handle(ctx, tx, simulate) {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::debug!(logger, "transaction rejected";
                    "route" => ?self.route,
                    "decorator" => decorator.name(),
                    "err" => ?err,
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Outcome of a successful ante chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnteOutcome {
    pub route: Route,
    /// Mempool priority.
    pub priority: i64,
    /// Gas the transaction reserves in the block.
    pub gas_wanted: u64,
}

/// Route the transaction and run the selected chain.
pub fn ante_handle(
    ctx: &mut TxContext<'_, '_>,
    tx: &Transaction,
    simulate: bool,
) -> Result<AnteOutcome, Error> {
    let route = route(tx)?;
    AnteChain::for_route(route).run(ctx, tx, simulate)?;

    Ok(AnteOutcome {
        route,
        priority: Core::take_priority(ctx),
        gas_wanted: gas_wanted(ctx, tx),
    })
}

/// Record the gas the transaction reserves in the block.
pub fn set_gas_wanted(ctx: &mut TxContext<'_, '_>, gas: u64) {
    *ctx.tx_value::<Option<u64>>(CONTEXT_KEY_GAS_WANTED) = Some(gas);
}

/// Gas the transaction reserves in the block, its gas limit unless recorded otherwise.
pub fn gas_wanted(ctx: &mut TxContext<'_, '_>, tx: &Transaction) -> u64 {
    let recorded = *ctx.tx_value::<Option<u64>>(CONTEXT_KEY_GAS_WANTED);
    recorded.unwrap_or_else(|| tx.gas_limit())
}

fn malformed(msg: &'static str) -> Error {
    modules::core::Error::MalformedTransaction(anyhow!(msg)).into()
}

/// The Ethereum transaction carried by `tx`.
///
/// A native wrapper must carry exactly one Ethereum message.
pub(crate) fn ethereum_tx(tx: &Transaction) -> Result<&EthereumTx, Error> {
    match tx {
        Transaction::Ethereum(tx) => Ok(tx),
        Transaction::Cosmos(tx) => match tx.messages.as_slice() {
            [CosmosMsg::Ethereum(msg)] => Ok(msg),
            _ => Err(malformed("invalid message type")),
        },
        Transaction::Unknown => Err(modules::core::Error::UnknownTransactionType.into()),
    }
}

/// Whether the ledger knows the address.
pub(crate) fn account_exists<S: Store>(mut state: S, address: Address) -> bool {
    Accounts::get_account(&mut state, address).is_some()
        || Accounts::get_balance(state, address) > 0
}
