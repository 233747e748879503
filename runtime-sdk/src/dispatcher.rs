//! Transaction dispatcher.
use thiserror::Error;

use crate::{
    ante::{self, AnteOutcome, Route},
    context::{DispatchContext, Mode, TxContext},
    error::Error as _,
    event::EventTag,
    module::{BlockHandler, InvariantHandler},
    modules::{
        self,
        accounts::{Module as Accounts, API as _},
        core::{Event as CoreEvent, Module as Core, API as _},
        evm::{ExecutionResult, Executor, Module as Evm, API as _},
        feemarket::Module as FeeMarket,
        rewards::Module as Rewards,
    },
    types::transaction::{CallResult, CosmosMsg, CosmosTx, Transaction},
};

/// Unique module name.
const MODULE_NAME: &str = "dispatcher";

/// Error emitted while dispatching a transaction.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("unsupported message: {0}")]
    #[sdk_error(code = 1)]
    UnsupportedMessage(String),

    #[error("ante: {0}")]
    #[sdk_error(transparent)]
    Ante(#[from] ante::Error),

    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),

    #[error("accounts: {0}")]
    #[sdk_error(transparent)]
    Accounts(#[from] modules::accounts::Error),

    #[error("evm: {0}")]
    #[sdk_error(transparent)]
    Evm(#[from] modules::evm::Error),
}

/// Modules with block hooks, in the order the hooks run.
type Modules = (Accounts, Rewards, FeeMarket, Evm);

/// Result of checking a transaction for mempool admission.
#[derive(Debug)]
pub struct CheckTxResult {
    /// `CallResult::Ok` if the transaction is admitted.
    pub error: CallResult,
    /// Mempool priority.
    pub priority: i64,
    pub gas_wanted: u64,
}

/// Result of executing a transaction in a block.
#[derive(Debug)]
pub struct DeliverTxResult {
    /// Transaction call result. Reverted executions are failures that still pay for gas.
    pub result: CallResult,
    /// Gas charged to the transaction.
    pub gas_used: u64,
    pub events: Vec<EventTag>,
    /// Execution details, unless the transaction was rejected.
    pub execution: Option<ExecutionResult>,
}

/// The transaction dispatcher.
pub struct Dispatcher<E: Executor> {
    executor: E,
}

impl<E: Executor> Dispatcher<E> {
    /// Create a dispatcher running EVM messages on the given executor.
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// Route the transaction and run its ante chain.
    pub fn ante_handle(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<AnteOutcome, Error> {
        Ok(ante::ante_handle(ctx, tx, simulate)?)
    }

    /// Run the ante chain and the state transition of `tx` in a single branch.
    ///
    /// The branch is committed only in `Mode::ExecuteTx` and only when both stages succeed. A
    /// reverted execution still succeeds. Successful executions emit the gas used.
    pub fn apply_transaction(
        &self,
        ctx: &mut DispatchContext<'_>,
        tx: &Transaction,
    ) -> Result<ExecutionResult, Error> {
        let (_, result, _) = self.dispatch(ctx, tx, false)?;
        Ok(result)
    }

    /// Dry-run the transaction, never persisting any change.
    pub fn simulate(
        &self,
        ctx: &mut DispatchContext<'_>,
        tx: &Transaction,
    ) -> Result<ExecutionResult, Error> {
        let (_, result, _) = self.dispatch(ctx, tx, true)?;
        Ok(result)
    }

    /// Check whether the transaction can be admitted to the mempool.
    ///
    /// Only the ante chain runs and its changes are always discarded.
    pub fn check_tx(&self, ctx: &mut DispatchContext<'_>, tx: &Transaction) -> CheckTxResult {
        match ctx.with_tx(|mut tx_ctx| self.ante_handle(&mut tx_ctx, tx, false)) {
            Ok(outcome) => CheckTxResult {
                error: CallResult::Ok,
                priority: outcome.priority,
                gas_wanted: outcome.gas_wanted,
            },
            Err(err) => {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::debug!(logger, "check tx failed"; "err" => ?err);

                CheckTxResult {
                    error: err.to_call_result(),
                    priority: 0,
                    gas_wanted: 0,
                }
            }
        }
    }

    /// Execute the transaction as part of a block.
    pub fn execute_tx(&self, ctx: &mut DispatchContext<'_>, tx: &Transaction) -> DeliverTxResult {
        match self.dispatch(ctx, tx, false) {
            Ok((_, execution, events)) => {
                let result = match &execution.vm_error {
                    Some(vm_error) => {
                        modules::evm::Error::ExecutionFailed(vm_error.clone()).to_call_result()
                    }
                    None => CallResult::Ok,
                };
                DeliverTxResult {
                    result,
                    gas_used: execution.gas_used,
                    events,
                    execution: Some(execution),
                }
            }
            Err(err) => {
                let logger = ctx.get_logger(MODULE_NAME);
                slog::debug!(logger, "transaction rejected"; "err" => ?err);

                DeliverTxResult {
                    result: err.to_call_result(),
                    gas_used: 0,
                    events: Vec::new(),
                    execution: None,
                }
            }
        }
    }

    /// Run the begin block hooks of all modules.
    pub fn begin_block(&self, ctx: &mut DispatchContext<'_>) {
        <Modules as BlockHandler>::begin_block(ctx);
    }

    /// Run the end block hooks of all modules.
    pub fn end_block(&self, ctx: &mut DispatchContext<'_>) {
        <Modules as BlockHandler>::end_block(ctx);
    }

    /// Check ledger invariants.
    pub fn check_invariants(&self, ctx: &mut DispatchContext<'_>) -> Result<(), Error> {
        Ok(Accounts::check_invariants(ctx)?)
    }

    fn dispatch(
        &self,
        ctx: &mut DispatchContext<'_>,
        tx: &Transaction,
        simulate: bool,
    ) -> Result<(AnteOutcome, ExecutionResult, Vec<EventTag>), Error> {
        let persist = ctx.mode() == Mode::ExecuteTx && !simulate;

        let (outcome, result, events) = ctx.with_tx(|mut tx_ctx| {
            let outcome = self.ante_handle(&mut tx_ctx, tx, simulate)?;
            let result = self.execute(&mut tx_ctx, tx, outcome.route)?;
            tx_ctx.emit_event(CoreEvent::GasUsed {
                amount: result.gas_used,
            });
            let events = if persist {
                tx_ctx.commit()
            } else {
                tx_ctx.events().to_vec()
            };
            Ok::<_, Error>((outcome, result, events))
        })?;

        if persist {
            ctx.consume_block_gas(result.gas_used);
        }
        Ok((outcome, result, events))
    }

    fn execute(
        &self,
        ctx: &mut TxContext<'_, '_>,
        tx: &Transaction,
        route: Route,
    ) -> Result<ExecutionResult, Error> {
        match (route, tx) {
            (Route::NativeEvm, tx) => {
                let tx = ante::ethereum_tx(tx)?;
                Ok(Evm::apply_transaction(ctx, &self.executor, tx)?)
            }
            (_, Transaction::Cosmos(tx)) => Self::execute_messages(ctx, tx),
            _ => Err(modules::core::Error::UnknownTransactionType.into()),
        }
    }

    fn execute_messages(
        ctx: &mut TxContext<'_, '_>,
        tx: &CosmosTx,
    ) -> Result<ExecutionResult, Error> {
        for msg in &tx.messages {
            match msg {
                CosmosMsg::Send { from, to, amount } => {
                    Accounts::tx_transfer(ctx, *from, *to, *amount)?
                }
                CosmosMsg::Ethereum(_) => {
                    return Err(Error::UnsupportedMessage("ethereum".to_owned()))
                }
                CosmosMsg::Other { type_url, .. } => {
                    return Err(Error::UnsupportedMessage(type_url.clone()))
                }
            }
        }

        Ok(ExecutionResult {
            gas_used: Core::used_tx_gas(ctx),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod test {
    use num::BigInt;

    use super::*;
    use crate::{
        modules::{
            accounts::{test::init_accounts, ADDRESS_FEE_COLLECTOR},
            feemarket::{self, API as _},
        },
        storage::Store,
        testing::{keys, mock},
        types::transaction::{EthereumTx, Fee, SignerInfo, TxFees},
    };

    const BASE_FEE: u128 = feemarket::DEFAULT_BASE_FEE;
    const FUNDS: u128 = 10_000_000_000_000_000;

    fn call_tx(nonce: u64, fees: TxFees) -> Transaction {
        let mut tx = EthereumTx {
            nonce,
            gas_limit: 100_000,
            to: Some(keys::bob::address()),
            chain_id: Some(mock::CHAIN_ID),
            fees,
            ..Default::default()
        };
        keys::alice::sign_ethereum(&mut tx);
        Transaction::Ethereum(tx)
    }

    fn legacy(gas_price: u128) -> TxFees {
        TxFees::Legacy {
            gas_price: Some(BigInt::from(gas_price)),
        }
    }

    fn send_tx(msg: CosmosMsg, sequence: u64) -> Transaction {
        let mut tx = CosmosTx {
            messages: vec![msg],
            signer_infos: vec![SignerInfo {
                public_key: keys::alice::pk().to_bytes(),
                sequence,
            }],
            fee: Fee {
                amount: BASE_FEE * 100_000,
                gas_limit: 100_000,
                payer: None,
            },
            ..Default::default()
        };
        tx.signatures = vec![keys::alice::sign_cosmos(&tx, mock::CHAIN_ID, sequence)];
        Transaction::Cosmos(tx)
    }

    #[test]
    fn test_execute_tx() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 30_000,
            ..Default::default()
        });
        let gas_price = BASE_FEE + 1_000_000;
        let result = dispatcher.execute_tx(&mut ctx, &call_tx(0, legacy(gas_price)));
        assert!(result.result.is_success(), "{:?}", result.result);

        // Intrinsic gas plus execution, above the min gas multiplier floor.
        assert_eq!(result.gas_used, 51_000);
        assert!(!result.events.is_empty());
        assert_eq!(ctx.block_gas_used(), 51_000);

        let fee = gas_price * 51_000;
        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS - fee);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            fee
        );
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 1);
        dispatcher
            .check_invariants(&mut ctx)
            .expect("invariants should hold");
    }

    #[test]
    fn test_fee_matches_gas_used() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 60_000,
            refund: 10_000,
            ..Default::default()
        });
        let fees = TxFees::DynamicFee {
            gas_fee_cap: Some(BigInt::from(2 * BASE_FEE)),
            gas_tip_cap: Some(BigInt::from(500_000_000u64)),
        };
        let result = dispatcher
            .apply_transaction(&mut ctx, &call_tx(0, fees))
            .expect("transaction should apply");

        // 81_000 consumed, 10_000 refunded.
        assert_eq!(result.gas_used, 71_000);
        let gas_price = BASE_FEE + 500_000_000;
        let fee = gas_price * 71_000;
        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS - fee);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            fee
        );
    }

    #[test]
    fn test_reverted_execution() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 30_000,
            revert: true,
            write: Some((b"contract-slot".to_vec(), b"value".to_vec())),
            ..Default::default()
        });
        let result = dispatcher.execute_tx(&mut ctx, &call_tx(0, legacy(BASE_FEE)));
        assert!(matches!(
            &result.result,
            CallResult::Failed { module, code: 7, .. } if module == "evm"
        ));
        assert!(result.execution.as_ref().map_or(false, |e| e.reverted));

        // Gas is still paid and the nonce still moves.
        assert_eq!(result.gas_used, 51_000);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), alice),
            FUNDS - BASE_FEE * 51_000
        );
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 1);
        assert!(ctx.runtime_state().get(b"contract-slot").is_none());
    }

    #[test]
    fn test_rejected_tx() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor::default());
        let result = dispatcher.execute_tx(&mut ctx, &call_tx(3, legacy(BASE_FEE)));
        assert!(matches!(
            &result.result,
            CallResult::Failed { module, code: 5, .. } if module == "core"
        ));
        assert_eq!(result.gas_used, 0);
        assert!(result.events.is_empty());
        assert_eq!(ctx.block_gas_used(), 0);
        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            0
        );
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 0);
    }

    #[test]
    fn test_check_tx() {
        let mut mock = mock::Mock::default();
        mock.mode = Mode::CheckTx;
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor::default());
        let result = dispatcher.check_tx(&mut ctx, &call_tx(0, legacy(BASE_FEE + 3_000_000)));
        assert!(result.error.is_success(), "{:?}", result.error);
        assert_eq!(result.priority, 3);
        assert_eq!(result.gas_wanted, 100_000);

        // Checks never persist.
        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS);
        assert_eq!(
            FeeMarket::get_transient_gas_wanted(ctx.runtime_state()),
            0
        );

        let result = dispatcher.check_tx(&mut ctx, &Transaction::Unknown);
        assert!(matches!(
            &result.error,
            CallResult::Failed { module, code: 3, .. } if module == "core"
        ));
        assert_eq!(result.priority, 0);
    }

    #[test]
    fn test_simulate() {
        let mut mock = mock::Mock::default();
        mock.mode = Mode::SimulateTx;
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 1_000,
            ..Default::default()
        });
        let result = dispatcher
            .simulate(&mut ctx, &call_tx(0, legacy(BASE_FEE)))
            .expect("simulation should succeed");
        // The min gas multiplier sets the floor.
        assert_eq!(result.gas_used, 50_000);

        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS);
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 0);
        assert_eq!(ctx.block_gas_used(), 0);
    }

    #[test]
    fn test_simulate_in_execute_mode() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 30_000,
            write: Some((b"key".to_vec(), b"value".to_vec())),
            ..Default::default()
        });
        let result = dispatcher
            .simulate(&mut ctx, &call_tx(0, legacy(BASE_FEE)))
            .expect("simulation should succeed");
        assert_eq!(result.gas_used, 51_000);

        assert_eq!(Accounts::get_balance(ctx.runtime_state(), alice), FUNDS);
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 0);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            0
        );
        assert_eq!(ctx.block_gas_used(), 0);
        assert_eq!(ctx.runtime_state().get(b"key"), None);
    }

    #[test]
    fn test_contract_creation() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 10_000,
            return_data: vec![0x60, 0x00],
            ..Default::default()
        });
        let mut tx = EthereumTx {
            gas_limit: 100_000,
            chain_id: Some(mock::CHAIN_ID),
            fees: legacy(BASE_FEE),
            data: vec![0x60, 0x00, 0x60, 0x00],
            ..Default::default()
        };
        keys::alice::sign_ethereum(&mut tx);

        let result = dispatcher.execute_tx(&mut ctx, &Transaction::Ethereum(tx));
        assert!(result.result.is_success(), "{:?}", result.result);
        let created = result
            .execution
            .and_then(|e| e.contract_address)
            .expect("contract should be created");
        assert_eq!(created, modules::evm::contract_address(alice, 0));
        assert_eq!(
            Accounts::get_code(ctx.runtime_state(), created),
            Some(vec![0x60, 0x00])
        );
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 1);
    }

    #[test]
    fn test_cosmos_send() {
        let mut mock = mock::Mock::default();
        let mut ctx = mock.create_ctx();
        let alice = keys::alice::address();
        let bob = keys::bob::address();
        init_accounts(&mut ctx, &[(alice, FUNDS)]);

        let dispatcher = Dispatcher::new(mock::MockExecutor::default());
        let result = dispatcher.execute_tx(
            &mut ctx,
            &send_tx(
                CosmosMsg::Send {
                    from: alice,
                    to: bob,
                    amount: 1_000,
                },
                0,
            ),
        );
        assert!(result.result.is_success(), "{:?}", result.result);
        assert_eq!(result.gas_used, ante::cosmos::GAS_COST_SIG_VERIFY_SECP256K1);
        // Transfer, then gas used.
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[1].key, b"core\x00\x00\x00\x01");
        assert_eq!(Accounts::get_balance(ctx.runtime_state(), bob), 1_000);
        assert_eq!(
            Accounts::get_balance(ctx.runtime_state(), alice),
            FUNDS - 1_000 - BASE_FEE * 100_000
        );
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 1);

        // Unknown messages are rejected as a whole.
        let result = dispatcher.execute_tx(
            &mut ctx,
            &send_tx(
                CosmosMsg::Other {
                    type_url: "/cosmos.gov.v1.MsgVote".to_owned(),
                    signer: alice,
                },
                1,
            ),
        );
        assert!(matches!(
            &result.result,
            CallResult::Failed { module, code: 1, .. } if module == MODULE_NAME
        ));
        assert_eq!(Accounts::get_nonce(ctx.runtime_state(), alice), 1);
    }

    #[test]
    fn test_block_hooks() {
        let mut mock = mock::Mock::default();
        let dispatcher = Dispatcher::new(mock::MockExecutor {
            gas_used: 30_000,
            ..Default::default()
        });

        {
            let mut ctx = mock.create_ctx();
            init_accounts(&mut ctx, &[(keys::alice::address(), FUNDS)]);
            let result = dispatcher.execute_tx(&mut ctx, &call_tx(0, legacy(BASE_FEE)));
            assert!(result.result.is_success(), "{:?}", result.result);
            assert_eq!(
                FeeMarket::get_transient_gas_wanted(ctx.runtime_state()),
                100_000
            );
            dispatcher.end_block(&mut ctx);

            // Half of the gas wanted is below the gas used.
            assert_eq!(FeeMarket::get_block_gas_wanted(ctx.runtime_state()), 51_000);
            assert_eq!(
                FeeMarket::get_transient_gas_wanted(ctx.runtime_state()),
                0
            );
        }

        mock.header.height = 2;
        let mut ctx = mock.create_ctx();
        dispatcher.begin_block(&mut ctx);
        let height = ctx.header().height;
        // The block used far less than its target so the base fee drops by almost 1/8.
        assert_eq!(
            FeeMarket::get_base_fee(ctx.runtime_state(), height),
            Some(BigInt::from(876_275_000u64))
        );
    }
}
