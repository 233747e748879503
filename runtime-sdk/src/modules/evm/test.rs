//! Tests for the EVM module.
use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use num::BigInt;

use crate::{
    module::Module as _,
    modules::{
        accounts::{self, test::init_accounts, Module as Accounts, ADDRESS_FEE_COLLECTOR, API as _},
        core::{self, GasMeter, Module as Core, API as _},
        feemarket::{self, Module as FeeMarket},
    },
    storage::Store as _,
    testing::{keys, mock},
    types::{
        address::Address,
        transaction::{AccessTuple, EthereumTx, TxFees},
    },
};

use super::{
    contract_address, gas_to_refund, intrinsic_gas, refund_quotient, Error, Genesis,
    Module as Evm, Parameters, Spec, API as _, TX_GAS, TX_GAS_CONTRACT_CREATION,
};

fn call_tx(gas_limit: u64, gas_price: u128) -> EthereumTx {
    EthereumTx {
        from: keys::alice::address(),
        gas_limit,
        to: Some(keys::bob::address()),
        chain_id: Some(mock::CHAIN_ID),
        fees: TxFees::Legacy {
            gas_price: Some(BigInt::from(gas_price)),
        },
        ..Default::default()
    }
}

#[test]
fn test_intrinsic_gas() {
    assert_eq!(intrinsic_gas(&[], &[], false, Spec::London).unwrap(), TX_GAS);
    assert_eq!(
        intrinsic_gas(&[], &[], true, Spec::London).unwrap(),
        TX_GAS_CONTRACT_CREATION
    );
    assert_eq!(intrinsic_gas(&[], &[], true, Spec::Frontier).unwrap(), TX_GAS);

    let data = [0u8, 1, 0, 2];
    assert_eq!(
        intrinsic_gas(&data, &[], false, Spec::London).unwrap(),
        TX_GAS + 2 * 4 + 2 * 16
    );
    assert_eq!(
        intrinsic_gas(&data, &[], false, Spec::Homestead).unwrap(),
        TX_GAS + 2 * 4 + 2 * 68
    );

    let access_list = vec![
        AccessTuple {
            address: keys::bob::address(),
            storage_keys: vec![[1u8; 32], [2u8; 32]],
        },
        AccessTuple {
            address: keys::charlie::address(),
            storage_keys: vec![],
        },
    ];
    assert_eq!(
        intrinsic_gas(&[], &access_list, false, Spec::Berlin).unwrap(),
        TX_GAS + 2 * 2_400 + 2 * 1_900
    );

    // Init code words are only charged from Shanghai.
    let init_code = [1u8; 33];
    assert_eq!(
        intrinsic_gas(&init_code, &[], true, Spec::Shanghai).unwrap(),
        TX_GAS_CONTRACT_CREATION + 33 * 16 + 2 * 2
    );
    assert_eq!(
        intrinsic_gas(&init_code, &[], true, Spec::London).unwrap(),
        TX_GAS_CONTRACT_CREATION + 33 * 16
    );
}

#[test]
fn test_gas_to_refund() {
    assert_eq!(refund_quotient(Spec::Berlin), 2);
    assert_eq!(refund_quotient(Spec::London), 5);
    assert_eq!(refund_quotient(Spec::Shanghai), 5);

    // Refund counter below the ceiling.
    assert_eq!(gas_to_refund(1_000, 100_000, 5), 1_000);
    // Capped at a fifth of the used gas.
    assert_eq!(gas_to_refund(50_000, 100_000, 5), 20_000);
    assert_eq!(gas_to_refund(50_000, 100_000, 2), 50_000);
    assert_eq!(gas_to_refund(0, 100_000, 5), 0);

    for used in [0u64, 1, 7, 21_000, 1_000_003, u64::MAX] {
        for available in [0u64, 3, 10_000, u64::MAX] {
            for quotient in [1u64, 2, 5] {
                let refund = gas_to_refund(available, used, quotient);
                assert!(refund <= used / quotient);
                assert_eq!(refund, std::cmp::min(available, used / quotient));
            }
        }
    }
}

#[test]
#[should_panic(expected = "refund quotient cannot be zero")]
fn test_gas_to_refund_zero_quotient() {
    gas_to_refund(1_000, 100_000, 0);
}

#[test]
fn test_contract_address() {
    let sender = Address::from_hex("0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0").unwrap();
    assert_eq!(
        contract_address(sender, 0),
        Address::from_hex("0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d").unwrap()
    );
    assert_eq!(
        contract_address(sender, 1),
        Address::from_hex("0x343c43a37d37dff08ae8c4a11544c718abb4fcf8").unwrap()
    );
}

#[test]
fn test_base_fee_and_can_transfer() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    init_accounts(&mut ctx, &[(keys::alice::address(), 1_000)]);

    assert_eq!(
        Evm::base_fee(ctx.runtime_state(), 1),
        Some(BigInt::from(feemarket::DEFAULT_BASE_FEE))
    );
    Evm::init(
        ctx.runtime_state(),
        Genesis {
            parameters: Parameters {
                spec: Spec::Berlin,
                ..Default::default()
            },
        },
    );
    assert_eq!(Evm::base_fee(ctx.runtime_state(), 1), None);

    let alice = keys::alice::address();
    assert!(Evm::can_transfer(ctx.runtime_state(), alice, &BigInt::from(1_000)));
    assert!(!Evm::can_transfer(ctx.runtime_state(), alice, &BigInt::from(1_001)));
    assert!(Evm::can_transfer(ctx.runtime_state(), keys::bob::address(), &BigInt::from(0)));
}

#[test]
fn test_refund_gas() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    init_accounts(&mut ctx, &[(*ADDRESS_FEE_COLLECTOR, 1_000)]);

    ctx.with_tx(|mut tx_ctx| {
        let alice = keys::alice::address();
        Evm::refund_gas(&mut tx_ctx, alice, 30, &BigInt::from(10)).unwrap();
        assert_eq!(Accounts::get_balance(tx_ctx.runtime_state(), alice), 300);

        // Nothing to refund.
        Evm::refund_gas(&mut tx_ctx, alice, 0, &BigInt::from(10)).unwrap();

        assert!(matches!(
            Evm::refund_gas(&mut tx_ctx, alice, 1, &BigInt::from(-1)),
            Err(Error::InvalidRefund(_))
        ));

        // The fee collector only holds 700 now.
        let err = Evm::refund_gas(&mut tx_ctx, alice, 71, &BigInt::from(10))
            .expect_err("refund should fail");
        assert!(matches!(
            err,
            Error::RefundFailed(accounts::Error::InsufficientBalance)
        ));
        assert_eq!(
            err.to_string(),
            "fee collector account failed to refund fees: insufficient balance"
        );
    });
}

#[test]
fn test_reset_gas_meter() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();

    ctx.with_tx(|mut tx_ctx| {
        Core::set_gas_meter(&mut tx_ctx, GasMeter::new(100_000));
        Core::use_tx_gas(&mut tx_ctx, 90_000).unwrap();

        Evm::reset_gas_meter_and_consume_gas(&mut tx_ctx, 40_000);
        assert_eq!(Core::used_tx_gas(&mut tx_ctx), 40_000);
        assert_eq!(Core::remaining_tx_gas(&mut tx_ctx), 60_000);
    });
}

#[test]
#[should_panic(expected = "gas used 100001 greater than gas wanted 100000")]
fn test_reset_gas_meter_over_limit() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();

    ctx.with_tx(|mut tx_ctx| {
        Core::set_gas_meter(&mut tx_ctx, GasMeter::new(100_000));
        Evm::reset_gas_meter_and_consume_gas(&mut tx_ctx, 100_001);
    });
}

/// Drain keeping the level and message of every record.
struct Capture(Arc<Mutex<Vec<(slog::Level, String)>>>);

impl slog::Drain for Capture {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &slog::Record<'_>, _: &slog::OwnedKVList) -> Result<(), slog::Never> {
        self.0.lock().unwrap().push((record.level(), record.msg().to_string()));
        Ok(())
    }
}

#[test]
fn test_gas_overrun_logged() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let logger = slog::Logger::root(Capture(records.clone()), slog::o!());
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx().with_logger(logger);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        ctx.with_tx(|mut tx_ctx| {
            Core::set_gas_meter(&mut tx_ctx, GasMeter::new(100_000));
            Evm::reset_gas_meter_and_consume_gas(&mut tx_ctx, 100_001);
        })
    }));
    assert!(result.is_err(), "gas overrun should be fatal");

    let records = records.lock().unwrap();
    let logged = records.iter().any(|(level, msg)| {
        *level == slog::Level::Error && msg == "gas used greater than gas wanted"
    });
    assert!(logged, "gas overrun should be logged at error level");
}

/// Charge the full fee the way fee deduction does before execution.
fn charge_fee(tx_ctx: &mut crate::context::TxContext<'_, '_>, tx: &EthereumTx, price: u128) {
    Core::set_gas_meter(tx_ctx, GasMeter::new(tx.gas_limit));
    Accounts::transfer(
        tx_ctx.runtime_state(),
        tx.from,
        *ADDRESS_FEE_COLLECTOR,
        price * u128::from(tx.gas_limit),
    )
    .unwrap();
}

#[test]
fn test_apply_transaction() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    FeeMarket::set_params(
        ctx.runtime_state(),
        feemarket::Parameters {
            no_base_fee: true,
            ..Default::default()
        },
    );
    init_accounts(&mut ctx, &[(keys::alice::address(), 10_000_000)]);

    let executor = mock::MockExecutor {
        gas_used: 50_000,
        refund: 10_000,
        write: Some((b"slot".to_vec(), b"value".to_vec())),
        ..Default::default()
    };
    let mut tx = call_tx(100_000, 10);
    tx.value = Some(BigInt::from(5));

    ctx.with_tx(|mut tx_ctx| {
        charge_fee(&mut tx_ctx, &tx, 10);
        let result = Evm::apply_transaction(&mut tx_ctx, &executor, &tx).unwrap();

        // 21000 intrinsic + 50000 execution, 10000 refunded.
        assert_eq!(result.gas_used, 61_000);
        assert!(!result.reverted);
        assert!(!result.failed());
        assert_eq!(result.logs.len(), 1);
        assert_eq!(result.hash, tx.hash().to_vec());
        assert_eq!(Core::used_tx_gas(&mut tx_ctx), 61_000);

        let alice = keys::alice::address();
        let bob = keys::bob::address();
        assert_eq!(
            Accounts::get_balance(tx_ctx.runtime_state(), alice),
            10_000_000 - 10 * 61_000 - 5
        );
        assert_eq!(Accounts::get_balance(tx_ctx.runtime_state(), bob), 5);
        assert_eq!(
            Accounts::get_balance(tx_ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            10 * 61_000
        );
        assert_eq!(
            tx_ctx.runtime_state().get(b"slot"),
            Some(b"value".to_vec())
        );
    });
}

#[test]
fn test_apply_transaction_min_gas_floor() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    init_accounts(&mut ctx, &[(keys::alice::address(), 10_000_000_000_000_000)]);

    let executor = mock::MockExecutor::default();
    let tx = call_tx(100_000, feemarket::DEFAULT_BASE_FEE);

    ctx.with_tx(|mut tx_ctx| {
        charge_fee(&mut tx_ctx, &tx, feemarket::DEFAULT_BASE_FEE);
        let result = Evm::apply_transaction(&mut tx_ctx, &executor, &tx).unwrap();

        // Half of the gas limit is always charged.
        assert_eq!(result.gas_used, 50_000);
        assert_eq!(Core::used_tx_gas(&mut tx_ctx), 50_000);
        assert_eq!(
            Accounts::get_balance(tx_ctx.runtime_state(), *ADDRESS_FEE_COLLECTOR),
            feemarket::DEFAULT_BASE_FEE * 50_000
        );
    });
}

#[test]
fn test_apply_transaction_revert() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    FeeMarket::set_params(
        ctx.runtime_state(),
        feemarket::Parameters {
            no_base_fee: true,
            min_gas_multiplier: "0".parse().unwrap(),
            ..Default::default()
        },
    );
    init_accounts(&mut ctx, &[(keys::alice::address(), 10_000_000)]);

    let executor = mock::MockExecutor {
        gas_used: 30_000,
        refund: 100_000,
        revert: true,
        write: Some((b"slot".to_vec(), b"value".to_vec())),
        ..Default::default()
    };
    let mut tx = call_tx(100_000, 10);
    tx.value = Some(BigInt::from(5));

    ctx.with_tx(|mut tx_ctx| {
        charge_fee(&mut tx_ctx, &tx, 10);
        let result = Evm::apply_transaction(&mut tx_ctx, &executor, &tx).unwrap();

        // The refund counter still counts on revert, capped at a fifth.
        assert_eq!(result.gas_used, 51_000 - 51_000 / 5);
        assert!(result.reverted);
        assert_eq!(result.vm_error.as_deref(), Some("execution reverted"));
        assert!(result.logs.is_empty());

        // Neither the value transfer nor the storage write survive.
        assert_eq!(
            Accounts::get_balance(tx_ctx.runtime_state(), keys::bob::address()),
            0
        );
        assert_eq!(tx_ctx.runtime_state().get(b"slot"), None);
        assert_eq!(
            Accounts::get_balance(tx_ctx.runtime_state(), keys::alice::address()),
            10_000_000 - 10 * u128::from(result.gas_used)
        );
    });
}

#[test]
fn test_apply_transaction_out_of_gas() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    init_accounts(&mut ctx, &[(keys::alice::address(), 10_000_000_000_000_000)]);

    let executor = mock::MockExecutor {
        gas_used: 1_000_000,
        ..Default::default()
    };
    let tx = call_tx(100_000, feemarket::DEFAULT_BASE_FEE);

    ctx.with_tx(|mut tx_ctx| {
        charge_fee(&mut tx_ctx, &tx, feemarket::DEFAULT_BASE_FEE);
        let result = Evm::apply_transaction(&mut tx_ctx, &executor, &tx).unwrap();

        assert!(result.failed());
        assert!(!result.reverted);
        assert_eq!(result.vm_error.as_deref(), Some("out of gas"));
        assert_eq!(result.gas_used, 100_000);
    });
}

#[test]
fn test_apply_transaction_create() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    init_accounts(&mut ctx, &[(keys::alice::address(), 10_000_000_000_000_000)]);

    let executor = mock::MockExecutor {
        gas_used: 10_000,
        return_data: vec![0x60, 0x00],
        ..Default::default()
    };
    let mut tx = call_tx(200_000, feemarket::DEFAULT_BASE_FEE);
    tx.to = None;
    tx.nonce = 3;

    ctx.with_tx(|mut tx_ctx| {
        charge_fee(&mut tx_ctx, &tx, feemarket::DEFAULT_BASE_FEE);
        let result = Evm::apply_transaction(&mut tx_ctx, &executor, &tx).unwrap();

        let address = contract_address(keys::alice::address(), 3);
        assert_eq!(result.contract_address, Some(address));
        assert!(Accounts::has_code(tx_ctx.runtime_state(), address));
        assert_eq!(
            Accounts::get_code(tx_ctx.runtime_state(), address),
            Some(vec![0x60, 0x00])
        );
    });
}

#[test]
fn test_apply_transaction_disabled() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();
    Evm::init(
        ctx.runtime_state(),
        Genesis {
            parameters: Parameters {
                enable_create: false,
                ..Default::default()
            },
        },
    );

    let executor = mock::MockExecutor::default();
    let mut tx = call_tx(100_000, 0);
    tx.to = None;

    ctx.with_tx(|mut tx_ctx| {
        Core::set_gas_meter(&mut tx_ctx, GasMeter::new(tx.gas_limit));
        assert!(matches!(
            Evm::apply_transaction(&mut tx_ctx, &executor, &tx),
            Err(Error::CreateDisabled)
        ));
    });
}

#[test]
fn test_apply_message_intrinsic_after_withdrawal() {
    let mut mock = mock::Mock::default();
    let mut ctx = mock.create_ctx();

    let executor = mock::MockExecutor::default();
    let tx = call_tx(30_000, 0);

    ctx.with_tx(|mut tx_ctx| {
        Core::set_gas_meter(&mut tx_ctx, GasMeter::new(tx.gas_limit));
        Core::use_tx_gas(&mut tx_ctx, 10_000).unwrap();

        let err = Evm::apply_message(&mut tx_ctx, &executor, &tx, &BigInt::from(0))
            .expect_err("gas already spent should count");
        assert!(matches!(
            err,
            Error::Core(core::Error::GasLimitTooLow {
                limit: 30_000,
                intrinsic: 31_000
            })
        ));
    });
}

#[test]
fn test_parameters() {
    use crate::module::Parameters as _;

    Parameters::default().validate_basic().unwrap();
    assert!(Parameters {
        chain_id: 0,
        ..Default::default()
    }
    .validate_basic()
    .is_err());

    let params = Parameters {
        spec: Spec::Shanghai,
        ..Default::default()
    };
    let decoded: Parameters = cbor::from_slice(&cbor::to_vec(params)).unwrap();
    assert_eq!(decoded.spec, Spec::Shanghai);
}
