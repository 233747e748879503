//! Accounts module.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::{
    context::{DispatchContext, TxContext},
    module::{self, Module as _, Parameters as _},
    modules,
    modules::core::Error as CoreError,
    storage::{self, Store},
    types::address::Address,
};

pub mod types;

pub use types::Account;

/// Unique module name.
const MODULE_NAME: &str = "accounts";

/// Errors emitted by the accounts module.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("invalid argument")]
    #[sdk_error(code = 1)]
    InvalidArgument,

    #[error("insufficient balance")]
    #[sdk_error(code = 2)]
    InsufficientBalance,

    #[error("forbidden by policy")]
    #[sdk_error(code = 3)]
    Forbidden,

    #[error("not found")]
    #[sdk_error(code = 4)]
    NotFound,

    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),
}

/// Events emitted by the accounts module.
#[derive(Debug, cbor::Encode, crate::Event)]
#[cbor(untagged)]
pub enum Event {
    #[sdk_event(code = 1)]
    Transfer {
        from: Address,
        to: Address,
        amount: u128,
    },
}

/// Parameters for the accounts module.
#[derive(Clone, Default, Debug, cbor::Encode, cbor::Decode)]
pub struct Parameters {
    /// Disables user-initiated transfers. Module transfers (fees, rewards) are unaffected.
    #[cbor(optional)]
    pub transfers_disabled: bool,
}

impl module::Parameters for Parameters {
    type Error = std::convert::Infallible;
}

/// Genesis state for the accounts module.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct Genesis {
    pub parameters: Parameters,
    pub accounts: BTreeMap<Address, Account>,
    pub balances: BTreeMap<Address, u128>,
}

/// Interface that can be called from other modules.
pub trait API {
    /// Fetch an account, `None` if it has never been created.
    fn get_account<S: Store>(state: S, address: Address) -> Option<Account>;

    /// Store an account.
    fn set_account<S: Store>(state: S, address: Address, account: Account);

    /// Fetch an account's nonce.
    fn get_nonce<S: Store>(state: S, address: Address) -> u64;

    /// Set an account's nonce, creating the account if needed.
    fn set_nonce<S: Store>(state: S, address: Address, nonce: u64);

    /// Whether the account holds contract code.
    fn has_code<S: Store>(state: S, address: Address) -> bool;

    /// Attach contract code to an account.
    fn set_code<S: Store>(state: S, address: Address, code: Vec<u8>);

    /// Fetch an account's contract code.
    fn get_code<S: Store>(state: S, address: Address) -> Option<Vec<u8>>;

    /// Fetch an account's balance.
    fn get_balance<S: Store>(state: S, address: Address) -> u128;

    /// Add given amount of tokens to the specified account's balance.
    fn add_amount<S: Store>(state: S, address: Address, amount: u128) -> Result<(), Error>;

    /// Subtract given amount of tokens from the specified account's balance.
    fn sub_amount<S: Store>(state: S, address: Address, amount: u128) -> Result<(), Error>;

    /// Move amount from one account to another. Neither balance changes on failure.
    fn transfer<S: Store>(state: S, from: Address, to: Address, amount: u128)
        -> Result<(), Error>;

    /// Create new tokens in the given account, increasing the total supply.
    fn mint<S: Store>(state: S, to: Address, amount: u128) -> Result<(), Error>;

    /// Total supply of tokens.
    fn get_total_supply<S: Store>(state: S) -> u128;

    /// Perform a user-initiated transfer, subject to policy, and emit an event.
    fn tx_transfer(
        ctx: &mut TxContext<'_, '_>,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), Error>;
}

/// State schema constants.
pub mod state {
    /// Map of account addresses to account metadata.
    pub const ACCOUNTS: &[u8] = &[0x01];
    /// Map of account addresses to balances.
    pub const BALANCES: &[u8] = &[0x02];
    /// Total supply.
    pub const TOTAL_SUPPLY: &[u8] = &[0x03];
    /// Map of code hashes to contract code.
    pub const CODES: &[u8] = &[0x04];
}

pub struct Module;

/// Module's address that collects transaction fees.
pub static ADDRESS_FEE_COLLECTOR: Lazy<Address> =
    Lazy::new(|| Address::from_module(MODULE_NAME, "fee-collector"));

impl Module {
    fn set_balance<S: Store>(state: S, address: Address, amount: u128) {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let mut balances =
            storage::TypedStore::new(storage::PrefixStore::new(store, &state::BALANCES));
        balances.insert(address, amount);
    }

    fn set_total_supply<S: Store>(state: S, amount: u128) {
        let mut store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.insert(state::TOTAL_SUPPLY, amount);
    }

    /// Get all balances.
    fn get_all_balances<S: Store>(state: S) -> BTreeMap<Address, u128> {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let balances = storage::TypedStore::new(storage::PrefixStore::new(store, &state::BALANCES));
        balances.iter().collect()
    }
}

impl API for Module {
    fn get_account<S: Store>(state: S, address: Address) -> Option<Account> {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let accounts = storage::TypedStore::new(storage::PrefixStore::new(store, &state::ACCOUNTS));
        accounts.get(address)
    }

    fn set_account<S: Store>(state: S, address: Address, account: Account) {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let mut accounts =
            storage::TypedStore::new(storage::PrefixStore::new(store, &state::ACCOUNTS));
        accounts.insert(address, account);
    }

    fn get_nonce<S: Store>(state: S, address: Address) -> u64 {
        Self::get_account(state, address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    fn set_nonce<S: Store>(mut state: S, address: Address, nonce: u64) {
        let mut account = Self::get_account(&mut state, address).unwrap_or_default();
        account.nonce = nonce;
        Self::set_account(state, address, account);
    }

    fn has_code<S: Store>(state: S, address: Address) -> bool {
        Self::get_account(state, address)
            .map(|a| a.is_contract())
            .unwrap_or(false)
    }

    fn set_code<S: Store>(mut state: S, address: Address, code: Vec<u8>) {
        let code_hash = Keccak256::digest(&code).to_vec();

        let mut account = Self::get_account(&mut state, address).unwrap_or_default();
        account.code_hash = code_hash.clone();
        Self::set_account(&mut state, address, account);

        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let mut codes = storage::TypedStore::new(storage::PrefixStore::new(store, &state::CODES));
        codes.insert(code_hash, code);
    }

    fn get_code<S: Store>(mut state: S, address: Address) -> Option<Vec<u8>> {
        let account = Self::get_account(&mut state, address)?;
        if !account.is_contract() {
            return None;
        }
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let codes = storage::TypedStore::new(storage::PrefixStore::new(store, &state::CODES));
        codes.get(account.code_hash)
    }

    fn get_balance<S: Store>(state: S, address: Address) -> u128 {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let balances = storage::TypedStore::new(storage::PrefixStore::new(store, &state::BALANCES));
        balances.get(address).unwrap_or_default()
    }

    fn add_amount<S: Store>(mut state: S, address: Address, amount: u128) -> Result<(), Error> {
        let value = Self::get_balance(&mut state, address)
            .checked_add(amount)
            .ok_or(Error::InvalidArgument)?;
        Self::set_balance(state, address, value);
        Ok(())
    }

    fn sub_amount<S: Store>(mut state: S, address: Address, amount: u128) -> Result<(), Error> {
        let value = Self::get_balance(&mut state, address)
            .checked_sub(amount)
            .ok_or(Error::InsufficientBalance)?;
        Self::set_balance(state, address, value);
        Ok(())
    }

    fn transfer<S: Store>(
        mut state: S,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), Error> {
        if from == to || amount == 0 {
            return Ok(());
        }
        // Check the recipient first so a failure leaves both balances untouched.
        Self::get_balance(&mut state, to)
            .checked_add(amount)
            .ok_or(Error::InvalidArgument)?;

        Self::sub_amount(&mut state, from, amount)?;
        Self::add_amount(&mut state, to, amount)?;
        Ok(())
    }

    fn mint<S: Store>(mut state: S, to: Address, amount: u128) -> Result<(), Error> {
        let total_supply = Self::get_total_supply(&mut state)
            .checked_add(amount)
            .ok_or(Error::InvalidArgument)?;
        Self::add_amount(&mut state, to, amount)?;
        Self::set_total_supply(state, total_supply);
        Ok(())
    }

    fn get_total_supply<S: Store>(state: S) -> u128 {
        let store = storage::TypedStore::new(storage::PrefixStore::new(state, &MODULE_NAME));
        store.get(state::TOTAL_SUPPLY).unwrap_or_default()
    }

    fn tx_transfer(
        ctx: &mut TxContext<'_, '_>,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<(), Error> {
        if Self::params(ctx.runtime_state()).transfers_disabled {
            return Err(Error::Forbidden);
        }
        Self::transfer(ctx.runtime_state(), from, to, amount)?;
        ctx.emit_event(Event::Transfer { from, to, amount });
        Ok(())
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
    pub fn init<S: Store>(mut state: S, genesis: Genesis) {
        for (address, account) in genesis.accounts {
            Self::set_account(&mut state, address, account);
        }

        let mut total_supply: u128 = 0;
        for (address, amount) in genesis.balances {
            Self::set_balance(&mut state, address, amount);
            total_supply = total_supply
                .checked_add(amount)
                .expect("genesis total supply overflow");
        }
        Self::set_total_supply(&mut state, total_supply);

        // Validate genesis parameters.
        genesis
            .parameters
            .validate_basic()
            .expect("invalid genesis parameters");

        // Set genesis parameters.
        Self::set_params(state, genesis.parameters);
    }
}

impl module::BlockHandler for Module {}

impl module::InvariantHandler for Module {
    /// Check invariants.
    fn check_invariants(ctx: &mut DispatchContext<'_>) -> Result<(), CoreError> {
        // All account balances should sum up to the total supply.
        let computed = Self::get_all_balances(ctx.runtime_state())
            .values()
            .try_fold(0u128, |acc, amount| acc.checked_add(*amount))
            .ok_or_else(|| CoreError::InvariantViolation("balance overflow".to_string()))?;
        let total_supply = Self::get_total_supply(ctx.runtime_state());

        if computed != total_supply {
            // Computed and actual total supplies don't match.
            return Err(CoreError::InvariantViolation(format!(
                "computed and actual total supplies don't match (computed={}, actual={})",
                computed, total_supply
            )));
        }
        Ok(())
    }
}
