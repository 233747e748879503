//! Rewards module.
//!
//! Tracks staking rewards that have been allocated to delegators but not yet withdrawn. The
//! rewarded tokens are held by the reward pool until withdrawal.
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::{
    context::TxContext,
    module::{self, Module as _, Parameters as _},
    modules::{
        self,
        accounts::{Module as Accounts, API as _},
        core::{Module as Core, API as _},
    },
    storage::{self, Store},
    types::address::Address,
};


/// Unique module name.
const MODULE_NAME: &str = "rewards";

/// Base gas cost of withdrawing all delegation rewards.
pub const GAS_COST_WITHDRAW_BASE: u64 = 10_000;
/// Additional gas cost for each validator rewards are withdrawn from.
pub const GAS_COST_WITHDRAW_PER_VALIDATOR: u64 = 5_000;

/// Errors emitted by the rewards module.
#[derive(Error, Debug, crate::Error)]
pub enum Error {
    #[error("invalid argument")]
    #[sdk_error(code = 1)]
    InvalidArgument,

    #[error("accounts: {0}")]
    #[sdk_error(transparent)]
    Accounts(#[from] modules::accounts::Error),

    #[error("core: {0}")]
    #[sdk_error(transparent)]
    Core(#[from] modules::core::Error),
}

/// Events emitted by the rewards module.
#[derive(Debug, cbor::Encode, crate::Event)]
#[cbor(untagged)]
pub enum Event {
    #[sdk_event(code = 1)]
    Withdraw {
        delegator: Address,
        validator: Address,
        amount: u128,
    },
}

/// Gas costs.
#[derive(Clone, Debug, cbor::Encode, cbor::Decode)]
pub struct GasCosts {
    pub withdraw_base: u64,
    pub withdraw_per_validator: u64,
}

impl Default for GasCosts {
    fn default() -> Self {
        Self {
            withdraw_base: GAS_COST_WITHDRAW_BASE,
            withdraw_per_validator: GAS_COST_WITHDRAW_PER_VALIDATOR,
        }
    }
}

/// Parameters for the rewards module.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct Parameters {
    pub gas_costs: GasCosts,
}

impl module::Parameters for Parameters {
    type Error = std::convert::Infallible;
}

/// A pending reward entry in genesis.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct PendingReward {
    pub delegator: Address,
    pub validator: Address,
    pub amount: u128,
}

/// Genesis state for the rewards module.
#[derive(Clone, Debug, Default, cbor::Encode, cbor::Decode)]
pub struct Genesis {
    pub parameters: Parameters,
    pub pending: Vec<PendingReward>,
}

/// State schema constants.
pub mod state {
    /// Map of (delegator, validator) to rewards pending withdrawal.
    pub const PENDING: &[u8] = &[0x01];
}

/// Interface that can be called from other modules.
pub trait API {
    /// Pending rewards of a delegator, per validator.
    fn get_pending_rewards<S: Store>(state: S, delegator: Address) -> BTreeMap<Address, u128>;

    /// Total pending rewards of a delegator.
    fn get_pending_delegation_rewards<S: Store>(state: S, delegator: Address) -> u128;

    /// Allocate new rewards to a delegator, minting them into the reward pool.
    fn allocate<S: Store>(
        state: S,
        delegator: Address,
        validator: Address,
        amount: u128,
    ) -> Result<(), Error>;

    /// Withdraw every pending reward of the delegator into its account.
    ///
    /// Gas is charged to the transaction's meter before any state is touched. Returns the
    /// total amount withdrawn.
    fn withdraw_all_delegation_rewards(
        ctx: &mut TxContext<'_, '_>,
        delegator: Address,
    ) -> Result<u128, Error>;
}

/// Rewards module.
pub struct Module;

/// Module's address that has the reward pool.
pub static ADDRESS_REWARD_POOL: Lazy<Address> =
    Lazy::new(|| Address::from_module(MODULE_NAME, "reward-pool"));

impl Module {
    fn set_pending<S: Store>(state: S, delegator: Address, validator: Address, amount: u128) {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let pending = storage::PrefixStore::new(store, &state::PENDING);
        let mut rewards = storage::TypedStore::new(storage::PrefixStore::new(pending, &delegator));
        if amount == 0 {
            rewards.remove(validator);
        } else {
            rewards.insert(validator, amount);
        }
    }
}

impl API for Module {
    fn get_pending_rewards<S: Store>(state: S, delegator: Address) -> BTreeMap<Address, u128> {
        let store = storage::PrefixStore::new(state, &MODULE_NAME);
        let pending = storage::PrefixStore::new(store, &state::PENDING);
        let rewards = storage::TypedStore::new(storage::PrefixStore::new(pending, &delegator));
        rewards.iter().collect()
    }

    fn get_pending_delegation_rewards<S: Store>(state: S, delegator: Address) -> u128 {
        Self::get_pending_rewards(state, delegator)
            .values()
            .fold(0u128, |acc, amount| acc.saturating_add(*amount))
    }

    fn allocate<S: Store>(
        mut state: S,
        delegator: Address,
        validator: Address,
        amount: u128,
    ) -> Result<(), Error> {
        let current = Self::get_pending_rewards(&mut state, delegator)
            .get(&validator)
            .copied()
            .unwrap_or_default();
        let updated = current.checked_add(amount).ok_or(Error::InvalidArgument)?;

        Accounts::mint(&mut state, *ADDRESS_REWARD_POOL, amount)?;
        Self::set_pending(state, delegator, validator, updated);
        Ok(())
    }

    fn withdraw_all_delegation_rewards(
        ctx: &mut TxContext<'_, '_>,
        delegator: Address,
    ) -> Result<u128, Error> {
        let params = Self::params(ctx.runtime_state());
        let rewards = Self::get_pending_rewards(ctx.runtime_state(), delegator);

        let gas = (rewards.len() as u64)
            .checked_mul(params.gas_costs.withdraw_per_validator)
            .and_then(|g| g.checked_add(params.gas_costs.withdraw_base))
            .ok_or(modules::core::Error::GasOverflow)?;
        Core::use_tx_gas(ctx, gas)?;

        let mut total: u128 = 0;
        for (validator, amount) in rewards {
            Accounts::transfer(ctx.runtime_state(), *ADDRESS_REWARD_POOL, delegator, amount)?;
            Self::set_pending(ctx.runtime_state(), delegator, validator, 0);
            total = total.checked_add(amount).ok_or(Error::InvalidArgument)?;

            ctx.emit_event(Event::Withdraw {
                delegator,
                validator,
                amount,
            });
        }

        Ok(total)
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
        genesis
            .parameters
            .validate_basic()
            .expect("invalid genesis parameters");

        for reward in genesis.pending {
            Self::allocate(&mut state, reward.delegator, reward.validator, reward.amount)
                .expect("invalid genesis rewards");
        }

        // Set genesis parameters.
        Self::set_params(state, genesis.parameters);
    }
}

impl module::BlockHandler for Module {}
