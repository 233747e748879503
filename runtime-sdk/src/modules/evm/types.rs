//! EVM module types.
use num::BigInt;

use crate::types::{address::Address, transaction::AccessTuple};

/// Ethereum hard fork whose rules apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Spec {
    Frontier = 0,
    Homestead = 1,
    Istanbul = 2,
    Berlin = 3,
    #[default]
    London = 4,
    Shanghai = 5,
}

impl TryFrom<u64> for Spec {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Spec::Frontier,
            1 => Spec::Homestead,
            2 => Spec::Istanbul,
            3 => Spec::Berlin,
            4 => Spec::London,
            5 => Spec::Shanghai,
            other => return Err(other),
        })
    }
}

impl cbor::Encode for Spec {
    fn into_cbor_value(self) -> cbor::Value {
        cbor::Value::Unsigned(self as u64)
    }
}

impl cbor::Decode for Spec {
    fn try_from_cbor_value(value: cbor::Value) -> Result<Self, cbor::DecodeError> {
        match value {
            cbor::Value::Unsigned(v) => {
                Spec::try_from(v).map_err(|_| cbor::DecodeError::UnexpectedType)
            }
            _ => Err(cbor::DecodeError::UnexpectedType),
        }
    }
}

/// Message handed to the interpreter.
#[derive(Clone, Debug)]
pub struct Message {
    pub caller: Address,
    /// Callee, `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: u128,
    pub gas_price: BigInt,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessTuple>,
}

/// Log emitted during execution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// What the interpreter reports back after running a message.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOutcome {
    /// Gas used by execution, never more than the gas it was given.
    pub gas_used: u64,
    /// Refund counter accumulated during execution.
    pub refund: u64,
    pub reverted: bool,
    pub logs: Vec<Log>,
    pub vm_error: Option<String>,
    /// Call return data, or the deployed code for contract creation.
    pub return_data: Vec<u8>,
}

/// Result of applying an Ethereum transaction.
#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    /// Transaction hash.
    pub hash: Vec<u8>,
    /// Gas charged for the transaction after refunds.
    pub gas_used: u64,
    pub reverted: bool,
    pub logs: Vec<Log>,
    /// Set when execution failed, including reverts.
    pub vm_error: Option<String>,
    pub return_data: Vec<u8>,
    /// Address of the created contract, if any.
    pub contract_address: Option<Address>,
}

impl ExecutionResult {
    /// Whether execution failed.
    pub fn failed(&self) -> bool {
        self.vm_error.is_some()
    }
}
