//! EVM transaction admission and execution SDK.
#![deny(rust_2018_idioms, unreachable_pub)]
#![forbid(unsafe_code)]

// Lets derived code refer to `::evm_runtime_sdk` from within this crate.
extern crate self as evm_runtime_sdk;

pub mod ante;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod module;
pub mod modules;
pub mod storage;
pub mod testing;
pub mod types;

pub use crate::{
    context::{DispatchContext, Mode, TxContext},
    module::Module,
};

// Re-export the SDK support proc-macros.
#[cfg(feature = "evm-runtime-sdk-macros")]
pub use evm_runtime_sdk_macros::*;
