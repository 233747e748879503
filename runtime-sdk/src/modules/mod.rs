//! Runtime modules included with the SDK.

pub mod accounts;
pub mod core;
pub mod evm;
pub mod feemarket;
pub mod rewards;
