//! Common runtime types.
pub mod address;
pub mod decimal;
pub mod transaction;
