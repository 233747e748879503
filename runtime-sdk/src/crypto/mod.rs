//! Cryptographic primitives.
pub mod eip712;
pub mod signature;
