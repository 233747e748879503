//! Cryptographic signatures.
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::{
    crypto::eip712,
    types::{
        address::Address,
        transaction::{CosmosTx, EthereumTx},
    },
};

pub mod secp256k1;

/// Error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("invalid argument")]
    InvalidArgument,
}

/// Recovers signers of native transactions.
///
/// Every implementation recovers a secp256k1 public key, so the same key yields the same
/// address no matter which digest it signed.
pub trait SignatureVerifier {
    /// Digest a signer with the given account sequence signs.
    fn digest(&self, tx: &CosmosTx, chain_id: u64, sequence: u64) -> [u8; 32];

    /// Recover the address that produced `signature`.
    fn recover_signer(
        &self,
        tx: &CosmosTx,
        chain_id: u64,
        sequence: u64,
        signature: &[u8],
    ) -> Result<Address, Error> {
        let digest = self.digest(tx, chain_id, sequence);
        Ok(secp256k1::recover(&digest, signature)?.to_address())
    }
}

/// Verifies signatures over the keccak256 hash of the native sign document.
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn digest(&self, tx: &CosmosTx, chain_id: u64, sequence: u64) -> [u8; 32] {
        Keccak256::digest(tx.sign_bytes(chain_id, sequence)).into()
    }
}

/// Verifies signatures over the EIP-712 typed-data digest of a native transaction.
pub struct Eip712Verifier;

impl SignatureVerifier for Eip712Verifier {
    fn digest(&self, tx: &CosmosTx, chain_id: u64, sequence: u64) -> [u8; 32] {
        eip712::digest(tx, chain_id, sequence)
    }
}

/// Recover the sender of a signed Ethereum transaction.
pub fn recover_ethereum_signer(tx: &EthereumTx) -> Result<Address, Error> {
    let sig = tx.signature.as_ref().ok_or(Error::MalformedSignature)?;
    let id = tx.recovery_id().ok_or(Error::MalformedSignature)?;
    let rs = [&sig.r[..], &sig.s[..]].concat();
    Ok(secp256k1::recover_parts(&tx.signing_hash(), &rs, id)?.to_address())
}
