//! Module that contains known test keys.
use k256::ecdsa::SigningKey;

use crate::{
    crypto::signature::{secp256k1, Eip712Verifier, Secp256k1Verifier, SignatureVerifier},
    types::transaction::{CosmosTx, EthereumTx, Signature, TxFees},
};

/// Sign an Ethereum transaction in place, setting its declared sender to the signer.
pub fn sign_ethereum(key: &SigningKey, tx: &mut EthereumTx) {
    tx.from = crate::types::address::Address::from_verifying_key(key.verifying_key());
    let sig = secp256k1::sign(key, &tx.signing_hash()).expect("signing should succeed");
    let id = u64::from(sig[64]);
    let v = match (&tx.fees, tx.chain_id) {
        (TxFees::Legacy { .. }, Some(chain_id)) => id + 35 + 2 * chain_id,
        (TxFees::Legacy { .. }, None) => id + 27,
        _ => id,
    };
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&sig[..32]);
    s.copy_from_slice(&sig[32..64]);
    tx.signature = Some(Signature { v, r, s });
}

/// Sign a native transaction's sign document.
pub fn sign_cosmos(key: &SigningKey, tx: &CosmosTx, chain_id: u64, sequence: u64) -> Vec<u8> {
    let digest = Secp256k1Verifier.digest(tx, chain_id, sequence);
    secp256k1::sign(key, &digest)
        .expect("signing should succeed")
        .to_vec()
}

/// Sign a native transaction as EIP-712 typed data.
pub fn sign_eip712(key: &SigningKey, tx: &CosmosTx, chain_id: u64, sequence: u64) -> Vec<u8> {
    let digest = Eip712Verifier.digest(tx, chain_id, sequence);
    secp256k1::sign(key, &digest)
        .expect("signing should succeed")
        .to_vec()
}

/// Define a secp256k1 test key.
macro_rules! test_key_secp256k1 {
    ($doc:expr, $name:ident, $sk:expr) => {
        #[doc = " Test key "]
        #[doc=$doc]
        #[doc = "."]
        pub mod $name {
            use k256::ecdsa::SigningKey;

            use crate::{
                crypto::signature::secp256k1,
                types::{
                    address::Address,
                    transaction::{CosmosTx, EthereumTx},
                },
            };

            #[doc = " Test signing key "]
            #[doc=$doc]
            #[doc = "."]
            pub fn signing_key() -> SigningKey {
                SigningKey::from_slice(&hex::decode($sk).unwrap()).unwrap()
            }

            #[doc = " Test public key "]
            #[doc=$doc]
            #[doc = "."]
            pub fn pk() -> secp256k1::PublicKey {
                signing_key().verifying_key().clone().into()
            }

            #[doc = " Test address "]
            #[doc=$doc]
            #[doc = "."]
            pub fn address() -> Address {
                pk().to_address()
            }

            /// Sign an Ethereum transaction in place.
            pub fn sign_ethereum(tx: &mut EthereumTx) {
                super::sign_ethereum(&signing_key(), tx)
            }

            /// Sign a native transaction.
            pub fn sign_cosmos(tx: &CosmosTx, chain_id: u64, sequence: u64) -> Vec<u8> {
                super::sign_cosmos(&signing_key(), tx, chain_id, sequence)
            }

            /// Sign a native transaction as EIP-712 typed data.
            pub fn sign_eip712(tx: &CosmosTx, chain_id: u64, sequence: u64) -> Vec<u8> {
                super::sign_eip712(&signing_key(), tx, chain_id, sequence)
            }
        }
    };
}

test_key_secp256k1!(
    "A",
    alice,
    "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318"
);
test_key_secp256k1!(
    "B",
    bob,
    "8da4ef21b864d2cc526dbdb2a120bd2874c36c9d0a1fb7f8c63d7f7a8b41de8f"
);
test_key_secp256k1!(
    "C",
    charlie,
    "a3b1bdb0ba4ee3a6bc7f3cd6f4b82f7c1fe8c7a1b9e7d4c8f0e3a5d2b6c9e1f4"
);
test_key_secp256k1!(
    "D",
    dave,
    "0b5e6f1d9c2a7e3b8f4d0c6a2e9b5f1d7c3a8e4b0f6d2c9a5e1b7f3d8c4a0e62"
);
