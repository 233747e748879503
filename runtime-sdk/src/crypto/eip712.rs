//! EIP-712 typed-data hashing of native transactions.
//!
//! Wallets without native transaction support sign native transactions as typed data. The
//! typed data wraps the same fields the native sign document carries.
use num::BigInt;
use sha3::{Digest, Keccak256};

use crate::types::{address::Address, transaction::CosmosTx};

/// Domain name.
pub const DOMAIN_NAME: &str = "Cosmos Web3";
/// Domain version.
pub const DOMAIN_VERSION: &str = "1.0.0";
/// Domain verifying contract.
pub const DOMAIN_VERIFYING_CONTRACT: &str = "cosmos";
/// Domain salt.
pub const DOMAIN_SALT: &str = "0";

const DOMAIN_TYPE: &str = "EIP712Domain(string name,string version,uint256 chainId,string verifyingContract,string salt)";
const TX_TYPE: &str = "Tx(uint256 chainId,uint256 sequence,uint256 feeAmount,uint256 gasLimit,address feePayer,string memo,bytes32 msgs,bytes32 extensions)";

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// ABI encoding of an unsigned integer as a 32-byte word.
fn word<T: Into<BigInt>>(value: T) -> [u8; 32] {
    let (_, bytes) = value.into().to_bytes_be();
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[32 - len..].copy_from_slice(&bytes[bytes.len() - len..]);
    out
}

/// ABI encoding of an address, the zero address when absent.
fn address_word(address: Option<Address>) -> [u8; 32] {
    let mut out = [0u8; 32];
    if let Some(address) = address {
        out[12..].copy_from_slice(address.as_ref());
    }
    out
}

/// Hash of the typed-data domain for the given chain.
pub fn domain_separator(chain_id: u64) -> [u8; 32] {
    let encoded = [
        keccak(DOMAIN_TYPE.as_bytes()),
        keccak(DOMAIN_NAME.as_bytes()),
        keccak(DOMAIN_VERSION.as_bytes()),
        word(chain_id),
        keccak(DOMAIN_VERIFYING_CONTRACT.as_bytes()),
        keccak(DOMAIN_SALT.as_bytes()),
    ]
    .concat();
    keccak(&encoded)
}

/// Struct hash of the transaction message.
pub fn hash_struct(tx: &CosmosTx, chain_id: u64, sequence: u64) -> [u8; 32] {
    let encoded = [
        keccak(TX_TYPE.as_bytes()),
        word(chain_id),
        word(sequence),
        word(tx.fee.amount),
        word(tx.fee.gas_limit),
        address_word(tx.fee.payer),
        keccak(tx.memo.as_bytes()),
        tx.messages_hash(),
        tx.extensions_hash(),
    ]
    .concat();
    keccak(&encoded)
}

/// Digest signed by a typed-data signer.
pub fn digest(tx: &CosmosTx, chain_id: u64, sequence: u64) -> [u8; 32] {
    let encoded = [
        &[0x19, 0x01][..],
        &domain_separator(chain_id)[..],
        &hash_struct(tx, chain_id, sequence)[..],
    ]
    .concat();
    keccak(&encoded)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::transaction::{CosmosMsg, ExtensionOption};

    fn tx() -> CosmosTx {
        CosmosTx {
            messages: vec![CosmosMsg::Send {
                from: Address::from_bytes(&[1u8; 20]).unwrap(),
                to: Address::from_bytes(&[2u8; 20]).unwrap(),
                amount: 10,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_word() {
        let w = word(0x0102u64);
        assert_eq!(&w[..30], &[0u8; 30]);
        assert_eq!(&w[30..], &[0x01, 0x02]);
        assert_eq!(word(0u64), [0u8; 32]);
    }

    #[test]
    fn test_digest_binds_fields() {
        let tx = tx();
        let base = digest(&tx, 9000, 0);
        assert_eq!(base, digest(&tx, 9000, 0));
        assert_ne!(base, digest(&tx, 9001, 0), "chain id is bound");
        assert_ne!(base, digest(&tx, 9000, 1), "sequence is bound");

        let mut other = tx.clone();
        other.memo = "hello".to_owned();
        assert_ne!(base, digest(&other, 9000, 0), "memo is bound");

        let mut other = tx.clone();
        other.fee.payer = Some(Address::from_bytes(&[3u8; 20]).unwrap());
        assert_ne!(base, digest(&other, 9000, 0), "fee payer is bound");

        let mut other = tx.clone();
        other.extension_options = vec![ExtensionOption::Web3Tx {
            typed_data_chain_id: 9000,
            fee_payer: None,
            fee_payer_sig: vec![],
        }];
        let with_ext = digest(&other, 9000, 0);
        assert_ne!(base, with_ext, "extension options are bound");
        if let Some(ExtensionOption::Web3Tx { fee_payer, .. }) = other.extension_options.first_mut()
        {
            *fee_payer = Some(Address::from_bytes(&[1u8; 20]).unwrap());
        }
        assert_ne!(with_ext, digest(&other, 9000, 0), "extension fee payer is bound");

        assert_ne!(domain_separator(1), domain_separator(2));
    }
}
