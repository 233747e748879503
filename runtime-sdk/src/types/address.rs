//! Account address type.
use std::{convert::TryFrom, fmt};

use k256::{ecdsa::VerifyingKey, elliptic_curve::sec1::ToEncodedPoint};
use sha3::{Digest, Keccak256};
use thiserror::Error;

const ADDRESS_SIZE: usize = 20;

/// Module address context.
pub const ADDRESS_MODULE_CONTEXT: &[u8] = b"evm-runtime-sdk/address: module";

/// Error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed address")]
    MalformedAddress,
}

/// An Ethereum-compatible account address.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Size of an address in bytes.
    pub const SIZE: usize = ADDRESS_SIZE;

    /// The all-zero address.
    pub const ZERO: Address = Address([0; ADDRESS_SIZE]);

    /// Creates an address from the last 20 bytes of the Keccak-256 hash of the given data.
    fn from_hashed(data: &[u8]) -> Self {
        let mut a = [0; ADDRESS_SIZE];
        a.copy_from_slice(&Keccak256::digest(data)[32 - ADDRESS_SIZE..]);
        Address(a)
    }

    /// Tries to create a new address from raw bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != ADDRESS_SIZE {
            return Err(Error::MalformedAddress);
        }

        let mut a = [0; ADDRESS_SIZE];
        a.copy_from_slice(data);

        Ok(Address(a))
    }

    /// Tries to create a new address from a hex string, with or without the `0x` prefix.
    pub fn from_hex(data: &str) -> Result<Self, Error> {
        let data = data.strip_prefix("0x").unwrap_or(data);
        let bytes = hex::decode(data).map_err(|_| Error::MalformedAddress)?;
        Self::from_bytes(&bytes)
    }

    /// Convert the address into raw bytes.
    pub fn into_bytes(self) -> [u8; ADDRESS_SIZE] {
        self.0
    }

    /// Creates a new address for a specific module and kind.
    pub fn from_module(module: &str, kind: &str) -> Self {
        Address::from_hashed(
            &[
                ADDRESS_MODULE_CONTEXT,
                module.as_bytes(),
                b".",
                kind.as_bytes(),
            ]
            .concat(),
        )
    }

    /// Derives the address of a secp256k1 public key the same way Ethereum does.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.as_affine().to_encoded_point(false);
        // Skip the SEC1 tag byte.
        Address::from_hashed(&point.as_bytes()[1..])
    }

    /// Whether this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in &self.0[..] {
            write!(f, "{:02x}", i)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self)
    }
}

impl slog::Value for Address {
    fn serialize(
        &self,
        _record: &slog::Record<'_>,
        key: slog::Key,
        serializer: &mut dyn slog::Serializer,
    ) -> slog::Result {
        serializer.emit_arguments(key, &format_args!("{}", self))
    }
}

impl cbor::Encode for Address {
    fn into_cbor_value(self) -> cbor::Value {
        cbor::Value::ByteString(self.as_ref().to_vec())
    }
}

impl cbor::Decode for Address {
    fn try_from_cbor_value(value: cbor::Value) -> Result<Self, cbor::DecodeError> {
        match value {
            cbor::Value::ByteString(data) => {
                Self::from_bytes(&data).map_err(|_| cbor::DecodeError::UnexpectedType)
            }
            _ => Err(cbor::DecodeError::UnexpectedType),
        }
    }
}
