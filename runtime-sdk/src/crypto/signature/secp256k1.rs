//! Secp256k1 signatures.
use k256::ecdsa::{self, RecoveryId, SigningKey, VerifyingKey};

use crate::{crypto::signature::Error, types::address::Address};

/// Length of a recoverable signature: `r || s || v`.
pub const SIGNATURE_SIZE: usize = 65;

/// A Secp256k1 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Construct a public key from its SEC1 encoding (compressed or not).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(PublicKey)
            .map_err(|_| Error::MalformedPublicKey)
    }

    /// Compressed SEC1 encoding of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Ethereum-style address of the key.
    pub fn to_address(&self) -> Address {
        Address::from_verifying_key(&self.0)
    }

    /// Underlying verifying key.
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

/// Normalize a raw `v` byte of a recoverable signature to a recovery id.
fn recovery_id(v: u8) -> Result<RecoveryId, Error> {
    let v = match v {
        27 | 28 => v - 27,
        v => v,
    };
    RecoveryId::from_byte(v).filter(|id| !id.is_x_reduced()).ok_or(Error::MalformedSignature)
}

/// Recover the public key that produced `signature` over a 32-byte prehash.
///
/// The signature is `r || s || v` where `v` is 0, 1, 27 or 28. High-S signatures are rejected.
pub fn recover(prehash: &[u8; 32], signature: &[u8]) -> Result<PublicKey, Error> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(Error::MalformedSignature);
    }
    let id = recovery_id(signature[64])?;
    recover_parts(prehash, &signature[..64], id.to_byte())
}

/// Recover the public key from separate `r || s` and recovery id values.
pub fn recover_parts(prehash: &[u8; 32], rs: &[u8], id: u8) -> Result<PublicKey, Error> {
    let sig = ecdsa::Signature::from_slice(rs).map_err(|_| Error::MalformedSignature)?;
    if sig.normalize_s().is_some() {
        return Err(Error::MalformedSignature);
    }
    let id = recovery_id(id)?;
    VerifyingKey::recover_from_prehash(prehash, &sig, id)
        .map(PublicKey)
        .map_err(|_| Error::VerificationFailed)
}

/// Sign a 32-byte prehash, returning `r || s || v` with `v` in `{0, 1}`.
pub fn sign(key: &SigningKey, prehash: &[u8; 32]) -> Result<[u8; SIGNATURE_SIZE], Error> {
    let (sig, id) = key
        .sign_prehash_recoverable(prehash)
        .map_err(|_| Error::InvalidArgument)?;
    let mut out = [0u8; SIGNATURE_SIZE];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = id.to_byte();
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> SigningKey {
        SigningKey::from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_sign_recover() {
        let key = key();
        let prehash = [42u8; 32];
        let sig = sign(&key, &prehash).unwrap();

        let pk = recover(&prehash, &sig).unwrap();
        assert_eq!(pk.verifying_key(), key.verifying_key());
        assert_eq!(pk.to_address(), Address::from_verifying_key(key.verifying_key()));

        // Legacy `v` values are accepted too.
        let mut legacy = sig;
        legacy[64] += 27;
        assert_eq!(recover(&prehash, &legacy).unwrap(), pk);

        // A different message recovers a different key.
        let other = recover(&[1u8; 32], &sig);
        assert!(other.map(|k| k != pk).unwrap_or(true));
    }

    #[test]
    fn test_recover_malformed() {
        let prehash = [42u8; 32];
        assert!(matches!(
            recover(&prehash, &[0u8; 64]),
            Err(Error::MalformedSignature)
        ));

        let mut sig = sign(&key(), &prehash).unwrap();
        sig[64] = 5;
        assert!(matches!(
            recover(&prehash, &sig),
            Err(Error::MalformedSignature)
        ));
    }

    #[test]
    fn test_public_key_encoding() {
        let key = key();
        let pk = PublicKey::from(key.verifying_key().clone());
        let encoded = pk.to_bytes();
        assert_eq!(encoded.len(), 33);
        assert_eq!(PublicKey::from_bytes(&encoded).unwrap(), pk);
        assert!(PublicKey::from_bytes(&[0u8; 33]).is_err());
    }
}
