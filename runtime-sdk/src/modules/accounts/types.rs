//! Account module types.

/// Account metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, cbor::Encode, cbor::Decode)]
pub struct Account {
    #[cbor(optional)]
    pub nonce: u64,

    /// Keccak-256 hash of the account's contract code, empty for externally owned accounts.
    #[cbor(optional)]
    pub code_hash: Vec<u8>,
}

impl Account {
    /// Whether the account holds contract code.
    pub fn is_contract(&self) -> bool {
        !self.code_hash.is_empty()
    }
}
