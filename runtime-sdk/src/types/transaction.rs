//! Transaction types.
use num::{BigInt, Signed, Zero};
use sha3::{Digest, Keccak256};

use crate::types::address::Address;

/// Maximum bit width of any numeric transaction field.
pub const MAX_NUMERIC_BITS: u64 = 256;

/// Type URL of the extension marking a native Ethereum transaction.
pub const EXTENSION_ETHEREUM_TX: &str = "/ethermint.evm.v1.ExtensionOptionsEthereumTx";
/// Type URL of the extension marking a legacy EIP-712 signed transaction.
pub const EXTENSION_WEB3_TX: &str = "/ethermint.types.v1.ExtensionOptionsWeb3Tx";
/// Type URL of the dynamic fee extension.
pub const EXTENSION_DYNAMIC_FEE_TX: &str = "/ethermint.types.v1.ExtensionOptionDynamicFeeTx";

/// A transaction as handed to the runtime by the driver.
#[derive(Clone, Debug)]
pub enum Transaction {
    /// A native Ethereum transaction.
    Ethereum(EthereumTx),
    /// A native account-based transaction.
    Cosmos(CosmosTx),
    /// A payload that does not satisfy any known transaction shape.
    Unknown,
}

impl Transaction {
    /// Declared gas limit, zero for unknown payloads.
    pub fn gas_limit(&self) -> u64 {
        match self {
            Transaction::Ethereum(tx) => tx.gas_limit,
            Transaction::Cosmos(tx) => tx.fee.gas_limit,
            Transaction::Unknown => 0,
        }
    }
}

/// An extension option attached to a native transaction.
#[derive(Clone, Debug)]
pub enum ExtensionOption {
    EthereumTx,
    Web3Tx {
        typed_data_chain_id: u64,
        fee_payer: Option<Address>,
        fee_payer_sig: Vec<u8>,
    },
    DynamicFeeTx {
        max_priority_price: BigInt,
    },
    Unknown(String),
}

impl ExtensionOption {
    /// Type URL identifying the extension.
    pub fn type_url(&self) -> &str {
        match self {
            ExtensionOption::EthereumTx => EXTENSION_ETHEREUM_TX,
            ExtensionOption::Web3Tx { .. } => EXTENSION_WEB3_TX,
            ExtensionOption::DynamicFeeTx { .. } => EXTENSION_DYNAMIC_FEE_TX,
            ExtensionOption::Unknown(url) => url,
        }
    }
}

/// An access list entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessTuple {
    pub address: Address,
    pub storage_keys: Vec<[u8; 32]>,
}

/// Pricing of an Ethereum transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxFees {
    /// Pre-EIP-2718 transaction with a flat gas price.
    Legacy { gas_price: Option<BigInt> },
    /// EIP-2930 transaction with a flat gas price.
    AccessList { gas_price: Option<BigInt> },
    /// EIP-1559 transaction.
    DynamicFee {
        gas_fee_cap: Option<BigInt>,
        gas_tip_cap: Option<BigInt>,
    },
}

impl Default for TxFees {
    fn default() -> Self {
        TxFees::Legacy { gas_price: None }
    }
}

/// Ethereum transaction signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Raw `v` value as encoded in the transaction.
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// An Ethereum transaction.
#[derive(Clone, Debug, Default)]
pub struct EthereumTx {
    /// Declared sender address.
    pub from: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    /// Recipient, `None` for contract creation.
    pub to: Option<Address>,
    pub value: Option<BigInt>,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessTuple>,
    pub chain_id: Option<u64>,
    pub fees: TxFees,
    pub signature: Option<Signature>,
}

fn zero() -> BigInt {
    BigInt::zero()
}

impl EthereumTx {
    /// EIP-2718 transaction type.
    pub fn tx_type(&self) -> u8 {
        match self.fees {
            TxFees::Legacy { .. } => 0,
            TxFees::AccessList { .. } => 1,
            TxFees::DynamicFee { .. } => 2,
        }
    }

    /// Whether this is a dynamic fee transaction.
    pub fn is_dynamic_fee(&self) -> bool {
        matches!(self.fees, TxFees::DynamicFee { .. })
    }

    /// Whether the transaction creates a contract.
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Transferred value, zero when unset.
    pub fn value(&self) -> BigInt {
        self.value.clone().unwrap_or_else(zero)
    }

    /// Flat gas price, or the fee cap for dynamic fee transactions.
    pub fn gas_price(&self) -> BigInt {
        match &self.fees {
            TxFees::Legacy { gas_price } | TxFees::AccessList { gas_price } => {
                gas_price.clone().unwrap_or_else(zero)
            }
            TxFees::DynamicFee { gas_fee_cap, .. } => gas_fee_cap.clone().unwrap_or_else(zero),
        }
    }

    /// Fee cap; equal to the gas price for flat-priced transactions.
    pub fn gas_fee_cap(&self) -> BigInt {
        self.gas_price()
    }

    /// Tip cap; equal to the gas price for flat-priced transactions.
    pub fn gas_tip_cap(&self) -> BigInt {
        match &self.fees {
            TxFees::DynamicFee { gas_tip_cap, .. } => gas_tip_cap.clone().unwrap_or_else(zero),
            _ => self.gas_price(),
        }
    }

    /// Maximum fee the transaction may pay (`fee cap × gas limit`).
    pub fn fee(&self) -> BigInt {
        self.gas_fee_cap() * BigInt::from(self.gas_limit)
    }

    /// Maximum total cost of the transaction (fee plus transferred value).
    pub fn cost(&self) -> BigInt {
        self.fee() + self.value()
    }

    /// All optional numeric fields that are present, with their names.
    pub fn numeric_fields(&self) -> Vec<(&'static str, &BigInt)> {
        let mut fields = Vec::new();
        if let Some(v) = &self.value {
            fields.push(("amount", v));
        }
        match &self.fees {
            TxFees::Legacy { gas_price } | TxFees::AccessList { gas_price } => {
                if let Some(p) = gas_price {
                    fields.push(("gas price", p));
                }
            }
            TxFees::DynamicFee {
                gas_fee_cap,
                gas_tip_cap,
            } => {
                if let Some(p) = gas_fee_cap {
                    fields.push(("gas fee cap", p));
                }
                if let Some(p) = gas_tip_cap {
                    fields.push(("gas tip cap", p));
                }
            }
        }
        fields
    }

    /// Whether the legacy signature lacks EIP-155 replay protection.
    pub fn is_unprotected(&self) -> bool {
        match (&self.fees, &self.signature) {
            (TxFees::Legacy { .. }, Some(sig)) => sig.v == 27 || sig.v == 28,
            _ => false,
        }
    }

    /// Recovery id encoded in the signature `v` value.
    pub fn recovery_id(&self) -> Option<u8> {
        let sig = self.signature.as_ref()?;
        let id = match self.fees {
            TxFees::Legacy { .. } => match sig.v {
                27 | 28 => sig.v - 27,
                v if v >= 35 => (v - 35) % 2,
                _ => return None,
            },
            _ => sig.v,
        };
        u8::try_from(id).ok().filter(|id| *id <= 1)
    }

    /// Hash that the sender signs.
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak(&self.encode(false))
    }

    /// Transaction hash.
    pub fn hash(&self) -> [u8; 32] {
        keccak(&self.encode(true))
    }

    /// Canonical encoding, optionally including the signature.
    pub fn encode(&self, signed: bool) -> Vec<u8> {
        let mut s = rlp::RlpStream::new();
        let chain_id = self.chain_id.unwrap_or_default();
        match &self.fees {
            TxFees::Legacy { .. } => {
                let protected = !signed && self.chain_id.is_some();
                let items = if signed || protected { 9 } else { 6 };
                s.begin_list(items);
                s.append(&self.nonce);
                append_int(&mut s, &self.gas_price());
                self.append_body(&mut s);
                if signed {
                    self.append_signature(&mut s);
                } else if protected {
                    s.append(&chain_id);
                    s.append_empty_data();
                    s.append_empty_data();
                }
                return s.out().to_vec();
            }
            TxFees::AccessList { .. } => {
                s.begin_list(if signed { 11 } else { 8 });
                s.append(&chain_id);
                s.append(&self.nonce);
                append_int(&mut s, &self.gas_price());
            }
            TxFees::DynamicFee { .. } => {
                s.begin_list(if signed { 12 } else { 9 });
                s.append(&chain_id);
                s.append(&self.nonce);
                append_int(&mut s, &self.gas_tip_cap());
                append_int(&mut s, &self.gas_fee_cap());
            }
        }
        self.append_body(&mut s);
        self.append_access_list(&mut s);
        if signed {
            self.append_signature(&mut s);
        }

        [&[self.tx_type()][..], &s.out()[..]].concat()
    }

    fn append_body(&self, s: &mut rlp::RlpStream) {
        s.append(&self.gas_limit);
        match &self.to {
            Some(to) => {
                s.append(&to.as_ref().to_vec());
            }
            None => {
                s.append_empty_data();
            }
        }
        append_int(s, &self.value());
        s.append(&self.data);
    }

    fn append_access_list(&self, s: &mut rlp::RlpStream) {
        s.begin_list(self.access_list.len());
        for tuple in &self.access_list {
            s.begin_list(2);
            s.append(&tuple.address.as_ref().to_vec());
            s.begin_list(tuple.storage_keys.len());
            for key in &tuple.storage_keys {
                s.append(&key.to_vec());
            }
        }
    }

    fn append_signature(&self, s: &mut rlp::RlpStream) {
        let (v, r, s_) = match &self.signature {
            Some(sig) => (sig.v, sig.r, sig.s),
            None => (0, [0; 32], [0; 32]),
        };
        s.append(&v);
        s.append(&trim_leading_zeros(&r).to_vec());
        s.append(&trim_leading_zeros(&s_).to_vec());
    }
}

fn keccak(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

fn trim_leading_zeros(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| *b != 0).unwrap_or(data.len());
    &data[start..]
}

/// Appends a non-negative integer as a minimal big-endian byte string.
fn append_int(s: &mut rlp::RlpStream, value: &BigInt) {
    let (_, bytes) = value.abs().to_bytes_be();
    s.append(&trim_leading_zeros(&bytes).to_vec());
}

/// Transaction fee of a native transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fee {
    pub amount: u128,
    pub gas_limit: u64,
    /// Account paying the fee, defaults to the first signer. An explicit payer must also sign.
    pub payer: Option<Address>,
}

/// Signer information of a native transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerInfo {
    /// SEC1-encoded secp256k1 public key.
    pub public_key: Vec<u8>,
    pub sequence: u64,
}

/// A message of a native transaction.
#[derive(Clone, Debug)]
pub enum CosmosMsg {
    Send {
        from: Address,
        to: Address,
        amount: u128,
    },
    Ethereum(EthereumTx),
    Other {
        type_url: String,
        signer: Address,
    },
}

impl CosmosMsg {
    /// Account that must sign the message.
    pub fn signer(&self) -> Address {
        match self {
            CosmosMsg::Send { from, .. } => *from,
            CosmosMsg::Ethereum(tx) => tx.from,
            CosmosMsg::Other { signer, .. } => *signer,
        }
    }
}

/// A native account-based transaction.
#[derive(Clone, Debug, Default)]
pub struct CosmosTx {
    pub messages: Vec<CosmosMsg>,
    pub signer_infos: Vec<SignerInfo>,
    pub fee: Fee,
    pub memo: String,
    pub extension_options: Vec<ExtensionOption>,
    pub signatures: Vec<Vec<u8>>,
}

/// Signed message document.
#[derive(Clone, Debug, cbor::Encode)]
struct MsgDocument {
    type_url: String,
    from: Address,
    #[cbor(optional)]
    to: Option<Address>,
    #[cbor(optional)]
    amount: u128,
}

/// Signed extension option document. The fee payer signature is left out as it signs the
/// document itself.
#[derive(Clone, Debug, cbor::Encode)]
struct ExtensionDocument {
    type_url: String,
    #[cbor(optional)]
    typed_data_chain_id: u64,
    #[cbor(optional)]
    fee_payer: Option<Address>,
    #[cbor(optional)]
    max_priority_price: String,
}

/// Document signed by each signer of a native transaction.
#[derive(Clone, Debug, cbor::Encode)]
struct SignDocument {
    chain_id: u64,
    messages: Vec<MsgDocument>,
    fee_amount: u128,
    gas_limit: u64,
    #[cbor(optional)]
    fee_payer: Option<Address>,
    memo: String,
    extension_options: Vec<ExtensionDocument>,
    sequence: u64,
}

impl CosmosTx {
    /// Unique signers in order of first appearance: message signers, then an explicit fee
    /// payer.
    pub fn signers(&self) -> Vec<Address> {
        let mut signers: Vec<Address> = Vec::new();
        let payer = self.fee.payer.iter().copied();
        for signer in self.messages.iter().map(CosmosMsg::signer).chain(payer) {
            if !signers.contains(&signer) {
                signers.push(signer);
            }
        }
        signers
    }

    /// Account paying the fee.
    pub fn fee_payer(&self) -> Option<Address> {
        self.fee.payer.or_else(|| self.signers().first().copied())
    }

    /// Hash of the messages, used in typed-data signing.
    pub fn messages_hash(&self) -> [u8; 32] {
        keccak(&cbor::to_vec(self.message_documents()))
    }

    /// Hash of the extension options, used in typed-data signing.
    pub fn extensions_hash(&self) -> [u8; 32] {
        keccak(&cbor::to_vec(self.extension_documents()))
    }

    fn extension_documents(&self) -> Vec<ExtensionDocument> {
        self.extension_options
            .iter()
            .map(|ext| {
                let mut doc = ExtensionDocument {
                    type_url: ext.type_url().to_owned(),
                    typed_data_chain_id: 0,
                    fee_payer: None,
                    max_priority_price: String::new(),
                };
                match ext {
                    ExtensionOption::Web3Tx {
                        typed_data_chain_id,
                        fee_payer,
                        ..
                    } => {
                        doc.typed_data_chain_id = *typed_data_chain_id;
                        doc.fee_payer = *fee_payer;
                    }
                    ExtensionOption::DynamicFeeTx { max_priority_price } => {
                        doc.max_priority_price = max_priority_price.to_string();
                    }
                    ExtensionOption::EthereumTx | ExtensionOption::Unknown(_) => {}
                }
                doc
            })
            .collect()
    }

    fn message_documents(&self) -> Vec<MsgDocument> {
        self.messages
            .iter()
            .map(|m| match m {
                CosmosMsg::Send { from, to, amount } => MsgDocument {
                    type_url: "/cosmos.bank.v1beta1.MsgSend".to_owned(),
                    from: *from,
                    to: Some(*to),
                    amount: *amount,
                },
                CosmosMsg::Ethereum(tx) => MsgDocument {
                    type_url: "/ethermint.evm.v1.MsgEthereumTx".to_owned(),
                    from: tx.from,
                    to: tx.to,
                    amount: 0,
                },
                CosmosMsg::Other { type_url, signer } => MsgDocument {
                    type_url: type_url.clone(),
                    from: *signer,
                    to: None,
                    amount: 0,
                },
            })
            .collect()
    }

    /// Bytes signed by a signer with the given account sequence.
    pub fn sign_bytes(&self, chain_id: u64, sequence: u64) -> Vec<u8> {
        cbor::to_vec(SignDocument {
            chain_id,
            messages: self.message_documents(),
            fee_amount: self.fee.amount,
            gas_limit: self.fee.gas_limit,
            fee_payer: self.fee.payer,
            memo: self.memo.clone(),
            extension_options: self.extension_documents(),
            sequence,
        })
    }
}

/// Result of a call as reported to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallResult {
    Ok,
    Failed {
        module: String,
        code: u32,
        message: String,
    },
}

impl CallResult {
    /// Check whether the call result indicates a successful operation or not.
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Ok)
    }
}

/// Checks that a numeric field fits the protocol bit width.
///
/// # Panics
///
/// Panics if the value is wider than 256 bits. Such values can only come from a broken decoder.
pub fn ensure_numeric_width(name: &str, value: &BigInt) {
    if value.bits() > MAX_NUMERIC_BITS {
        panic!("{} exceeds {} bits: {}", name, MAX_NUMERIC_BITS, value);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn legacy_tx() -> EthereumTx {
        EthereumTx {
            nonce: 9,
            gas_limit: 21_000,
            to: Some(Address::from_hex("0x3535353535353535353535353535353535353535").unwrap()),
            value: Some(BigInt::from(1_000_000_000_000_000_000u64)),
            chain_id: Some(1),
            fees: TxFees::Legacy {
                gas_price: Some(BigInt::from(20_000_000_000u64)),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_eip155_signing_hash() {
        // Example from EIP-155.
        let tx = legacy_tx();
        assert_eq!(
            hex::encode(tx.encode(false)),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_hash()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn test_fees() {
        let tx = legacy_tx();
        assert_eq!(tx.tx_type(), 0);
        assert_eq!(tx.gas_fee_cap(), tx.gas_tip_cap());
        assert_eq!(tx.fee(), BigInt::from(20_000_000_000u64 * 21_000));
        assert_eq!(tx.cost(), tx.fee() + BigInt::from(1_000_000_000_000_000_000u64));

        let tx = EthereumTx {
            fees: TxFees::DynamicFee {
                gas_fee_cap: Some(BigInt::from(100)),
                gas_tip_cap: None,
            },
            gas_limit: 10,
            ..Default::default()
        };
        assert_eq!(tx.tx_type(), 2);
        assert!(tx.is_dynamic_fee());
        assert!(tx.is_create());
        assert_eq!(tx.gas_tip_cap(), BigInt::zero());
        assert_eq!(tx.fee(), BigInt::from(1000));
        assert_eq!(tx.numeric_fields().len(), 1);
        assert_eq!(tx.encode(false)[0], 2);
    }

    #[test]
    fn test_recovery_id() {
        let mut tx = legacy_tx();
        assert_eq!(tx.recovery_id(), None);

        tx.signature = Some(Signature {
            v: 37,
            r: [1; 32],
            s: [2; 32],
        });
        assert_eq!(tx.recovery_id(), Some(0));
        assert!(!tx.is_unprotected());

        tx.signature = Some(Signature {
            v: 28,
            r: [1; 32],
            s: [2; 32],
        });
        assert_eq!(tx.recovery_id(), Some(1));
        assert!(tx.is_unprotected());

        tx.fees = TxFees::AccessList { gas_price: None };
        tx.signature = Some(Signature {
            v: 2,
            r: [1; 32],
            s: [2; 32],
        });
        assert_eq!(tx.recovery_id(), None);
    }

    #[test]
    fn test_signers() {
        let a = Address::from_bytes(&[1; 20]).unwrap();
        let b = Address::from_bytes(&[2; 20]).unwrap();
        let tx = CosmosTx {
            messages: vec![
                CosmosMsg::Send {
                    from: a,
                    to: b,
                    amount: 1,
                },
                CosmosMsg::Other {
                    type_url: "/x".to_owned(),
                    signer: b,
                },
                CosmosMsg::Send {
                    from: a,
                    to: b,
                    amount: 2,
                },
            ],
            ..Default::default()
        };
        assert_eq!(tx.signers(), vec![a, b]);
        assert_eq!(tx.fee_payer(), Some(a));
        assert_ne!(tx.sign_bytes(1, 0), tx.sign_bytes(1, 1));
        assert_ne!(tx.sign_bytes(1, 0), tx.sign_bytes(2, 0));

        // An explicit fee payer must sign as well.
        let c = Address::from_bytes(&[3; 20]).unwrap();
        let mut paid = tx.clone();
        paid.fee.payer = Some(c);
        assert_eq!(paid.signers(), vec![a, b, c]);
        assert_eq!(paid.fee_payer(), Some(c));
        assert_ne!(paid.sign_bytes(1, 0), tx.sign_bytes(1, 0));

        paid.fee.payer = Some(b);
        assert_eq!(paid.signers(), vec![a, b]);
    }

    #[test]
    fn test_sign_bytes_bind_extensions() {
        let tx = CosmosTx {
            extension_options: vec![ExtensionOption::DynamicFeeTx {
                max_priority_price: BigInt::from(10),
            }],
            ..Default::default()
        };
        let mut raised = tx.clone();
        raised.extension_options = vec![ExtensionOption::DynamicFeeTx {
            max_priority_price: BigInt::from(11),
        }];
        assert_ne!(tx.sign_bytes(1, 0), raised.sign_bytes(1, 0));
        assert_ne!(tx.extensions_hash(), raised.extensions_hash());

        let web3 = |fee_payer_sig: Vec<u8>| CosmosTx {
            extension_options: vec![ExtensionOption::Web3Tx {
                typed_data_chain_id: 1,
                fee_payer: None,
                fee_payer_sig,
            }],
            ..Default::default()
        };
        assert_eq!(
            web3(vec![]).sign_bytes(1, 0),
            web3(vec![1, 2, 3]).sign_bytes(1, 0),
            "fee payer signature is not signed"
        );
        assert_eq!(
            ExtensionOption::Web3Tx {
                typed_data_chain_id: 1,
                fee_payer: None,
                fee_payer_sig: vec![],
            }
            .type_url(),
            EXTENSION_WEB3_TX
        );
    }

    #[test]
    #[should_panic(expected = "exceeds 256 bits")]
    fn test_oversized_numeric() {
        let value: BigInt = BigInt::from(1) << 256;
        ensure_numeric_width("amount", &value);
    }
}
