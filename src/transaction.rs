//! Legacy (EIP-155) transaction encoding
//!
//! Only the pieces the launcher needs: the signing payload, the raw signed
//! encoding broadcast to the network, and the resulting transaction hash.

use crate::errors::{LaunchError, LaunchResult};
use rlp::RlpStream;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};

/// Unsigned legacy transaction. Every field is covered by the signature,
/// so nonce and gas must be final before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

/// Recoverable secp256k1 signature over a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl TransactionSignature {
    /// `r || s || recovery_id`
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.recovery_id;
        out
    }

    /// EIP-155 `v` for the given chain
    pub fn v(&self, chain_id: u64) -> u64 {
        chain_id * 2 + 35 + u64::from(self.recovery_id)
    }
}

impl LegacyTransaction {
    fn append_body(&self, s: &mut RlpStream) {
        s.append(&self.nonce);
        s.append(&trim_be(&self.gas_price.to_be_bytes()));
        s.append(&self.gas_limit);
        s.append(&self.to.to_vec());
        s.append(&trim_be(&self.value.to_be_bytes()));
        s.append(&self.data);
    }

    /// RLP of the nine-field EIP-155 signing payload
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(9);
        self.append_body(&mut s);
        s.append(&self.chain_id);
        s.append(&0u8);
        s.append(&0u8);
        s.out().to_vec()
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256(&self.signing_payload())
    }

    /// Raw signed transaction ready for `eth_sendRawTransaction`
    pub fn encode_signed(&self, signature: &TransactionSignature) -> Vec<u8> {
        let mut s = RlpStream::new_list(9);
        self.append_body(&mut s);
        s.append(&signature.v(self.chain_id));
        s.append(&trim_be(&signature.r));
        s.append(&trim_be(&signature.s));
        s.out().to_vec()
    }
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

/// `0x`-prefixed hash of a raw signed transaction
pub fn transaction_hash(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(keccak256(raw)))
}

/// Decode a canonical `0x` + 40 hex address
pub fn parse_address(address: &str) -> LaunchResult<[u8; 20]> {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| LaunchError::invalid_argument(format!("address {} lacks 0x", address)))?;
    let bytes = hex::decode(digits)
        .map_err(|e| LaunchError::invalid_argument(format!("address {}: {}", address, e)))?;
    bytes
        .try_into()
        .map_err(|_| LaunchError::invalid_argument(format!("address {} is not 20 bytes", address)))
}

/// Whole-wei amount from a stored decimal
pub fn decimal_to_wei(field: &str, amount: &Decimal) -> LaunchResult<u128> {
    if !amount.fract().is_zero() || amount.is_sign_negative() {
        return Err(LaunchError::invalid_argument(format!(
            "{} {} is not a whole wei amount",
            field, amount
        )));
    }
    amount
        .trunc()
        .to_u128()
        .ok_or_else(|| LaunchError::invalid_argument(format!("{} {} out of range", field, amount)))
}

fn trim_be(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
