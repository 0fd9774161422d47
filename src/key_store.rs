//! Key management and signing boundary
//!
//! The key mapping is built once at startup and is read-only afterwards.
//! Secret material never leaves this module: callers only ever see the
//! signature of a fully populated transaction.

use crate::errors::{LaunchError, LaunchResult};
use crate::transaction::{keccak256, LegacyTransaction, TransactionSignature};
use async_trait::async_trait;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Signing interface used by the dispatcher
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Whether `address` has a managed key
    fn contains(&self, address: &str) -> bool;

    /// Managed addresses, lowercase
    fn addresses(&self) -> Vec<String>;

    /// Sign `transaction` with the key of `from`.
    ///
    /// Fails with [`LaunchError::NoSuchKey`] for unmanaged senders and
    /// [`LaunchError::SigningFailed`] when the signing library misbehaves.
    async fn sign(
        &self,
        from: &str,
        transaction: &LegacyTransaction,
    ) -> LaunchResult<TransactionSignature>;
}

/// In-process secp256k1 key store
pub struct LocalKeyStore {
    keys: HashMap<String, SecretKey>,
    secp: Secp256k1<All>,
}

impl LocalKeyStore {
    /// Build from a comma separated list of hex private keys.
    ///
    /// Entries that fail to parse are skipped with a warning naming only
    /// their position in the list.
    pub fn from_key_list(raw: &str) -> Self {
        let secp = Secp256k1::new();
        let mut keys = HashMap::new();

        for (idx, entry) in raw.split(',').enumerate() {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match parse_secret_key(entry) {
                Some(secret) => {
                    let address = address_of(&secp, &secret);
                    info!(address = %address, "parse private key success");
                    keys.insert(address, secret);
                }
                None => {
                    warn!(index = idx, "parse private key fail, skipping entry");
                }
            }
        }

        Self { keys, secp }
    }

    /// Build from already-decoded secret keys
    pub fn from_secret_keys(secrets: impl IntoIterator<Item = SecretKey>) -> Self {
        let secp = Secp256k1::new();
        let keys = secrets
            .into_iter()
            .map(|secret| (address_of(&secp, &secret), secret))
            .collect();
        Self { keys, secp }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    fn contains(&self, address: &str) -> bool {
        self.keys.contains_key(&address.to_ascii_lowercase())
    }

    fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    async fn sign(
        &self,
        from: &str,
        transaction: &LegacyTransaction,
    ) -> LaunchResult<TransactionSignature> {
        let address = from.to_ascii_lowercase();
        let secret = self
            .keys
            .get(&address)
            .ok_or_else(|| LaunchError::NoSuchKey(address.clone()))?;

        let message = Message::from_digest(transaction.signing_hash());
        let signature = self.secp.sign_ecdsa_recoverable(&message, secret);

        // The recovered signer must be the requested account.
        let recovered = self
            .secp
            .recover_ecdsa(&message, &signature)
            .map_err(|e| LaunchError::SigningFailed(e.to_string()))?;
        if address_of_public(&recovered) != address {
            return Err(LaunchError::SigningFailed(format!(
                "signature for {} does not recover to the signing account",
                address
            )));
        }

        debug!(from = %address, nonce = transaction.nonce, "transaction signed");
        Ok(split_signature(&signature))
    }
}

impl Drop for LocalKeyStore {
    fn drop(&mut self) {
        for secret in self.keys.values_mut() {
            secret.non_secure_erase();
        }
    }
}

impl std::fmt::Debug for LocalKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyStore")
            .field("addresses", &self.addresses())
            .finish()
    }
}

fn parse_secret_key(entry: &str) -> Option<SecretKey> {
    let digits = entry.strip_prefix("0x").unwrap_or(entry);
    let bytes = Zeroizing::new(hex::decode(digits).ok()?);
    SecretKey::from_slice(&bytes).ok()
}

fn split_signature(signature: &RecoverableSignature) -> TransactionSignature {
    let (recovery_id, compact): (RecoveryId, [u8; 64]) = signature.serialize_compact();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    TransactionSignature {
        r,
        s,
        recovery_id: recovery_id.to_i32() as u8,
    }
}

/// Lowercase `0x` address controlled by `secret`
pub fn address_of(secp: &Secp256k1<All>, secret: &SecretKey) -> String {
    address_of_public(&PublicKey::from_secret_key(secp, secret))
}

fn address_of_public(public: &PublicKey) -> String {
    let uncompressed = public.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}
