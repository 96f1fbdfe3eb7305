//! Master key material and deterministic script derivation
//!
//! A master key is 32 bytes of secret entropy plus a fixed chain code.
//! Per-payment keys are expanded from it with HKDF-SHA512, keyed by the
//! derivation path string, and turned into pay-to-pubkey-hash locking
//! scripts. The same (key, path) pair always yields the same script;
//! distinct paths yield distinct scripts.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use super::hashing;
use crate::errors::{Error, Result};
use crate::utils::current_timestamp;

/// Master key material from which payment scripts derive.
///
/// The secret and chain code never leave the daemon; only locking scripts
/// derived from them are handed to payers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterKey {
    /// Key name, referenced by the script-key ledger
    pub name: String,

    /// Secret entropy
    pub secret: [u8; 32],

    /// Derivation salt, fixed at generation time
    pub chain_code: [u8; 32],

    /// Unix timestamp of key creation
    pub created_at: i64,
}

impl MasterKey {
    /// Generate a new master key from the operating system RNG.
    pub fn generate(name: &str) -> Self {
        let mut secret = [0u8; 32];
        let mut chain_code = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        OsRng.fill_bytes(&mut chain_code);
        Self {
            name: name.to_string(),
            secret,
            chain_code,
            created_at: current_timestamp(),
        }
    }
}

/// Derives locking scripts from master key material.
///
/// Seam for tests; the production implementation is [`WalletKeychain`].
pub trait KeyDeriver: Send + Sync {
    /// Derive the hex-encoded P2PKH locking script for `path` under `master`.
    fn derive_locking_script(&self, master: &MasterKey, path: &str) -> Result<String>;
}

/// Deterministic keychain over secp256k1.
pub struct WalletKeychain {
    secp: Secp256k1<secp256k1::All>,
}

impl WalletKeychain {
    pub fn new() -> Self {
        Self {
            secp: Secp256k1::new(),
        }
    }

    /// Derive the secret key for a derivation path.
    ///
    /// HKDF output is re-expanded with a widened info block in the
    /// statistically unreachable case where it falls outside the secp256k1
    /// field.
    fn derive_secret_key(&self, master: &MasterKey, path: &str) -> Result<SecretKey> {
        let hk = Hkdf::<Sha512>::new(Some(&master.chain_code), &master.secret);
        let mut okm = [0u8; 32];
        for attempt in 0u8..4 {
            let mut info = path.as_bytes().to_vec();
            if attempt > 0 {
                info.push(attempt);
            }
            hk.expand(&info, &mut okm).map_err(|e| {
                Error::dependency("derive key", path, anyhow::anyhow!("hkdf expand: {}", e))
            })?;
            if let Ok(key) = SecretKey::from_slice(&okm) {
                return Ok(key);
            }
        }
        Err(Error::dependency(
            "derive key",
            path,
            anyhow::anyhow!("derived material never formed a valid secret key"),
        ))
    }

    /// Compressed public key for a derivation path.
    pub fn derive_public_key(&self, master: &MasterKey, path: &str) -> Result<PublicKey> {
        let secret = self.derive_secret_key(master, path)?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret))
    }
}

impl Default for WalletKeychain {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDeriver for WalletKeychain {
    fn derive_locking_script(&self, master: &MasterKey, path: &str) -> Result<String> {
        let pubkey = self.derive_public_key(master, path)?;
        Ok(p2pkh_script(&pubkey))
    }
}

/// Build the P2PKH locking script for a compressed public key.
///
/// OP_DUP OP_HASH160 <pubkey hash> OP_EQUALVERIFY OP_CHECKSIG, hex encoded.
pub fn p2pkh_script(pubkey: &PublicKey) -> String {
    let pubkey_hash = hashing::hash160(&pubkey.serialize());
    format!("76a914{}88ac", hex::encode(pubkey_hash))
}
