//! Wallet key management
//!
//! Holds master key material and derives per-payment P2PKH locking scripts
//! from it. Nothing in this module touches the network; signing is out of
//! scope because the daemon only ever receives funds.

pub mod hashing;
pub mod keys;

pub use keys::{p2pkh_script, KeyDeriver, MasterKey, WalletKeychain};
