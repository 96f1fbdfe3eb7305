//! payhost - a non-custodial BIP-270 payment daemon.
//!
//! The daemon issues payment requests whose outputs pay P2PKH locking
//! scripts derived from a named master key, records every issued script in
//! a durable ledger, and validates submitted settlement transactions
//! against that ledger. It never holds funds and never signs; it only
//! derives destinations and verifies that payers funded them.
//!
//! ## Layout
//!
//! - [`bip270`]: protocol wire types (payment request, payment, ack)
//! - [`codec`]: raw transaction decoding
//! - [`wallet`]: master keys and script derivation
//! - [`storage`]: durable invoice/script/transaction trees
//! - [`payment`]: request issuance and settlement strategies
//! - [`api`]: the HTTP surface
//! - [`daemon`]: wiring it all together

pub mod api;
pub mod bip270;
pub mod codec;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod payment;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use config::Config;
pub use daemon::PaymentHost;
pub use errors::{Error, Result};
