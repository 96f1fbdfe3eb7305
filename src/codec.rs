//! Raw transaction decoding
//!
//! Parses hex-encoded signed transactions in the legacy wire format
//! (version, inputs, outputs, locktime with CompactSize counts) into an
//! ordered output list. Settlement validation only needs the outputs and
//! the transaction id; inputs are walked but not retained.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wallet::hashing::double_sha256;

/// Errors produced while decoding a settlement transaction.
///
/// These are definitive for the submitted payload: the settlement layer
/// reports them to the payer as a rejected acknowledgement, not as a
/// service fault.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("transaction is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("transaction truncated while reading {0}")]
    Truncated(&'static str),

    #[error("transaction has no inputs")]
    EmptyInputs,

    #[error("{0} count {1} exceeds what the payload can hold")]
    ImplausibleCount(&'static str, u64),

    #[error("{0} trailing bytes after transaction end")]
    TrailingBytes(usize),
}

/// One parsed transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedOutput {
    /// Value in satoshis
    pub satoshis: u64,

    /// Hex-encoded locking script
    pub locking_script: String,
}

/// A parsed settlement transaction.
#[derive(Debug, Clone)]
pub struct DecodedTx {
    /// Transaction id (reversed double SHA256 of the raw bytes), hex encoded
    pub tx_id: String,

    /// Outputs in wire order
    pub outputs: Vec<DecodedOutput>,
}

/// Parses hex-encoded signed transactions into their outputs.
///
/// Seam for tests; the production implementation is [`RawTxDecoder`].
pub trait TxDecoder: Send + Sync {
    fn decode(&self, raw_hex: &str) -> Result<DecodedTx, DecodeError>;
}

/// Decoder for the legacy (pre-segwit) transaction wire format.
pub struct RawTxDecoder;

impl TxDecoder for RawTxDecoder {
    fn decode(&self, raw_hex: &str) -> Result<DecodedTx, DecodeError> {
        let bytes = hex::decode(raw_hex.trim())?;
        let mut reader = ByteReader::new(&bytes);

        reader.read_u32_le("version")?;

        let input_count = reader.read_varint("input count")?;
        if input_count == 0 {
            // Also rejects segwit-marked payloads, which this format does
            // not carry.
            return Err(DecodeError::EmptyInputs);
        }
        // Every input occupies at least 41 bytes on the wire.
        if input_count > (reader.remaining() / 41) as u64 {
            return Err(DecodeError::ImplausibleCount("input", input_count));
        }
        for _ in 0..input_count {
            reader.take(32, "input outpoint txid")?;
            reader.read_u32_le("input outpoint index")?;
            let script_len = reader.read_varint("input script length")?;
            reader.take_var(script_len, "input script")?;
            reader.read_u32_le("input sequence")?;
        }

        let output_count = reader.read_varint("output count")?;
        // Every output occupies at least 9 bytes on the wire.
        if output_count > (reader.remaining() / 9) as u64 {
            return Err(DecodeError::ImplausibleCount("output", output_count));
        }
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let satoshis = reader.read_u64_le("output value")?;
            let script_len = reader.read_varint("output script length")?;
            let script = reader.take_var(script_len, "output script")?;
            outputs.push(DecodedOutput {
                satoshis,
                locking_script: hex::encode(script),
            });
        }

        reader.read_u32_le("locktime")?;

        if reader.remaining() > 0 {
            return Err(DecodeError::TrailingBytes(reader.remaining()));
        }

        Ok(DecodedTx {
            tx_id: txid_hex(&bytes),
            outputs,
        })
    }
}

/// Transaction id: double SHA256 of the raw bytes, displayed byte-reversed.
pub fn txid_hex(raw: &[u8]) -> String {
    let mut hash = double_sha256(raw);
    hash.reverse();
    hex::encode(hash)
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated(what));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Length-checked take for untrusted varint lengths.
    fn take_var(&mut self, n: u64, what: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() as u64 {
            return Err(DecodeError::Truncated(what));
        }
        self.take(n as usize, what)
    }

    fn read_u32_le(&mut self, what: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64_le(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Bitcoin CompactSize variable-length integer.
    fn read_varint(&mut self, what: &'static str) -> Result<u64, DecodeError> {
        let tag = self.take(1, what)?[0];
        Ok(match tag {
            0xfd => {
                let b = self.take(2, what)?;
                u16::from_le_bytes([b[0], b[1]]) as u64
            }
            0xfe => self.read_u32_le(what)? as u64,
            0xff => self.read_u64_le(what)?,
            n => n as u64,
        })
    }
}
