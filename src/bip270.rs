//! BIP-270 protocol types
//!
//! Wire documents exchanged with payers: the payment request issued for an
//! invoice, the submitted payment, and the acknowledgement returned for it.
//! Field names follow the protocol's camelCase JSON. None of these values
//! are persisted; only their effects are.

use serde::{Deserialize, Serialize};

/// A payment request bound to derived locking scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// Network the request is valid on (mainnet, testnet, regtest, signet)
    pub network: String,

    /// Outputs the settlement transaction must pay
    pub outputs: Vec<Output>,

    /// Unix timestamp the request was created
    pub creation_timestamp: i64,

    /// Unix timestamp the request stops being honored
    pub expiration_timestamp: i64,

    /// Where the settlement transaction should be submitted
    pub payment_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_data: Option<MerchantData>,
}

/// One requested output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Amount in satoshis
    pub amount: u64,

    /// Hex-encoded locking script
    pub script: String,

    #[serde(default)]
    pub description: String,
}

/// Static merchant metadata surfaced to payers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
}

/// A submitted settlement payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Hex-encoded signed transaction
    pub transaction: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_data: Option<String>,

    /// Script or address for refunds, relayed but unused by this daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_to: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,
}

/// Acknowledgement returned once per settlement attempt.
///
/// Error code 0 with success "true" is acceptance; code 1 is a definitive
/// rejection explained by the memo, never retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAck {
    /// The submitted payment, echoed back
    pub payment: Payment,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memo: String,

    #[serde(default)]
    pub error: u32,

    /// "true" or "false" as a string, per the protocol
    pub success: String,
}

impl PaymentAck {
    /// Acceptance acknowledgement echoing the submitted payment.
    pub fn accepted(payment: Payment) -> Self {
        Self {
            payment,
            memo: String::new(),
            error: 0,
            success: "true".to_string(),
        }
    }

    /// Definitive rejection with an explanatory memo.
    pub fn rejected(payment: Payment, memo: impl Into<String>) -> Self {
        Self {
            payment,
            memo: memo.into(),
            error: 1,
            success: "false".to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.error == 0 && self.success == "true"
    }
}
