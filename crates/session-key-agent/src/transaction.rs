//! Turning a payment intent into the opaque bytes that get signed.
//!
//! The signing path itself never looks inside these bytes. Hosts with a
//! chain-specific transaction format plug in their own
//! [`TransactionEncoder`]; [`CanonicalJsonEncoder`] is the default.

use data_encoding::HEXLOWER;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use session_key_crypto::{CryptoError, SessionPublicKey};

use crate::error::SessionKeyError;

/// Length of the random per-transaction reference.
pub const REFERENCE_LEN: usize = 16;

/// What the agent wants to pay, before encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Amount in USD.
    pub amount: f64,
    pub recipient: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl PaymentIntent {
    pub fn new(amount: f64, recipient: impl Into<String>) -> Self {
        Self {
            amount,
            recipient: recipient.into(),
            memo: None,
        }
    }

    #[must_use]
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// # Errors
    ///
    /// `Validation` for a non-positive or non-finite amount, or an empty
    /// recipient.
    pub fn validate(&self) -> Result<(), SessionKeyError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(CryptoError::Validation(format!(
                "amount must be a positive number, got {}",
                self.amount
            ))
            .into());
        }
        if self.recipient.trim().is_empty() {
            return Err(CryptoError::Validation("recipient must not be empty".into()).into());
        }
        Ok(())
    }
}

/// Encodes an intent signed by `payer` into message bytes.
pub trait TransactionEncoder: Send + Sync {
    /// # Errors
    ///
    /// Implementations return `Validation` for intents they cannot encode.
    fn encode(
        &self,
        intent: &PaymentIntent,
        payer: &SessionPublicKey,
    ) -> Result<Vec<u8>, SessionKeyError>;
}

/// Sorted-key JSON with a fresh random reference, so two signatures over
/// the same intent never cover identical bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJsonEncoder;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalTransaction<'a> {
    amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    memo: Option<&'a str>,
    payer: String,
    recipient: &'a str,
    reference: String,
}

impl TransactionEncoder for CanonicalJsonEncoder {
    fn encode(
        &self,
        intent: &PaymentIntent,
        payer: &SessionPublicKey,
    ) -> Result<Vec<u8>, SessionKeyError> {
        intent.validate()?;

        let mut reference = [0u8; REFERENCE_LEN];
        OsRng
            .try_fill_bytes(&mut reference)
            .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;

        let tx = CanonicalTransaction {
            amount: intent.amount,
            memo: intent.memo.as_deref(),
            payer: payer.to_base58(),
            recipient: intent.recipient.trim(),
            reference: HEXLOWER.encode(&reference),
        };
        // Round-trip through `Value` so keys come out sorted.
        let value = serde_json::to_value(&tx)
            .map_err(|e| CryptoError::Validation(format!("unencodable transaction: {e}")))?;
        serde_json::to_vec(&value)
            .map_err(|e| CryptoError::Validation(format!("unencodable transaction: {e}")).into())
    }
}
