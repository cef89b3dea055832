//! Deterministic transaction references.
//!
//! The same checkout submitted twice must land on the same transaction
//! reference, because the reference is the join key between payment
//! sessions, gateway callbacks and orders. References are derived from a
//! canonical fingerprint of the request rather than generated randomly.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{Channel, OrderIntent};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// First 24 hex characters of the SHA-256 digest, uppercased. Short
/// enough for gateway order-id limits, long enough that collisions are
/// not a practical concern.
pub const REFERENCE_LENGTH: usize = 24;

#[derive(Serialize)]
struct FingerprintLine {
    product_id: i64,
    quantity: i32,
}

/// Fields are declared in alphabetical order so the JSON encoding is
/// canonical by construction.
#[derive(Serialize)]
struct FingerprintMaterial<'a> {
    amount: i64,
    channel: String,
    currency: &'a str,
    items: Vec<FingerprintLine>,
    phone: &'a str,
    user_id: String,
}

/// Builds the canonical fingerprint of a checkout request.
///
/// `phone_country` must already be the country-coded form so that the
/// same subscriber fingerprinted from different input shapes collapses
/// to one value. The channel slot falls back to the lowercased provider
/// label when no channel resolved, so requests against two unrecognized
/// networks stay distinct. Item order in the cart does not matter.
pub fn fingerprint(
    user_id: Uuid,
    amount: i64,
    currency: &str,
    phone_country: &str,
    channel: Option<Channel>,
    provider: &str,
    intent: &OrderIntent,
) -> PaymentResult<String> {
    let mut items: Vec<FingerprintLine> = intent
        .items
        .iter()
        .map(|item| FingerprintLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    items.sort_by_key(|line| (line.product_id, line.quantity));

    let material = FingerprintMaterial {
        amount,
        channel: match channel {
            Some(c) => c.as_str().to_string(),
            None => provider.trim().to_lowercase(),
        },
        currency,
        items,
        phone: phone_country,
        user_id: user_id.to_string(),
    };

    serde_json::to_string(&material).map_err(|e| PaymentError::SerializationError {
        message: format!("fingerprint encoding failed: {e}"),
    })
}

/// Hashes arbitrary key material into a transaction reference.
pub fn derive_reference(key_material: &str) -> String {
    let digest = Sha256::digest(key_material.as_bytes());
    hex::encode(digest)[..REFERENCE_LENGTH].to_uppercase()
}

/// Resolves the transaction reference for a request.
///
/// A non-empty client-supplied idempotency key wins over the content
/// fingerprint; otherwise the fingerprint is hashed.
pub fn transaction_reference(
    explicit_key: Option<&str>,
    user_id: Uuid,
    amount: i64,
    currency: &str,
    phone_country: &str,
    channel: Option<Channel>,
    provider: &str,
    intent: &OrderIntent,
) -> PaymentResult<String> {
    if let Some(key) = explicit_key {
        let key = key.trim();
        if !key.is_empty() {
            return Ok(derive_reference(key));
        }
    }
    let material = fingerprint(
        user_id,
        amount,
        currency,
        phone_country,
        channel,
        provider,
        intent,
    )?;
    Ok(derive_reference(&material))
}
