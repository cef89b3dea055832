//! Tanzanian mobile number normalization and provider-to-channel mapping.
//!
//! Subscribers type their number however their handset shows it. The
//! gateway is pickier, and different gateway deployments have accepted
//! different formats over time, so each helper reduces its input to the
//! 9-digit subscriber core and derives one wire format from it.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::Channel;

pub const COUNTRY_CODE: &str = "255";

/// Provider labels seen in checkout requests, matched case-insensitively
/// as substrings. Unknown labels are not an error; the attempt engine
/// simply proceeds without a channel hint.
const CHANNEL_ALIASES: &[(&str, Channel)] = &[
    ("vodacom", Channel::Mpesa),
    ("m-pesa", Channel::Mpesa),
    ("mpesa", Channel::Mpesa),
    ("tigo", Channel::TigoPesa),
    ("mixx", Channel::TigoPesa),
    ("yas", Channel::TigoPesa),
    ("airtel", Channel::AirtelMoney),
    ("halotel", Channel::HaloPesa),
    ("halopesa", Channel::HaloPesa),
    ("azam", Channel::AzamPesa),
];

/// Reduces any accepted input shape to the 9-digit subscriber core.
///
/// Accepted shapes (separators such as spaces, hyphens and dots are
/// tolerated):
/// - local `0XXXXXXXXX` (10 digits)
/// - bare subscriber `XXXXXXXXX` (9 digits)
/// - country-coded `255XXXXXXXXX` (12 digits)
/// - plus-prefixed `+255XXXXXXXXX`
fn subscriber_core(raw: &str) -> PaymentResult<String> {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

    if has_plus {
        // A plus prefix commits the caller to the international form.
        if digits.len() == 12 && digits.starts_with(COUNTRY_CODE) {
            return Ok(digits[COUNTRY_CODE.len()..].to_string());
        }
        return Err(invalid_phone(raw));
    }

    match digits.len() {
        10 if digits.starts_with('0') => Ok(digits[1..].to_string()),
        9 if !digits.starts_with('0') => Ok(digits),
        12 if digits.starts_with(COUNTRY_CODE) => {
            Ok(digits[COUNTRY_CODE.len()..].to_string())
        }
        _ => Err(invalid_phone(raw)),
    }
}

fn invalid_phone(raw: &str) -> PaymentError {
    PaymentError::InvalidPhoneFormat {
        supplied: raw.trim().to_string(),
    }
}

/// Canonical local form `0XXXXXXXXX`, the format sessions are stored with.
pub fn normalize_local(raw: &str) -> PaymentResult<String> {
    let core = subscriber_core(raw)?;
    Ok(format!("0{core}"))
}

/// Country-coded form `255XXXXXXXXX`.
///
/// Deliberately more lenient than [`normalize_local`]: the last 9
/// significant digits are taken as the subscriber, so inputs carrying a
/// foreign prefix or stray leading digits still resolve to a dialable
/// form. Fails only when fewer than 9 digits are present.
pub fn to_country_code(raw: &str) -> PaymentResult<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 9 {
        return Err(invalid_phone(raw));
    }
    let core = &digits[digits.len() - 9..];
    Ok(format!("{COUNTRY_CODE}{core}"))
}

/// Plus-prefixed international form `+255XXXXXXXXX`, same last-9-digits
/// rule as [`to_country_code`].
pub fn to_plus_country_code(raw: &str) -> PaymentResult<String> {
    let cc = to_country_code(raw)?;
    Ok(format!("+{cc}"))
}

/// All wire formats for one number, in the order the attempt engine
/// tries them: local first, then country-coded, then plus-prefixed.
/// Forms that cannot be derived from the input are skipped; it is an
/// error only when no form at all can be derived.
pub fn phone_variants(raw: &str) -> PaymentResult<Vec<String>> {
    let mut variants: Vec<String> = Vec::with_capacity(3);
    for form in [
        normalize_local(raw),
        to_country_code(raw),
        to_plus_country_code(raw),
    ] {
        if let Ok(value) = form {
            if !variants.contains(&value) {
                variants.push(value);
            }
        }
    }
    if variants.is_empty() {
        return Err(invalid_phone(raw));
    }
    Ok(variants)
}

/// Maps a free-text provider label to a gateway channel hint.
pub fn map_provider_to_channel(label: &str) -> Option<Channel> {
    let needle = label.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    CHANNEL_ALIASES
        .iter()
        .find(|(alias, _)| needle.contains(alias))
        .map(|(_, channel)| *channel)
}

/// Redacts the middle of a phone number for logs.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 5 {
        return "*".repeat(chars.len());
    }
    let mut masked = String::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        if i < 3 || i >= chars.len() - 2 {
            masked.push(*c);
        } else {
            masked.push('*');
        }
    }
    masked
}
