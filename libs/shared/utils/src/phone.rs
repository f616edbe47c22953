//! Phone normalization.
//!
//! The Clinic System wants local Swiss numbers (`0791234567`) while the CRM
//! wants E.164 (`+41791234567`). The two normalizers below have different
//! contracts and are deliberately kept apart; `phone_match_key` is the
//! comparison key used by the matching engine.

use tracing::warn;

/// Clinic-facing normalization to local Swiss format.
///
/// Strips everything except digits and `+`, drops a leading `+`, strips a
/// leading `41` country code and makes sure the result starts with `0`.
pub fn normalize_clinic_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    let mut phone = cleaned.strip_prefix('+').unwrap_or(&cleaned).to_string();

    if let Some(rest) = phone.strip_prefix("41") {
        phone = rest.to_string();
    }

    if !phone.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if !phone.starts_with('0') {
        phone.insert(0, '0');
    }

    Some(phone)
}

/// CRM-facing normalization to E.164-ish format.
///
/// Returns `None` when the number cannot be cleaned confidently; callers omit
/// the field instead of sending a guess.
pub fn validate_and_clean_phone(raw: &str) -> Option<String> {
    let phone: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    if phone.is_empty() {
        return None;
    }

    if let Some(rest) = phone.strip_prefix('+') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return Some(phone);
        }
        warn!("Phone number has non-digit characters after '+': {}", phone);
        return None;
    }

    if let Some(rest) = phone.strip_prefix("00") {
        return Some(format!("+{}", rest));
    }

    let len = phone.chars().count();

    if phone.starts_with("41") && len >= 10 {
        return Some(format!("+{}", phone));
    }

    if let Some(rest) = phone.strip_prefix('0') {
        if len >= 10 {
            return Some(format!("+41{}", rest));
        }
    }

    if len >= 10 && phone.chars().all(|c| c.is_ascii_digit()) {
        return Some(phone);
    }

    warn!("Phone number format may be invalid: {}", phone);
    None
}

/// Digit-only Swiss local key for comparing phones across both systems.
/// `+41` and `0041` prefixes collapse to a leading `0`.
pub fn phone_match_key(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    let international = match cleaned.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => cleaned,
    };

    normalize_clinic_phone(&international)
        .map(|local| local.chars().filter(|c| c.is_ascii_digit()).collect())
}
