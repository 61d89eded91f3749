use rust_decimal::{Decimal, prelude::ToPrimitive};

const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

const THREE_DECIMAL_CURRENCIES: [&str; 5] = ["BHD", "JOD", "KWD", "OMR", "TND"];

/// Upper-cases and checks a 3-letter ISO-4217 style code.
pub fn normalize_currency(value: &str) -> anyhow::Result<String> {
    let normalized = value.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        anyhow::bail!("currency is required");
    }
    if normalized.len() != 3 || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        anyhow::bail!("currency must be a 3-letter code");
    }
    Ok(normalized)
}

/// Number of decimal places of the currency's minor unit.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let code = currency.to_ascii_uppercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Converts a major-unit amount to an integer count of minor units.
///
/// Returns `None` when the conversion would need rounding or overflows.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let scale = Decimal::from(10_i64.pow(minor_unit_exponent(currency)));
    let scaled = amount.checked_mul(scale)?;
    if !scaled.fract().is_zero() {
        return None;
    }
    scaled.trunc().to_i64()
}
