use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

/// Grouped thousands (`1.234`) or a bare integer part, then up to two decimals after a comma.
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d{1,3}(?:\.\d{3})+|\d+)(?:,\d{1,2})?$").unwrap());

/// Decimal places every stored price carries.
pub const PRICE_SCALE: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty amount")]
    Empty,
    #[error("malformed amount {0:?}")]
    Malformed(String),
    #[error("amount {0:?} out of range")]
    OutOfRange(String),
}

/// Parse a pt-BR formatted amount (`"R$ 1.234,56"`, `"50,00"`, `"1.000"`) into a 2dp `Decimal`.
pub fn parse_locale_currency(text: &str) -> Result<Decimal, ParseError> {
    let raw = text.trim();
    let raw = raw.strip_prefix("R$").unwrap_or(raw).trim();
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }
    if !AMOUNT_RE.is_match(raw) {
        return Err(ParseError::Malformed(raw.to_string()));
    }

    let canonical = raw.replace('.', "").replace(',', ".");
    let mut value =
        Decimal::from_str(&canonical).map_err(|_| ParseError::OutOfRange(raw.to_string()))?;
    value.rescale(PRICE_SCALE);
    Ok(value)
}

/// Render a price the way the reports print it: `R$ 1.234,56`.
pub fn format_locale_currency(value: Decimal) -> String {
    let mut value = value.round_dp(PRICE_SCALE);
    value.rescale(PRICE_SCALE);
    let text = value.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if value.is_sign_negative() && !value.is_zero() { "-" } else { "" };
    format!("R$ {}{},{}", sign, grouped, frac_part)
}
