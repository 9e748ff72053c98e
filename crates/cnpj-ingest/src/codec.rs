//! Field codec for raw Receita Federal columns
//!
//! Pure functions applied to every column of every row. None of them fail:
//! anything that does not parse becomes `None`.

use chrono::NaiveDate;
use sqlx::types::BigDecimal;
use std::str::FromStr;

/// Trim, peel matching outer quote layers (`"` or `'`) and collapse runs of
/// double quotes into one. Empty results become `None`.
///
/// Applying it twice gives the same result as applying it once.
pub fn clean_field(raw: &str) -> Option<String> {
    let mut value = raw.trim();

    while value.len() >= 2 {
        let bytes = value.as_bytes();
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            value = value[1..value.len() - 1].trim();
        } else {
            break;
        }
    }

    if value.is_empty() {
        return None;
    }

    let mut cleaned = String::with_capacity(value.len());
    let mut previous_was_quote = false;
    for ch in value.chars() {
        let is_quote = ch == '"';
        if !(is_quote && previous_was_quote) {
            cleaned.push(ch);
        }
        previous_was_quote = is_quote;
    }

    Some(cleaned)
}

/// Parse a `YYYYMMDD` date. `"0"`, `"00000000"`, blanks and anything that is
/// not exactly eight digits forming a real calendar date yield `None`.
pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let value = raw?.trim();

    if value.len() != 8 || value == "00000000" || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let year: i32 = value[0..4].parse().ok()?;
    let month: u32 = value[4..6].parse().ok()?;
    let day: u32 = value[6..8].parse().ok()?;

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a decimal written with a comma separator (`"1234,56"`).
pub fn parse_decimal(raw: Option<&str>) -> Option<BigDecimal> {
    let value = raw?.trim();
    if value.is_empty() {
        return None;
    }
    BigDecimal::from_str(&value.replace(',', ".")).ok()
}
