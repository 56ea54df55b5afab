//! Cell text cleanup and typed coercion

use chrono::format::ParseErrorKind;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use super::{ColumnSpec, ColumnType, Value};
use crate::error::ExtractError;

/// Characters that would corrupt downstream storage
const STORAGE_UNSAFE: [char; 3] = ['\\', '\'', '"'];

/// Thousands separators, percent signs and currency symbols
const NUMERIC_NOISE: [char; 6] = [',', '%', '$', '€', '£', '¥'];

/// Trim the raw cell text and drop storage-unsafe characters
pub fn clean_text(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !STORAGE_UNSAFE.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Drop separators and symbols so the text can be parsed as a number
pub fn strip_numeric(text: &str) -> String {
    text.chars()
        .filter(|c| !NUMERIC_NOISE.contains(c) && !c.is_whitespace())
        .collect()
}

/// Parse an integer; a float with no fractional part is accepted too
pub fn parse_integer(text: &str) -> Option<i64> {
    let digits = strip_numeric(text);
    if let Ok(n) = digits.parse::<i64>() {
        return Some(n);
    }
    let n = digits.parse::<f64>().ok().filter(|n| n.is_finite())?;
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

pub fn parse_float(text: &str) -> Option<f64> {
    strip_numeric(text)
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parse with a strftime format. Formats carrying a time of day produce
/// `Value::DateTime`, date-only formats produce `Value::Date`.
pub fn parse_date(text: &str, format: &str) -> Result<Value, chrono::ParseError> {
    match NaiveDateTime::parse_from_str(text, format) {
        Ok(dt) => Ok(Value::DateTime(dt)),
        Err(e) if e.kind() == ParseErrorKind::NotEnough => {
            NaiveDate::parse_from_str(text, format).map(Value::Date)
        }
        Err(e) => Err(e),
    }
}

/// Coerce cleaned, non-empty cell text into the column's type
pub(crate) fn coerce(column: &ColumnSpec, text: &str) -> Result<Value, ExtractError> {
    let value = match &column.kind {
        ColumnType::Text | ColumnType::Link { .. } => Value::Text(text.to_string()),
        ColumnType::Integer => parse_integer(text).map_or(Value::Null, Value::Integer),
        ColumnType::Float => parse_float(text).map_or(Value::Null, Value::Float),
        ColumnType::Date { format } => {
            parse_date(text, format).map_err(|source| ExtractError::DateParse {
                column: column.name.clone(),
                raw: text.to_string(),
                format: format.clone(),
                source,
            })?
        }
    };

    if value.is_null() {
        debug!(column = %column.name, raw = %text, "non-numeric cell degraded to NULL");
    }
    Ok(value)
}
