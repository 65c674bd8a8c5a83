use std::fmt::{Display, Write};
use std::str::FromStr;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use super::{Value, ValueHandler};
use crate::config::HistoryConfig;
use crate::error::HistoryError;

const DATE_STORAGE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const TIMESTAMP_PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn mismatch(type_name: &str, value: &Value) -> anyhow::Error {
    HistoryError::invalid_value(type_name, &format!("{:?}", value)).into()
}

/// chrono reports an invalid format specifier only when the value is
/// written, so rendering falls back to the storage form instead of panicking.
fn render_or(formatted: impl Display, fallback: impl FnOnce() -> String) -> String {
    let mut out = String::new();
    match write!(out, "{}", formatted) {
        Ok(()) => out,
        Err(_) => fallback(),
    }
}

pub struct BooleanHandler {
    true_label: String,
    false_label: String,
}

impl BooleanHandler {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            true_label: config.true_label.clone(),
            false_label: config.false_label.clone(),
        }
    }
}

impl ValueHandler for BooleanHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Boolean(b) => Ok(b.to_string()),
            other => Err(mismatch("boolean", other)),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Value::Boolean(true)),
            "false" | "0" => Ok(Value::Boolean(false)),
            _ => Err(HistoryError::invalid_value("boolean", raw).into()),
        }
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::Boolean(true) => self.true_label.clone(),
            Value::Boolean(false) => self.false_label.clone(),
            other => other.to_string(),
        }
    }
}

pub struct IntegerHandler;

impl ValueHandler for IntegerHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Integer(i) => Ok(i.to_string()),
            other => Err(mismatch("integer", other)),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        raw.trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| HistoryError::invalid_value("integer", raw).into())
    }

    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

pub struct DecimalHandler;

impl ValueHandler for DecimalHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Decimal(d) => Ok(d.to_string()),
            other => Err(mismatch("decimal", other)),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(Value::Decimal)
            .map_err(|_| HistoryError::invalid_value("decimal", raw).into())
    }

    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

pub struct DateHandler {
    display_format: String,
}

impl DateHandler {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            display_format: config.date_format.clone(),
        }
    }
}

impl ValueHandler for DateHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Date(d) => Ok(d.format(DATE_STORAGE_FORMAT).to_string()),
            other => Err(mismatch("date", other)),
        }
    }

    /// Older rows store dates with a midnight time part, so full
    /// timestamps are accepted and truncated.
    fn deserialize(&self, raw: &str) -> Result<Value> {
        let trimmed = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_STORAGE_FORMAT) {
            return Ok(Value::Date(date));
        }
        parse_timestamp(trimmed)
            .map(|ts| Value::Date(ts.date()))
            .ok_or_else(|| HistoryError::invalid_value("date", raw).into())
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::Date(d) => render_or(d.format(&self.display_format), || {
                d.format(DATE_STORAGE_FORMAT).to_string()
            }),
            other => other.to_string(),
        }
    }
}

pub struct TimestampHandler {
    display_format: String,
}

impl TimestampHandler {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            display_format: config.timestamp_format.clone(),
        }
    }
}

/// Accepts the storage format, ISO-8601, a bare date (midnight) and epoch
/// milliseconds.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    for format in TIMESTAMP_PARSE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_STORAGE_FORMAT) {
        return date.and_hms_opt(0, 0, 0);
    }
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit() || c == '-') {
        let millis = raw.parse::<i64>().ok()?;
        return Utc.timestamp_millis_opt(millis).single().map(|dt| dt.naive_utc());
    }
    None
}

impl ValueHandler for TimestampHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Timestamp(ts) => Ok(ts.format(TIMESTAMP_STORAGE_FORMAT).to_string()),
            other => Err(mismatch("timestamp", other)),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        parse_timestamp(raw.trim())
            .map(Value::Timestamp)
            .ok_or_else(|| HistoryError::invalid_value("timestamp", raw).into())
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::Timestamp(ts) => render_or(ts.format(&self.display_format), || {
                ts.format(TIMESTAMP_STORAGE_FORMAT).to_string()
            }),
            other => other.to_string(),
        }
    }
}

/// Locales are kept as `language[_COUNTRY[_variant]]` tags; `-` separated
/// input is normalized.
pub struct LocaleHandler;

impl LocaleHandler {
    fn normalize(raw: &str) -> Option<String> {
        let mut parts = raw.trim().split(|c| c == '_' || c == '-');
        let language = parts.next()?;
        if !(2..=3).contains(&language.len()) || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let mut tag = language.to_ascii_lowercase();
        if let Some(country) = parts.next() {
            let valid = (country.len() == 2 && country.chars().all(|c| c.is_ascii_alphabetic()))
                || (country.len() == 3 && country.chars().all(|c| c.is_ascii_digit()));
            if !valid {
                return None;
            }
            tag.push('_');
            tag.push_str(&country.to_ascii_uppercase());
        }
        let variant: Vec<&str> = parts.collect();
        if !variant.is_empty() {
            tag.push('_');
            tag.push_str(&variant.join("_"));
        }
        Some(tag)
    }
}

impl ValueHandler for LocaleHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        match value {
            Value::Locale(tag) => Self::normalize(tag)
                .ok_or_else(|| HistoryError::invalid_value("locale", tag).into()),
            other => Err(mismatch("locale", other)),
        }
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        Self::normalize(raw)
            .map(Value::Locale)
            .ok_or_else(|| HistoryError::invalid_value("locale", raw).into())
    }

    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

/// Treats the stored string as opaque text. Also the fallback for type
/// names without a registered handler.
pub struct TextHandler;

impl ValueHandler for TextHandler {
    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Text(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        Ok(Value::Text(raw.to_string()))
    }

    fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}
