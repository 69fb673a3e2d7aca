//! Snapshot Normalizer: strips observer noise and coerces raw strings into
//! typed scalars and lists. Pure functions only.

use serde::{Deserialize, Serialize};
use serde_json::Number;

use super::{FieldValue, Snapshot};

/// Longest digit run still treated as a number. Longer runs are serials or
/// tokens and stay text.
const MAX_INTEGER_DIGITS: usize = 15;

/// A field value exactly as the observer read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Checked(bool),
    Text(String),
    Multi(Vec<String>),
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Checked(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawField {
    pub key: String,
    pub value: RawValue,
}

impl RawField {
    pub fn new(key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Normalizes a batch of raw reads. Fields whose key is blank after cleaning
/// are dropped; on duplicate keys the last read wins.
pub fn normalize_fields<I>(fields: I) -> Snapshot
where
    I: IntoIterator<Item = RawField>,
{
    let mut snapshot = Snapshot::new();
    for field in fields {
        let Some(key) = normalize_key(&field.key) else {
            continue;
        };
        snapshot.insert(key, normalize_value(&field.value));
    }
    snapshot
}

pub fn normalize_key(key: &str) -> Option<String> {
    let cleaned = clean_text(key);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

pub fn normalize_value(raw: &RawValue) -> FieldValue {
    match raw {
        RawValue::Checked(flag) => FieldValue::Bool(*flag),
        RawValue::Text(text) => coerce_scalar(&clean_text(text)),
        RawValue::Multi(items) => {
            // Multi-selects report options in render order, which is not stable
            // across polls.
            let mut cleaned: Vec<String> = items
                .iter()
                .map(|item| clean_text(item))
                .filter(|item| !item.is_empty())
                .collect();
            cleaned.sort();
            cleaned.dedup();
            FieldValue::List(cleaned)
        }
    }
}

/// Drops control and zero-width characters, trims, and collapses whitespace runs.
fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        match ch {
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
            c if c.is_whitespace() => pending_space = !out.is_empty(),
            c if c.is_control() => {}
            c => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }
    out
}

fn coerce_scalar(text: &str) -> FieldValue {
    if text.eq_ignore_ascii_case("true") {
        return FieldValue::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return FieldValue::Bool(false);
    }
    if let Some(number) = parse_number(text) {
        return FieldValue::Number(number);
    }
    FieldValue::Text(text.to_string())
}

fn parse_number(text: &str) -> Option<Number> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };

    if whole.is_empty() || whole.len() > MAX_INTEGER_DIGITS {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // "007" is an identifier, not seven.
    if whole.len() > 1 && whole.starts_with('0') {
        return None;
    }

    match fraction {
        None => text.parse::<i64>().ok().map(Number::from),
        Some(fraction) => {
            if fraction.is_empty() || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            text.parse::<f64>().ok().and_then(Number::from_f64)
        }
    }
}
