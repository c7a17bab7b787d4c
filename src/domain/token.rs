//! Token record identity.
//!
//! A record is kept exactly as the listing endpoint returned it. The only
//! thing the crate ever derives from it is the identifier used for
//! deduplication.

use std::fmt;

use serde_json::{Number, Value};

/// One scraped token, untouched.
pub type Record = Value;

/// Field names probed for the identifier, in priority order.
pub const IDENTIFIER_FIELDS: [&str; 4] = ["coinMint", "mint", "id", "address"];

/// Deduplication key of a record.
///
/// Text and numeric identifiers never collide: `{"id": 1}` and
/// `{"id": "1"}` are two different tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Text(String),
    /// Canonical decimal rendering, so `1` and `1.0` are the same key
    Number(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) | Self::Number(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Derive the identifier of a record.
///
/// The first field of [`IDENTIFIER_FIELDS`] holding a non-empty string or a
/// non-zero number wins. Non-object records never have an identifier.
pub fn record_identifier(record: &Record) -> Option<Identifier> {
    let fields = record.as_object()?;

    IDENTIFIER_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(identifier_value)
}

fn identifier_value(value: &Value) -> Option<Identifier> {
    match value {
        Value::String(s) if !s.is_empty() => Some(Identifier::Text(s.clone())),
        Value::Number(n) => canonical_number(n).map(Identifier::Number),
        _ => None,
    }
}

/// Zero counts as missing.
fn canonical_number(n: &Number) -> Option<String> {
    if let Some(v) = n.as_i64() {
        return (v != 0).then(|| v.to_string());
    }
    if let Some(v) = n.as_u64() {
        return Some(v.to_string());
    }
    n.as_f64().filter(|v| v.abs() > 0.0).map(|v| v.to_string())
}
