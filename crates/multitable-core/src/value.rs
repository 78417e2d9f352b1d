//! Dynamic SQL values.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A dynamically-typed SQL value.
///
/// Used for parameter binding and for reading staged ids back from
/// result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Render this value as an inline SQL literal.
    ///
    /// Returns `None` for values that have no portable literal form
    /// (binary data, UUID bytes, JSON); those must be bound as parameters.
    /// Text holding a backslash or NUL falls in that group too, since
    /// MySQL reads backslashes inside quotes as escapes. Decimals inline
    /// only when they are plain numbers.
    pub fn to_sql_literal(&self) -> Option<String> {
        match self {
            Value::Null => Some("null".to_string()),
            Value::Bool(v) => Some(if *v { "true" } else { "false" }.to_string()),
            Value::SmallInt(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::BigInt(v) => Some(v.to_string()),
            Value::Double(v) if v.is_finite() => Some(v.to_string()),
            Value::Decimal(s) if is_plain_number(s) => Some(s.clone()),
            Value::Text(s) if !s.contains(['\\', '\0']) => {
                Some(format!("'{}'", s.replace('\'', "''")))
            }
            _ => None,
        }
    }
}

/// Hash a row of values, for grouping rows before comparing them.
///
/// Rows that compare equal hash equal, except for `-0.0`/`0.0`, which
/// never occur in id columns.
pub fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    values.len().hash(&mut hasher);
    for value in values {
        hash_value(value, &mut hasher);
    }
    hasher.finish()
}

fn hash_value(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::SmallInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Int(i) => {
            3u8.hash(hasher);
            i.hash(hasher);
        }
        Value::BigInt(i) => {
            4u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            5u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Decimal(s) => {
            6u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Text(s) => {
            7u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            8u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Date(d) => {
            9u8.hash(hasher);
            d.hash(hasher);
        }
        Value::Timestamp(ts) => {
            10u8.hash(hasher);
            ts.hash(hasher);
        }
        Value::Uuid(u) => {
            11u8.hash(hasher);
            u.hash(hasher);
        }
        Value::Json(j) => {
            12u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

/// `[+-]digits[.digits][e[+-]digits]`, with at least one mantissa digit.
fn is_plain_number(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((m, e)) => (m, Some(e.strip_prefix(['+', '-']).unwrap_or(e))),
        None => (unsigned, None),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    !(int.is_empty() && frac.is_empty())
        && digits(int)
        && digits(frac)
        && exponent.is_none_or(|e| !e.is_empty() && digits(e))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl TryFrom<Value> for i64 {
    type Error = crate::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_i64().ok_or_else(|| {
            crate::Error::Type(crate::error::TypeError {
                expected: "i64",
                actual: value.type_name().to_string(),
                column: None,
            })
        })
    }
}

impl TryFrom<Value> for String {
    type Error = crate::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s),
            other => Err(crate::Error::Type(crate::error::TypeError {
                expected: "String",
                actual: other.type_name().to_string(),
                column: None,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_rendering_escapes_quotes() {
        assert_eq!(
            Value::from("it's open").to_sql_literal().as_deref(),
            Some("'it''s open'")
        );
        assert_eq!(Value::Int(5).to_sql_literal().as_deref(), Some("5"));
        assert_eq!(Value::Null.to_sql_literal().as_deref(), Some("null"));
        assert_eq!(Value::Bool(true).to_sql_literal().as_deref(), Some("true"));
        assert!(Value::Bytes(vec![1, 2]).to_sql_literal().is_none());
        assert!(Value::Double(f64::NAN).to_sql_literal().is_none());
    }

    #[test]
    fn backslashes_are_never_inlined() {
        // MySQL reads `\'` as an escaped quote, so the doubled quote that
        // follows would close the literal.
        let hostile = Value::from("a\\' or 1=1 -- ");
        assert!(hostile.to_sql_literal().is_none());
        assert!(Value::from("nul\0byte").to_sql_literal().is_none());
        assert_eq!(Value::from("a/b").to_sql_literal().as_deref(), Some("'a/b'"));
    }

    #[test]
    fn decimals_inline_only_as_numbers() {
        for ok in ["42", "-0.50", "+3.", ".25", "1.5e-3", "7E10"] {
            assert_eq!(Value::Decimal(ok.into()).to_sql_literal().as_deref(), Some(ok));
        }
        for bad in ["", ".", "1 or 1=1", "1e", "0x1F", "1.2.3", "--1"] {
            assert!(Value::Decimal(bad.into()).to_sql_literal().is_none(), "{bad}");
        }
    }

    #[test]
    fn equal_rows_hash_equal() {
        let row = [Value::BigInt(7), Value::from("INV-7")];
        assert_eq!(hash_values(&row), hash_values(&row.clone()));
        assert_ne!(hash_values(&[Value::Int(7)]), hash_values(&[Value::BigInt(7)]));
        assert_ne!(hash_values(&[Value::Null]), hash_values(&[Value::Null, Value::Null]));
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(Value::SmallInt(3).as_i64(), Some(3));
        assert_eq!(Value::Decimal("42".into()).as_i64(), Some(42));
        assert_eq!(i64::try_from(Value::BigInt(7)).ok(), Some(7));
        assert!(i64::try_from(Value::Text("x".into())).is_err());
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn serde_roundtrip_of_text() {
        let json = serde_json::to_string(&Value::Text("abc".into())).expect("serialize");
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Value::Text("abc".into()));
    }
}
