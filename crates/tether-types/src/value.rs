//! Decoded scalar values and their JSON wire encoding.
//!
//! Every cell the engine touches exists in two forms: the *encoded* form
//! ([`serde_json::Value`]) used on change-notification payloads and in the
//! volatile store, and the *decoded* form ([`ScalarValue`]) used by proxies
//! and handlers. [`ColumnType`] owns the decode direction because the wire
//! encoding alone is ambiguous (a JSON string may be text, a UUID, a
//! timestamp, or hex-encoded bytes).
//!
//! Postgres `row_to_json` renders `NUMERIC` as a JSON number and `BYTEA` as
//! a `\x`-prefixed hex string; both renderings are accepted alongside the
//! canonical forms produced by [`ScalarValue::encode`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::TypeError;

/// Semantic type of a relational column.
///
/// Drives decoding of encoded payload values into [`ScalarValue`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer (`SMALLINT`/`INTEGER`/`BIGINT`).
    Int,
    /// Double-precision float.
    Float,
    /// Arbitrary-precision numeric.
    Decimal,
    /// UTF-8 text.
    Text,
    /// UUID.
    Uuid,
    /// Timestamp with time zone.
    Timestamp,
    /// Arbitrary JSON document (`JSON`/`JSONB`).
    Json,
    /// Raw bytes (`BYTEA`).
    Bytes,
}

impl ColumnType {
    /// Human-readable name used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
            Self::Bytes => "bytes",
        }
    }

    /// Decode an encoded payload value into a [`ScalarValue`] of this type.
    ///
    /// JSON `null` decodes to [`ScalarValue::Null`] for every column type;
    /// nullability enforcement belongs to the store, not the decoder.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::Decode`] if the encoded value does not match
    /// this type.
    pub fn decode(self, column: &str, encoded: &Json) -> Result<ScalarValue, TypeError> {
        if encoded.is_null() {
            return Ok(ScalarValue::Null);
        }

        let mismatch = || TypeError::Decode {
            column: column.to_owned(),
            expected: self.name(),
            found: render_short(encoded),
        };

        match self {
            Self::Bool => encoded.as_bool().map(ScalarValue::Bool).ok_or_else(mismatch),
            Self::Int => encoded.as_i64().map(ScalarValue::Int).ok_or_else(mismatch),
            Self::Float => encoded.as_f64().map(ScalarValue::Float).ok_or_else(mismatch),
            Self::Decimal => decode_decimal(encoded).ok_or_else(mismatch),
            Self::Text => encoded
                .as_str()
                .map(|s| ScalarValue::Text(s.to_owned()))
                .ok_or_else(mismatch),
            Self::Uuid => encoded
                .as_str()
                .and_then(|s| s.parse::<Uuid>().ok())
                .map(ScalarValue::Uuid)
                .ok_or_else(mismatch),
            Self::Timestamp => encoded
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| ScalarValue::Timestamp(t.with_timezone(&Utc)))
                .ok_or_else(mismatch),
            Self::Json => Ok(ScalarValue::Json(encoded.clone())),
            Self::Bytes => decode_bytes(encoded).ok_or_else(mismatch),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded cell value.
///
/// Implements `Eq`, `Hash`, and `Ord` by hand so values can key identity
/// maps and ordered sets; floats compare and hash via their bit patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Arbitrary-precision numeric.
    Decimal(Decimal),
    /// UTF-8 text.
    Text(String),
    /// UUID.
    Uuid(Uuid),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
    /// Arbitrary JSON document.
    Json(Json),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl ScalarValue {
    /// Whether this value is SQL NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encode into the JSON wire form used on payloads and in the
    /// volatile store.
    ///
    /// Decimals encode as strings to preserve precision; bytes encode as a
    /// `\x`-prefixed hex string matching the Postgres rendering. Non-finite
    /// floats encode as JSON `null` (JSON has no NaN/Infinity).
    pub fn encode(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::Decimal(d) => Json::String(d.to_string()),
            Self::Text(s) => Json::String(s.clone()),
            Self::Uuid(u) => Json::String(u.to_string()),
            Self::Timestamp(t) => Json::String(t.to_rfc3339()),
            Self::Json(j) => j.clone(),
            Self::Bytes(b) => Json::String(format!("\\x{}", hex::encode(b))),
        }
    }

    /// Discriminant rank used for cross-variant ordering.
    const fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Decimal(_) => 4,
            Self::Text(_) => 5,
            Self::Uuid(_) => 6,
            Self::Timestamp(_) => 7,
            Self::Json(_) => 8,
            Self::Bytes(_) => 9,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Json(j) => write!(f, "{j}"),
            Self::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::Decimal(d) => d.hash(state),
            Self::Text(s) => s.hash(state),
            Self::Uuid(u) => u.hash(state),
            Self::Timestamp(t) => t.hash(state),
            Self::Json(j) => j.to_string().hash(state),
            Self::Bytes(b) => b.hash(state),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Json(a), Self::Json(b)) => a.to_string().cmp(&b.to_string()),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Decode a decimal from either a JSON number or a string rendering.
fn decode_decimal(encoded: &Json) -> Option<ScalarValue> {
    let text = match encoded {
        Json::Number(n) => n.to_string(),
        Json::String(s) => s.clone(),
        _ => return None,
    };
    text.parse::<Decimal>().ok().map(ScalarValue::Decimal)
}

/// Decode bytes from a `\x`-prefixed hex string or a JSON array of numbers.
fn decode_bytes(encoded: &Json) -> Option<ScalarValue> {
    match encoded {
        Json::String(s) => {
            let stripped = s.strip_prefix("\\x").unwrap_or(s);
            hex::decode(stripped).ok().map(ScalarValue::Bytes)
        }
        Json::Array(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let n = item.as_u64().filter(|n| *n <= u64::from(u8::MAX))?;
                bytes.push(u8::try_from(n).ok()?);
            }
            Some(ScalarValue::Bytes(bytes))
        }
        _ => None,
    }
}

/// Truncated rendering of an encoded value for error messages.
fn render_short(encoded: &Json) -> String {
    const MAX: usize = 64;
    let mut s = encoded.to_string();
    if s.len() > MAX {
        s.truncate(MAX);
        s.push_str("...");
    }
    s
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;

    #[test]
    fn encode_decode_roundtrip_basic_types() {
        let cases = [
            (ColumnType::Bool, ScalarValue::Bool(true)),
            (ColumnType::Int, ScalarValue::Int(-42)),
            (ColumnType::Text, ScalarValue::Text("hello".to_owned())),
            (ColumnType::Uuid, ScalarValue::Uuid(Uuid::now_v7())),
            (
                ColumnType::Json,
                ScalarValue::Json(serde_json::json!({"a": [1, 2]})),
            ),
            (ColumnType::Bytes, ScalarValue::Bytes(vec![0x68, 0x69])),
        ];
        for (ty, value) in cases {
            let decoded = ty.decode("c", &value.encode()).expect("decode");
            assert_eq!(decoded, value, "{ty} roundtrip");
        }
    }

    #[test]
    fn decode_timestamp_rfc3339() {
        let encoded = Json::String("2026-08-30T12:00:00.500+00:00".to_owned());
        let decoded = ColumnType::Timestamp.decode("at", &encoded).expect("decode");
        match decoded {
            ScalarValue::Timestamp(t) => assert_eq!(t.timestamp_millis(), 1_787_486_400_500),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn decode_decimal_accepts_number_and_string() {
        let from_number = ColumnType::Decimal
            .decode("d", &serde_json::json!(12.5))
            .expect("number");
        let from_string = ColumnType::Decimal
            .decode("d", &Json::String("12.5".to_owned()))
            .expect("string");
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn decode_bytes_accepts_pg_hex_rendering() {
        let encoded = Json::String("\\x68656c6c6f".to_owned());
        let decoded = ColumnType::Bytes.decode("b", &encoded).expect("decode");
        assert_eq!(decoded, ScalarValue::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn null_decodes_for_every_type() {
        for ty in [ColumnType::Bool, ColumnType::Int, ColumnType::Timestamp] {
            let decoded = ty.decode("c", &Json::Null).expect("null");
            assert!(decoded.is_null());
        }
    }

    #[test]
    fn mismatch_reports_column_and_types() {
        let err = ColumnType::Int
            .decode("age", &Json::String("old".to_owned()))
            .expect_err("mismatch");
        let msg = err.to_string();
        assert!(msg.contains("age"));
        assert!(msg.contains("int"));
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(ScalarValue::Float(1.5), ScalarValue::Float(1.5));
        assert_ne!(ScalarValue::Float(0.0), ScalarValue::Float(-0.0));
    }
}
