//! The value domain shared by the CRDT, storage, and wire layers.
//!
//! Internally every op and every stored row carries a [`Value`], a
//! tagged union — never an opaque blob. Deserialization happens once,
//! explicitly, at the wire and storage boundary (see
//! `verge-wire::json` and `verge-storage::codec`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unified value type for all document fields, CRDT register payloads,
/// and wire message fields.
///
/// This derive is externally tagged (`{"I64": 5}`) and is used for
/// internal serialization (WAL records, shard rows, snapshots) where
/// round-tripping through `Value` itself matters. Wire-facing JSON
/// uses the explicit [`From<serde_json::Value>`]/`Into<serde_json::Value>`
/// conversions below instead, which produce plain JSON shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit floating point.
    F64(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes, base64-encoded on the wire (see `verge-wire::json`).
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed map. `BTreeMap` (not `HashMap`) so that two
    /// replicas holding the same logical object always serialize to
    /// byte-identical JSON, which the convergence invariant in spec
    /// §8 depends on (`to_object()` byte-equality).
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// `true` if this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as a string, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as an object, if this value is one.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Convert a `serde_json::Value` into our internal tagged union. Used
/// at the wire boundary, kept separate from [`Value`]'s own
/// `Serialize`/`Deserialize` derive so the conversion is explicit
/// rather than relying on the untagged representation matching JSON's
/// shape by accident.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::I64(i)
                } else {
                    Value::F64(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => Value::Object(
                o.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::I64(i) => serde_json::Value::from(i),
            Value::F64(f) => serde_json::json!(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => {
                use std::fmt::Write;
                let mut encoded = String::with_capacity(b.len());
                // Base64 without pulling in a dependency: VergeDB's
                // only byte payloads today are small (doc ids, nonces)
                // so a dependency-free encoder keeps the wire crate's
                // footprint in line with the rest of the stack.
                for chunk in b.chunks(3) {
                    write!(encoded, "{}", encode_chunk(chunk)).ok();
                }
                serde_json::Value::String(encoded)
            }
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn encode_chunk(chunk: &[u8]) -> String {
    let mut buf = [0u8; 3];
    buf[..chunk.len()].copy_from_slice(chunk);
    let n = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
    let mut out = String::with_capacity(4);
    out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
    out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
    out.push(if chunk.len() > 1 {
        ALPHABET[(n >> 6 & 0x3f) as usize] as char
    } else {
        '='
    });
    out.push(if chunk.len() > 2 {
        ALPHABET[(n & 0x3f) as usize] as char
    } else {
        '='
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_object_ordering_independence() {
        let json = serde_json::json!({"b": 1, "a": 2});
        let value: Value = json.into();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.get("a"), Some(&Value::I64(2)));
        assert_eq!(obj.get("b"), Some(&Value::I64(1)));
    }

    #[test]
    fn integers_stay_integers_through_json_conversion() {
        let value: Value = serde_json::json!(42).into();
        assert_eq!(value, Value::I64(42));
    }

    #[test]
    fn from_helpers_cover_scalars() {
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(1i64), Value::I64(1));
        assert_eq!(Value::from(true), Value::Bool(true));
    }
}
