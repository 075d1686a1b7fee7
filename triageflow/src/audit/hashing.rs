//! Canonical serialization and SHA-256 content hashing.
//!
//! Objects are written with keys in sorted order at every depth, so two
//! values that differ only in key order hash identically regardless of how
//! `serde_json` was compiled.

use crate::errors::AuditError;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash used as `previous_hash` for the first entry of a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Serializes a value to canonical (key-sorted, compact) JSON.
pub fn canonical_json<T: Serialize + ?Sized>(data: &T) -> Result<String, AuditError> {
    let value = serde_json::to_value(data)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), AuditError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

/// Returns the hex SHA-256 of the canonical serialization of `data`.
pub fn content_hash<T: Serialize + ?Sized>(data: &T) -> Result<String, AuditError> {
    let canonical = canonical_json(data)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Returns the hex SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
