//! Canonical cache keys for tool invocations.
//!
//! Two calls with the same tool name and the same parameters — regardless
//! of key order anywhere in the parameter tree — must produce the same key,
//! because the key is what makes the result cache idempotent.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Traversal depth cap for canonicalization. Parameter trees deeper than
/// this are truncated with a marker rather than recursed into.
const MAX_DEPTH: usize = 16;

/// Keys whose canonical text exceeds this many bytes are replaced by a
/// digest of that text, keeping keys small and comparison cheap.
const MAX_KEY_BYTES: usize = 256;

/// Marker substituted for subtrees beyond [`MAX_DEPTH`].
const DEPTH_MARKER: &str = "<depth-capped>";

/// Builds a deterministic, order-independent key for a tool invocation.
///
/// Object keys are sorted recursively at every level, so parameter
/// mappings that differ only in key order map to the same key. Traversal
/// depth is capped (deeper subtrees collapse to a marker), and oversized
/// canonical forms are hashed, so the function never recurses unboundedly
/// and always returns a bounded-size string.
///
/// # Example
///
/// ```rust
/// use serde_json::{json, Map, Value};
/// use toolrun::canonical_key;
///
/// let a: Map<String, Value> = serde_json::from_value(json!({"x": 1, "y": 2})).unwrap();
/// let b: Map<String, Value> = serde_json::from_value(json!({"y": 2, "x": 1})).unwrap();
/// assert_eq!(canonical_key("shell", &a), canonical_key("shell", &b));
/// ```
pub fn canonical_key(tool_name: &str, params: &Map<String, Value>) -> String {
    let canonical: BTreeMap<&str, Value> = params
        .iter()
        .map(|(k, v)| (k.as_str(), canonicalize(v, MAX_DEPTH)))
        .collect();

    // BTreeMap serializes in sorted key order.
    let body = serde_json::to_string(&canonical).unwrap_or_else(|_| DEPTH_MARKER.to_string());

    if body.len() + tool_name.len() > MAX_KEY_BYTES {
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(body.as_bytes());
        let digest = hasher.finalize();

        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        format!("{tool_name}:sha256:{hex}")
    } else {
        format!("{tool_name}:{body}")
    }
}

/// Rewrites a value with sorted object keys, truncating below `depth`.
fn canonicalize(value: &Value, depth: usize) -> Value {
    if depth == 0 {
        return Value::String(DEPTH_MARKER.into());
    }
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&str, Value> = map
                .iter()
                .map(|(k, v)| (k.as_str(), canonicalize(v, depth - 1)))
                .collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.to_string(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| canonicalize(v, depth - 1)).collect())
        }
        other => other.clone(),
    }
}
