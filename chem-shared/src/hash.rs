//! # Content-Addressed Hashing
//!
//! Deterministic fingerprinting of task and procedure specifications
//! (§4.1). The digest is collision-resistant at cryptographic strength
//! (SHA-256) and stable across processes, key-insertion order, and
//! floating-point representations that differ only in trailing zeros.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A content-addressed fingerprint, hex-encoded.
pub type HashIndex = String;

/// The canonical ordered field tuple identifying a single atomic run.
pub const SINGLE_RUN_KEYS: [&str; 6] = [
    "driver",
    "method",
    "basis",
    "options",
    "program",
    "molecule_id",
];

/// Canonicalize a JSON value into a stable string form:
/// - object keys are sorted,
/// - floats are rendered with a fixed decimal representation so that
///   `1.0` and `1.00` hash identically,
/// - containers are walked depth-first.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => canonicalize_number(n),
        Value::String(s) => format!("{s:?}"),
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let rendered: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{k:?}:{}", canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", rendered.join(","))
        }
    }
}

fn canonicalize_number(n: &serde_json::Number) -> String {
    if let Some(f) = n.as_f64() {
        // Fixed decimal representation collapses "1.0" and "1" to the same
        // digest input; serde_json already normalizes integral floats, so
        // a %.12f-style render is enough to absorb trailing-zero noise.
        if n.is_i64() || n.is_u64() {
            return n.to_string();
        }
        format!("{f:.12}")
    } else {
        n.to_string()
    }
}

/// Produce a stable 256-bit digest (hex-encoded) for an arbitrary
/// field-name-to-value mapping.
pub fn hash_value(value: &Value) -> HashIndex {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    ::hex::encode(hasher.finalize())
}

/// §4.1 `single_run_hash`: returns the canonical ordered tuple of
/// identifying fields and the digest of that tuple.
///
/// `query` must carry at least the `SINGLE_RUN_KEYS` fields; any other
/// fields are ignored for hashing purposes.
pub fn single_run_hash(query: &Value) -> (Value, HashIndex) {
    let obj = query.as_object().expect("single_run query must be an object");
    let mut keys = serde_json::Map::new();
    for field in SINGLE_RUN_KEYS {
        let v = obj.get(field).cloned().unwrap_or(Value::Null);
        keys.insert(field.to_string(), v);
    }
    let keys_value = Value::Object(keys);
    let digest = hash_value(&keys_value);
    (keys_value, digest)
}

/// Hash the identity-defining keys of a procedure (§4.2.b step 4):
/// `{type, program, keywords, single_key}`.
pub fn hash_procedure_keys(keys: &Value) -> HashIndex {
    hash_value(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalization_ignores_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn canonicalization_collapses_trailing_zeros() {
        let a = json!({"x": 1.0});
        let b = json!({"x": 1.00000});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn hash_is_deterministic_across_calls() {
        let v = json!({"driver": "energy", "method": "HF", "basis": "sto-3g"});
        assert_eq!(hash_value(&v), hash_value(&v));
    }

    #[test]
    fn hash_is_a_256_bit_hex_digest() {
        let v = json!({"a": 1});
        let digest = hash_value(&v);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn single_run_hash_extracts_only_identifying_fields() {
        let query = json!({
            "driver": "energy",
            "method": "HF",
            "basis": "sto-3g",
            "options": "default",
            "program": "psi4",
            "molecule_id": "mol_1",
            "irrelevant": "should not affect hash",
        });
        let (keys, digest) = single_run_hash(&query);
        assert_eq!(keys["driver"], "energy");
        assert!(keys.get("irrelevant").is_none());

        let query2 = json!({
            "driver": "energy",
            "method": "HF",
            "basis": "sto-3g",
            "options": "default",
            "program": "psi4",
            "molecule_id": "mol_1",
            "irrelevant": "different value, same identity",
        });
        let (_, digest2) = single_run_hash(&query2);
        assert_eq!(digest, digest2);
    }

    #[test]
    fn single_run_hash_differs_on_molecule() {
        let base = json!({
            "driver": "energy", "method": "HF", "basis": "sto-3g",
            "options": "default", "program": "psi4", "molecule_id": "mol_1",
        });
        let mut other = base.clone();
        other["molecule_id"] = json!("mol_2");

        let (_, h1) = single_run_hash(&base);
        let (_, h2) = single_run_hash(&other);
        assert_ne!(h1, h2);
    }

    #[test]
    fn procedure_keys_preserve_single_key_identity() {
        let keys_a = json!({
            "type": "optimization", "program": "geometric",
            "keywords": {"coordsys": "tric"}, "single_key": 0,
        });
        let keys_b = json!({
            "type": "optimization", "program": "geometric",
            "keywords": {"coordsys": "tric"}, "single_key": 1,
        });
        assert_ne!(hash_procedure_keys(&keys_a), hash_procedure_keys(&keys_b));
    }

    #[test]
    fn procedure_keys_deterministic_regardless_of_insertion_order() {
        let a = json!({"type": "optimization", "program": "p", "keywords": {}, "single_key": 0});
        let b = json!({"single_key": 0, "keywords": {}, "program": "p", "type": "optimization"});
        assert_eq!(hash_procedure_keys(&a), hash_procedure_keys(&b));
    }
}
