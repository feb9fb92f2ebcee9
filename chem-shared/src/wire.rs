//! # Wire Shapes (§6.2)
//!
//! Every HTTP endpoint accepts `{meta, data}` and returns `{meta, data}`.
//! The literal field names here are part of the wire contract and must be
//! preserved: `errors`, `n_inserted`, `success`, `duplicates`,
//! `error_description`, `validation_errors`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generic inbound request envelope: `{meta: M, data: D}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope<M, D> {
    pub meta: M,
    pub data: D,
}

/// The response `meta` block common to every scheduler endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    #[serde(default)]
    pub errors: Vec<Value>,
    pub n_inserted: usize,
    pub success: bool,
    #[serde(default)]
    pub duplicates: Vec<Value>,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub validation_errors: Vec<Value>,
}

impl ResponseMeta {
    pub fn ok(n_inserted: usize) -> Self {
        Self {
            errors: Vec::new(),
            n_inserted,
            success: true,
            duplicates: Vec::new(),
            error_description: None,
            validation_errors: Vec::new(),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            n_inserted: 0,
            success: false,
            duplicates: Vec::new(),
            error_description: Some(description.into()),
            validation_errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<Value>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_duplicates(mut self, duplicates: Vec<Value>) -> Self {
        self.duplicates = duplicates;
        self
    }
}

/// A generic outbound response envelope: `{meta: ResponseMeta, data: D}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<D> {
    pub meta: ResponseMeta,
    pub data: D,
}

/// Wire shape of a "single" procedure request's `meta` block (§4.2.a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleRequestMeta {
    pub driver: String,
    pub method: String,
    pub basis: String,
    pub options: String,
    pub program: String,
    pub procedure: String,
}

/// Wire shape of an "optimization" procedure request's `meta` block
/// (§4.2.b). Exactly one of `options` / `keywords` is expected to be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequestMeta {
    pub procedure: String,
    pub program: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub keywords: Option<Value>,
    pub qc_meta: SingleRequestMeta,
    #[serde(default)]
    pub duplicate_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_meta_ok_round_trips() {
        let meta = ResponseMeta::ok(3).with_duplicates(vec![json!("mol_A")]);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["n_inserted"], 3);
        assert_eq!(value["success"], true);
        assert_eq!(value["duplicates"][0], "mol_A");
    }

    #[test]
    fn request_envelope_parses_single_procedure_request() {
        let raw = json!({
            "meta": {
                "driver": "energy", "method": "HF", "basis": "sto-3g",
                "options": "default", "program": "psi4", "procedure": "single"
            },
            "data": ["mol_A"]
        });
        let parsed: RequestEnvelope<SingleRequestMeta, Vec<String>> =
            serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.meta.procedure, "single");
        assert_eq!(parsed.data, vec!["mol_A".to_string()]);
    }
}
