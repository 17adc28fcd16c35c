// src/recipe/digest.rs

//! Canonical form and content digest of a recipe
//!
//! The digest is the SHA-256 of the canonical form serialised as compact
//! JSON. Object keys are emitted in sorted order because `serde_json::Map`
//! is backed by a `BTreeMap`. Signatures, the checksum, the trust level and
//! any attached scan result are left out: they describe the recipe rather
//! than being part of it, and signing them would be circular.

use super::format::Recipe;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

impl Recipe {
    /// The signed subset of the recipe
    pub fn to_canonical_form(&self) -> Value {
        let dependencies: Vec<Value> = self
            .dependencies
            .iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "version_constraint": d.version_constraint,
                    "type": d.dep_type,
                    "optional": d.optional,
                })
            })
            .collect();

        let resources: Vec<Value> = self
            .resources
            .iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "kind": r.kind.as_str(),
                    "spec": r.spec,
                    "depends_on": r.depends_on,
                })
            })
            .collect();

        let parameters: Vec<Value> = self
            .parameters
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "type": p.param_type,
                    "default": p.default,
                    "required": p.required,
                })
            })
            .collect();

        json!({
            "name": self.name,
            "version": self.version,
            "publisher": self.publisher,
            "description": self.description,
            "dependencies": dependencies,
            "resources": resources,
            "parameters": parameters,
            "category": self.category,
            "tags": self.tags,
            "license": self.license,
            "created_at": self.created_at.to_rfc3339(),
        })
    }

    /// Hex-encoded SHA-256 of the canonical form
    pub fn compute_digest(&self) -> String {
        // Serialising a Value cannot fail: all keys are strings
        let payload = serde_json::to_vec(&self.to_canonical_form()).unwrap_or_default();
        hex::encode(Sha256::digest(&payload))
    }
}
