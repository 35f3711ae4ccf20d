//! Spec-hash annotation: the write-discipline short-circuit described in
//! spec §3/§4.A. Every generated child carries `apps.example.com/spec-hash`;
//! a reconciler recomputes the hash of the desired spec and skips the write
//! when it already matches what's on the live object.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const SPEC_HASH_ANNOTATION: &str = "apps.example.com/spec-hash";

/// Stable, content-derived identifier of a serializable desired spec.
/// `serde_json::to_vec` on a `BTreeMap`-backed or derive(Serialize) struct
/// is deterministic field-order, which is what makes this byte-identical
/// across runs for an unchanged spec (spec §8's `hash(spec) = hash(spec)`
/// round-trip law).
pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    let bytes = serde_json::to_vec(spec).expect("desired spec is always serializable");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// True when `annotations` already carries the computed hash, meaning the
/// reconciler can skip writing this child entirely.
pub fn is_up_to_date(annotations: Option<&BTreeMap<String, String>>, hash: &str) -> bool {
    annotations
        .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
        .is_some_and(|existing| existing == hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn hash_is_deterministic() {
        let s = Sample {
            a: 1,
            b: "x".into(),
        };
        assert_eq!(hash_spec(&s), hash_spec(&s));
    }

    #[test]
    fn hash_changes_with_content() {
        let a = Sample {
            a: 1,
            b: "x".into(),
        };
        let b = Sample {
            a: 2,
            b: "x".into(),
        };
        assert_ne!(hash_spec(&a), hash_spec(&b));
    }

    #[test]
    fn up_to_date_detection() {
        let hash = hash_spec(&Sample {
            a: 1,
            b: "x".into(),
        });
        assert!(!is_up_to_date(None, &hash));
        let mut annotations = BTreeMap::new();
        annotations.insert(SPEC_HASH_ANNOTATION.to_owned(), hash.clone());
        assert!(is_up_to_date(Some(&annotations), &hash));
    }
}
