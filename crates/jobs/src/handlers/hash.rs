//! `hash`: digest a payload string.
//!
//! Accepted `algo` names (case-insensitive): `md5`, `sha1`, the sha2 family
//! (`sha224`, `sha256`, `sha384`, `sha512`, `sha512_224`, `sha512_256`), the
//! sha3 family (`sha3_224` .. `sha3_512`), `blake2b` (512-bit) and `blake2s`
//! (256-bit). Extendable-output functions (`shake_*`) need a length and are
//! rejected.
//!
//! Non-string `data` is hashed as its compact JSON text, so `true` hashes the
//! bytes `true` and `{"a":1}` hashes `{"a":1}`.
//!
//! Hashing has no side effect, so compensation is a no-op.

use blake2::{Blake2b512, Blake2s256};
use md5::Md5;
use serde_json::{Value, json};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512, Sha512_224, Sha512_256};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};

use tasksvc_core::{Document, is_truthy};

use crate::failure::HandlerFailure;
use crate::registry::JobHandler;

pub const HASH: &str = "hash";

const DEFAULT_ALGORITHM: &str = "sha256";

#[derive(Debug, Clone, Copy, Default)]
pub struct HashHandler;

/// Lowercase hex digest of `data`, or `None` for unknown algorithm names.
fn hex_digest(algo: &str, data: &[u8]) -> Option<String> {
    let digest = match algo.to_ascii_lowercase().as_str() {
        "md5" => format!("{:x}", Md5::digest(data)),
        "sha1" => format!("{:x}", Sha1::digest(data)),
        "sha224" => format!("{:x}", Sha224::digest(data)),
        "sha256" => format!("{:x}", Sha256::digest(data)),
        "sha384" => format!("{:x}", Sha384::digest(data)),
        "sha512" => format!("{:x}", Sha512::digest(data)),
        "sha512_224" => format!("{:x}", Sha512_224::digest(data)),
        "sha512_256" => format!("{:x}", Sha512_256::digest(data)),
        "sha3_224" => format!("{:x}", Sha3_224::digest(data)),
        "sha3_256" => format!("{:x}", Sha3_256::digest(data)),
        "sha3_384" => format!("{:x}", Sha3_384::digest(data)),
        "sha3_512" => format!("{:x}", Sha3_512::digest(data)),
        "blake2b" => format!("{:x}", Blake2b512::digest(data)),
        "blake2s" => format!("{:x}", Blake2s256::digest(data)),
        _ => return None,
    };
    Some(digest)
}

/// Bytes to hash: strings as-is, other JSON values as their compact JSON text.
fn input_bytes(data: Option<&Value>) -> Vec<u8> {
    match data {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => s.as_bytes().to_vec(),
        Some(other) => other.to_string().into_bytes(),
    }
}

impl JobHandler for HashHandler {
    fn execute(&self, payload: &Document) -> Result<Document, HandlerFailure> {
        if payload.get("fail").is_some_and(is_truthy) {
            return Err(HandlerFailure::forced("forced failure for testing"));
        }

        let algo = match payload.get("algo") {
            None | Some(Value::Null) => DEFAULT_ALGORITHM,
            Some(Value::String(name)) => name.as_str(),
            Some(other) => {
                return Err(HandlerFailure::unsupported_algorithm(format!(
                    "unsupported hash type {other}"
                )));
            }
        };

        let digest = hex_digest(algo, &input_bytes(payload.get("data"))).ok_or_else(|| {
            HandlerFailure::unsupported_algorithm(format!("unsupported hash type {algo}"))
        })?;

        let mut out = Document::new();
        out.insert("algo".into(), json!(algo));
        out.insert("digest".into(), json!(digest));
        Ok(out)
    }

    fn compensate(&self, _state: &Document) -> Result<Document, HandlerFailure> {
        let mut out = Document::new();
        out.insert("compensated".into(), json!(true));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sha256_of_abc_matches_reference_vector() {
        let out = HashHandler.execute(&doc(json!({"data": "abc", "algo": "sha256"}))).unwrap();
        assert_eq!(out["algo"], "sha256");
        assert_eq!(
            out["digest"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn defaults_to_sha256_of_empty_input() {
        let out = HashHandler.execute(&Document::new()).unwrap();
        assert_eq!(out["algo"], "sha256");
        assert_eq!(
            out["digest"],
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn other_sha2_variants_are_supported() {
        let out = HashHandler.execute(&doc(json!({"data": "abc", "algo": "sha512"}))).unwrap();
        assert_eq!(
            out["digest"],
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );

        let out = HashHandler.execute(&doc(json!({"data": "abc", "algo": "SHA224"}))).unwrap();
        assert_eq!(
            out["digest"],
            "23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7"
        );
    }

    #[test]
    fn md5_sha1_sha3_and_blake2_match_reference_vectors() {
        let cases = [
            ("md5", "900150983cd24fb0d6963f7d28e17f72"),
            ("sha1", "a9993e364706816aba3e25717850c26c9cd0d89d"),
            (
                "sha3_256",
                "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532",
            ),
            (
                "blake2b",
                "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1\
                 7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923",
            ),
            (
                "blake2s",
                "508c5e8c327c14e2e1a72ba34eeb452f37458b209ed63a294d999b4c86675982",
            ),
        ];
        for (algo, expected) in cases {
            let out = HashHandler.execute(&doc(json!({"data": "abc", "algo": algo}))).unwrap();
            assert_eq!(out["algo"], algo);
            assert_eq!(out["digest"], expected, "{algo}");
        }
    }

    #[test]
    fn non_string_data_is_hashed_as_json_text() {
        let a = HashHandler.execute(&doc(json!({"data": 42}))).unwrap();
        let b = HashHandler.execute(&doc(json!({"data": "42"}))).unwrap();
        assert_eq!(a["digest"], b["digest"]);

        let a = HashHandler.execute(&doc(json!({"data": true}))).unwrap();
        let b = HashHandler.execute(&doc(json!({"data": "true"}))).unwrap();
        assert_eq!(a["digest"], b["digest"]);

        let a = HashHandler.execute(&doc(json!({"data": {"a": 1}}))).unwrap();
        let b = HashHandler.execute(&doc(json!({"data": "{\"a\":1}"}))).unwrap();
        assert_eq!(a["digest"], b["digest"]);
    }

    #[test]
    fn truthy_fail_flag_forces_failure() {
        let err = HashHandler.execute(&doc(json!({"fail": true, "data": "x"}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::Forced);
        assert_eq!(err.message, "forced failure for testing");

        assert!(HashHandler.execute(&doc(json!({"fail": false}))).is_ok());
        assert!(HashHandler.execute(&doc(json!({"fail": 0}))).is_ok());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let err = HashHandler.execute(&doc(json!({"algo": "crc32"}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::UnsupportedAlgorithm);
        assert!(err.message.contains("crc32"));

        let err = HashHandler.execute(&doc(json!({"algo": "shake_128"}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::UnsupportedAlgorithm);

        let err = HashHandler.execute(&doc(json!({"algo": 7}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::UnsupportedAlgorithm);
    }

    #[test]
    fn compensation_is_a_no_op() {
        let out = HashHandler.compensate(&Document::new()).unwrap();
        assert_eq!(out, doc(json!({"compensated": true})));
        assert!(HashHandler.compensation_state(&doc(json!({"data": "x"}))).is_empty());
    }
}
