//! Component A: the deterministic manifest fingerprint.
//!
//! Grounded on `hurry`'s use of `blake3` for content addressing
//! (`src/cas.rs`, `src/client.rs`): we hash canonicalized input bytes with
//! `blake3` and hex-encode the digest, exactly as `FsCas::store` hashes blob
//! content to derive its key.

use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::manifest::{Lockfile, Manifest};

/// An operator-supplied salt used to invalidate every fingerprint at once.
///
/// Empty by default. Any byte-serializable value works; we require `Serialize`
/// so the salt can come straight out of the configuration object (§6
/// `packageHash`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub serde_json::Value);

/// A fixed-width hex fingerprint identifying one (manifest, lockfile, salt)
/// input. Stable across processes and machines given identical inputs.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap a precomputed hex string. Used by test doubles and by
    /// deserialization from a backend's wire format.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Fingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0)
    }
}

/// Compute the deterministic fingerprint of `(manifest, lockfile, salt)`.
///
/// The canonicalization frames each field with its length before hashing so
/// that, e.g., a runtime dependency map serializing to `{"a":"1"}` followed
/// by an empty dev map can never collide with a different split of the same
/// bytes. `BTreeMap` already iterates in sorted key order, so the
/// serialization itself performs the "sorted by key at every level" step
/// the design calls for.
///
/// Lockfile absence and lockfile-present-but-empty are distinguished by a
/// one-byte discriminant (`0` for absent, `1` for present) prefixing the
/// lockfile's framed bytes, so the two states can never hash identically.
pub fn fingerprint(
    manifest: &Manifest,
    lockfile: Option<&Lockfile>,
    salt: &Salt,
) -> Result<Fingerprint, EngineError> {
    let mut hasher = blake3::Hasher::new();

    hash_framed(&mut hasher, manifest)?;

    match lockfile {
        None => {
            hasher.update(&[0u8]);
        }
        Some(lockfile) => {
            hasher.update(&[1u8]);
            hash_framed(&mut hasher, lockfile)?;
        }
    }

    hash_framed(&mut hasher, salt)?;

    Ok(Fingerprint(hex::encode(hasher.finalize().as_bytes())))
}

/// Serialize `value` to canonical JSON (stable key order via `BTreeMap`
/// fields / `serde_json`'s map ordering) and feed it into `hasher` with a
/// length prefix.
fn hash_framed<T: Serialize>(hasher: &mut blake3::Hasher, value: &T) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| EngineError::ManifestInvalid(format!("canonicalize: {e}")))?;
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn manifest(runtime: &[(&str, &str)], dev: &[(&str, &str)]) -> Manifest {
        Manifest {
            runtime: runtime
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            dev: dev
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn deterministic_across_calls() {
        let m = manifest(&[("foo", "1.0.0")], &[]);
        let salt = Salt::default();
        let a = fingerprint(&m, None, &salt).unwrap();
        let b = fingerprint(&m, None, &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = manifest(&[("foo", "1.0.0"), ("bar", "2.0.0")], &[]);
        let b = manifest(&[("bar", "2.0.0"), ("foo", "1.0.0")], &[]);
        let salt = Salt::default();
        assert_eq!(
            fingerprint(&a, None, &salt).unwrap(),
            fingerprint(&b, None, &salt).unwrap()
        );
    }

    #[test]
    fn runtime_change_changes_fingerprint() {
        let a = manifest(&[("foo", "1.0.0")], &[]);
        let b = manifest(&[("foo", "2.0.0")], &[]);
        let salt = Salt::default();
        assert_ne!(
            fingerprint(&a, None, &salt).unwrap(),
            fingerprint(&b, None, &salt).unwrap()
        );
    }

    #[test]
    fn dev_change_changes_fingerprint() {
        let a = manifest(&[], &[("foo", "1.0.0")]);
        let b = manifest(&[], &[("foo", "2.0.0")]);
        let salt = Salt::default();
        assert_ne!(
            fingerprint(&a, None, &salt).unwrap(),
            fingerprint(&b, None, &salt).unwrap()
        );
    }

    #[test]
    fn absent_lockfile_differs_from_present_empty_lockfile() {
        let m = manifest(&[("foo", "1.0.0")], &[]);
        let salt = Salt::default();
        let empty_lock = Lockfile(serde_json::json!({}));
        let absent = fingerprint(&m, None, &salt).unwrap();
        let present_empty = fingerprint(&m, Some(&empty_lock), &salt).unwrap();
        assert_ne!(absent, present_empty);
    }

    #[test]
    fn lockfile_change_changes_fingerprint() {
        let m = manifest(&[("foo", "1.0.0")], &[]);
        let salt = Salt::default();
        let a = Lockfile(serde_json::json!({"foo": "1.0.0"}));
        let b = Lockfile(serde_json::json!({"foo": "1.0.1"}));
        assert_ne!(
            fingerprint(&m, Some(&a), &salt).unwrap(),
            fingerprint(&m, Some(&b), &salt).unwrap()
        );
    }

    #[test]
    fn salt_change_changes_fingerprint() {
        let m = manifest(&[("foo", "1.0.0")], &[]);
        let a = Salt(serde_json::json!("a"));
        let b = Salt(serde_json::json!("b"));
        assert_ne!(
            fingerprint(&m, None, &a).unwrap(),
            fingerprint(&m, None, &b).unwrap()
        );
    }
}
