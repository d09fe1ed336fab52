//! The data model described in the design's §3: manifests and lockfiles.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A version specifier string, opaque to the engine beyond string equality.
pub type VersionSpec = String;

/// A parsed project manifest.
///
/// Key order is not semantically significant to callers but `BTreeMap` gives
/// us the "sorted by key at every level" canonicalization the fingerprint
/// requires for free.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Runtime ("dependencies") section.
    #[serde(default)]
    pub runtime: BTreeMap<String, VersionSpec>,
    /// Development ("devDependencies") section.
    #[serde(default)]
    pub dev: BTreeMap<String, VersionSpec>,
}

impl Manifest {
    /// Parse a manifest from its JSON textual form.
    ///
    /// Fails with [`EngineError::ManifestInvalid`] if the document cannot be
    /// parsed. A manifest with neither section present still parses (both
    /// maps default to empty), since the native manifest format does not
    /// require either section to exist.
    pub fn parse(content: &str) -> Result<Self, EngineError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, rename = "dependencies")]
            runtime: BTreeMap<String, VersionSpec>,
            #[serde(default, rename = "devDependencies")]
            dev: BTreeMap<String, VersionSpec>,
        }

        let raw: Raw = serde_json::from_str(content)
            .map_err(|e| EngineError::ManifestInvalid(e.to_string()))?;
        Ok(Manifest {
            runtime: raw.runtime,
            dev: raw.dev,
        })
    }

    /// Read and parse the manifest at `path`.
    pub async fn read(path: &Path) -> Result<Self, EngineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| EngineError::ManifestNotFound(path.to_path_buf()))?;
        Self::parse(&content)
    }

    /// The union of `dev` and `runtime`, with `runtime` winning on key
    /// conflict — this matches the native package manager's own convention
    /// (§4.F) where a package declared in both sections is treated as a
    /// runtime dependency.
    pub fn all(&self) -> BTreeMap<String, VersionSpec> {
        let mut merged = self.dev.clone();
        merged.extend(self.runtime.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// An optionally-present, opaque parsed lockfile.
///
/// Absence and "present but empty" are distinct inputs to the fingerprint;
/// callers must not collapse a missing lockfile into `Lockfile::default()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lockfile(pub serde_json::Value);

impl Lockfile {
    /// Parse a lockfile from its textual form. Lockfile contents are opaque
    /// to the engine; any valid JSON document is accepted.
    pub fn parse(content: &str) -> Result<Self, EngineError> {
        let value = serde_json::from_str(content)
            .map_err(|e| EngineError::ManifestInvalid(format!("lockfile: {e}")))?;
        Ok(Lockfile(value))
    }

    /// Read and parse the lockfile at `path`. Returns `Ok(None)` (not an
    /// error) if the path does not exist, since lockfile absence is a
    /// first-class state.
    pub async fn read_optional(path: &Path) -> Result<Option<Self>, EngineError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(Self::parse(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::ManifestInvalid(format!(
                "read lockfile {path:?}: {e}"
            ))),
        }
    }
}
