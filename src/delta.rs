//! Component F: the delta installer.
//!
//! Computes the set-difference between two manifests and drives the native
//! package manager to reconcile. Installs always run before uninstalls: new
//! versions may replace old packages transitively, making the uninstall set
//! smaller by the time it runs (§4.F).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, instrument};

use crate::error::EngineError;
use crate::manifest::Manifest;
use crate::process::NativePackageManager;

/// The computed difference between an old and a new manifest's merged
/// dependency sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_install: BTreeMap<String, String>,
    pub to_uninstall: BTreeSet<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_uninstall.is_empty()
    }
}

/// Compute the delta between `old` and `new`'s merged (`dev ∪ runtime`,
/// runtime-wins) dependency sets.
pub fn diff(old: &Manifest, new: &Manifest) -> Delta {
    let old_all = old.all();
    let new_all = new.all();

    let to_install = new_all
        .iter()
        .filter(|(name, version)| old_all.get(*name) != Some(version))
        .map(|(name, version)| (name.clone(), version.clone()))
        .collect();

    let to_uninstall = old_all
        .keys()
        .filter(|name| !new_all.contains_key(*name))
        .cloned()
        .collect();

    Delta {
        to_install,
        to_uninstall,
    }
}

/// Drive the native package manager to reconcile `old` into `new`.
///
/// It is a programmer error to call this with two manifests that do not
/// differ — the history walker (§4.E) must only ever hand this function
/// manifests whose fingerprint changed. Reaching this with an empty delta
/// surfaces [`EngineError::EmptyDelta`] rather than silently no-op'ing,
/// preserving the precondition the design notes (§9) call out explicitly.
#[instrument(skip(native, old, new))]
pub async fn reconcile(
    native: &dyn NativePackageManager,
    project_root: &Path,
    old: &Manifest,
    new: &Manifest,
) -> Result<(), EngineError> {
    let delta = diff(old, new);
    if delta.is_empty() {
        return Err(EngineError::EmptyDelta);
    }

    if !delta.to_install.is_empty() {
        debug!(count = delta.to_install.len(), "installing");
        native.install(project_root, &delta.to_install).await?;
    }

    if !delta.to_uninstall.is_empty() {
        debug!(count = delta.to_uninstall.len(), "uninstalling");
        native.uninstall(project_root, &delta.to_uninstall).await?;
    }

    Ok(())
}
