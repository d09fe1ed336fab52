//! The configuration object (§6) — the core's input, produced by the
//! external config loader. Parsing the config file itself is out of scope
//! (owned by the CLI front-end); this module only defines the recognized
//! shape, following the corpus's consistent choice of `serde` + `toml` for
//! configuration (`decapod`, `scarb`, and `rust-lang-cargo` all parse their
//! manifests/configs this way).

use serde::{Deserialize, Serialize};

use crate::backend::BackendDescriptorConfig;
use crate::fingerprint::Salt;

/// History-fallback activation and depth budget (§4.E).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GitHistoryConfig {
    /// How many ancestor revisions to examine before giving up. A depth of
    /// zero disables the history walker entirely.
    pub depth: u32,
}

/// Top-level configuration recognized by the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Ordered list of backend descriptors. Required to be non-empty by the
    /// orchestrator at startup.
    #[serde(default)]
    pub backends: Vec<BackendDescriptorConfig>,

    /// Activates the history walker (§4.E) when present with `depth > 0`.
    #[serde(default, rename = "useGitHistory")]
    pub use_git_history: Option<GitHistoryConfig>,

    /// Activates the native full-install fallback (§4.H `NativeFallback`).
    #[serde(default, rename = "fallbackToNpm")]
    pub fallback_to_npm: bool,

    /// Operator-supplied salt for invalidating every fingerprint at once.
    #[serde(default, rename = "packageHash")]
    pub package_hash: Option<Salt>,
}

impl Config {
    /// The salt to use for fingerprinting, defaulting to the empty salt
    /// when `packageHash` is not configured.
    pub fn salt(&self) -> Salt {
        self.package_hash.clone().unwrap_or_default()
    }

    /// Whether the history walker should be engaged at all.
    pub fn history_enabled(&self) -> bool {
        matches!(&self.use_git_history, Some(cfg) if cfg.depth > 0)
    }

    /// Parse a configuration object from its TOML textual form.
    pub fn parse_toml(content: &str) -> Result<Self, crate::error::EngineError> {
        toml::from_str(content)
            .map_err(|e| crate::error::EngineError::InvalidOptions {
                alias: "<config>".to_string(),
                reason: e.to_string(),
            })
    }
}
