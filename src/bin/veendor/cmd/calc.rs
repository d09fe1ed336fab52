//! `veendor calc` — print the fingerprint the engine would compute for a
//! manifest/lockfile pair, without touching any backend or `node_modules`
//! (§1 "a thin synchronous wrapper around the fingerprint function").

use std::path::PathBuf;

use clap::Args;
use color_eyre::{Result, eyre::Context};

use veendor::fingerprint::{Salt, fingerprint};
use veendor::{Lockfile, Manifest};

#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Path to the project manifest.
    #[arg(long, default_value = "package.json")]
    manifest: PathBuf,

    /// Path to the lockfile, if any.
    #[arg(long)]
    lockfile: Option<PathBuf>,

    /// Operator-supplied salt, as a JSON value, invalidating every
    /// fingerprint at once when changed.
    #[arg(long)]
    salt: Option<String>,
}

pub async fn exec(options: Options) -> Result<()> {
    let manifest_text = tokio::fs::read_to_string(&options.manifest)
        .await
        .with_context(|| format!("read manifest at {:?}", options.manifest))?;
    let manifest = Manifest::parse(&manifest_text).context("parse manifest")?;

    let lockfile = match &options.lockfile {
        Some(path) => Some(
            Lockfile::parse(
                &tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("read lockfile at {path:?}"))?,
            )
            .context("parse lockfile")?,
        ),
        None => None,
    };

    let salt = match options.salt {
        Some(raw) => Salt(serde_json::from_str(&raw).context("parse --salt as JSON")?),
        None => Salt::default(),
    };

    let fp = fingerprint(&manifest, lockfile.as_ref(), &salt).context("compute fingerprint")?;
    println!("{fp}");
    Ok(())
}
