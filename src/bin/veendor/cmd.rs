use clap::Subcommand;

pub mod calc;
pub mod install;

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the full fingerprint -> pull -> history-fallback -> rebuild ->
    /// push pipeline for the current project
    Install(install::Options),

    /// Print the fingerprint that would be computed for a manifest/lockfile
    /// pair, without installing anything
    Calc(calc::Options),
}
