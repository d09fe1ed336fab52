//! The binary entrypoint for `veendor`.

use clap::{Parser, crate_version};
use color_eyre::Result;
use git_version::git_version;
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt;

// Since this is a binary crate, we need to ensure these modules aren't pub
// so that they can correctly warn about dead code:
// https://github.com/rust-lang/rust/issues/74970
mod cmd;
mod log;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "veendor",
    about = "Skip the native install when a matching dependency tree already exists",
    version = format!("v{} commit {}", crate_version!(), git_version!(args = ["--always"])),
)]
struct TopLevelFlags {
    #[command(subcommand)]
    command: cmd::Command,

    /// When to colorize output
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,
}

#[instrument]
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let top = TopLevelFlags::parse();

    log::make_logger(std::io::stderr, top.color)?.init();

    match top.command {
        cmd::Command::Install(opts) => cmd::install::exec(opts).await,
        cmd::Command::Calc(opts) => cmd::calc::exec(opts).await,
    }
}
