//! Tracing/`color-eyre` wiring for the `veendor` binary.
//!
//! Grounded on `hurry`'s `src/bin/hurry/log.rs`: a `tracing-subscriber`
//! registry with an `EnvFilter` layer and `tracing-error`'s `ErrorLayer` so
//! `color-eyre` reports can capture span traces. We drop the flamegraph
//! layer `hurry` carries (no `tracing-flame`/`mimalloc` dependency here —
//! this crate has no profiling use case) but keep the same env-var-driven
//! filter convention.

use clap::ValueEnum;
use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{Layer as _, layer::SubscriberExt as _};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum WhenColor {
    Always,
    Never,
    Auto,
}

pub fn make_logger<W>(writer: W, color: WhenColor) -> Result<impl tracing::Subscriber>
where
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    let logger = tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with({
            let layer = tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_writer(writer);
            match color {
                WhenColor::Always => layer.with_ansi(true),
                WhenColor::Never => layer.with_ansi(false),
                WhenColor::Auto => layer,
            }
            .with_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_env_var("VEENDOR_LOG")
                    .from_env_lossy(),
            )
        });

    Ok(logger)
}
