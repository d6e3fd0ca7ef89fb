//! Tracing subscriber initialization for the `cluster` binary.
//!
//! An
//! `EnvFilter` seeded from `RUST_LOG` when set, falling back to a level
//! derived from the CLI's repeated `-v` flag, feeding a plain `fmt` layer
//! on stderr so stdout stays free for the cluster report itself.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `verbose` is the CLI's `-v` repeat count: 0 -> warn, 1 -> info,
/// 2 -> debug, 3+ -> trace. `RUST_LOG`, if set, always wins.
pub fn init(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
