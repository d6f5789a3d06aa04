//! gaze-cursor - drive the mouse cursor with your eyes.
//!
//! This is the library crate behind the `gaze-cursor` binary. It turns a
//! stream of face/iris landmarks into a calibrated, smoothed cursor position
//! and wink clicks.

pub mod calibration;
pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod processing;
pub mod screen;
pub mod tracker;

pub use config::GazeConfig;
pub use error::{GazeError, GazeResult};
pub use screen::{ScreenGeometry, ScreenPoint};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` takes precedence over `default_filter`. Logs go to stderr so
/// stdout stays free for JSON output.
pub fn init_tracing(default_filter: &str) {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if result.is_ok() {
        tracing::info!("Starting gaze-cursor v{}", env!("CARGO_PKG_VERSION"));
    }
}
