//! Clipwatch - record camera clips while a person is in view.
//!
//! A transcoder turns a camera stream into frames. Each frame is persisted
//! and classified; once the subject has been absent for the configured
//! timeout the frames are assembled into a video and the scratch data removed.

pub mod cli;
pub mod config;
pub mod export;
pub mod recorder;
pub mod sequencer;
pub mod storage;
pub mod stream;
pub mod utils;

pub use config::MonitorConfig;
pub use utils::error::{AppError, AppResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting clipwatch v{}", env!("CARGO_PKG_VERSION"));
}
