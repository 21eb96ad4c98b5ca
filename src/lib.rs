//! veilcast - live stream face redaction relay
//!
//! Pulls a live video stream, blurs every detected face frame by frame, and
//! republishes it with the source audio. A supervisor keeps the relay up
//! through stalls, hardware failures, and source outages.

// Enforce error handling discipline: propagate, don't panic
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod cli;
pub mod config;
pub mod defaults;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod probe;
pub mod stage;
pub mod sys;

// Composition root
pub mod app;

// Core traits (probe → stages → detector)
pub use detect::FaceDetector;
pub use probe::CapabilityProber;
pub use stage::{StageHandle, StageLauncher};

// Supervisor
pub use pipeline::shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use pipeline::supervisor::{Supervisor, SupervisorEvent, SupervisorSettings, SupervisorState};

// Error handling
pub use error::{Result, VeilcastError};
pub use pipeline::error::{ErrorReporter, StageFailure, StageKind};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
