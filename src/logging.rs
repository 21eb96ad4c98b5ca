//! Log output setup.
//!
//! Everything goes to stderr through a `tracing` fmt subscriber so stdout
//! stays free for command output such as `config show`.

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

/// Pick the maximum level from CLI flags, with `RUST_LOG` taking precedence.
///
/// `quiet` limits output to errors; each `-v` raises the level one step from
/// the default of INFO.
pub fn max_level(verbosity: u8, quiet: bool, rust_log: Option<&str>) -> Level {
    if let Some(level) = rust_log.and_then(parse_level) {
        return level;
    }
    if quiet {
        return Level::ERROR;
    }
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(verbosity: u8, quiet: bool) -> Result<(), SetGlobalDefaultError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let level = max_level(verbosity, quiet, rust_log.as_deref());

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(level >= Level::DEBUG)
        .with_thread_names(level >= Level::DEBUG)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
