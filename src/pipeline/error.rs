//! Failure classes for pipeline stages and how they are reported.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Which external stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Decode,
    Encode,
    Remux,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Decode => write!(f, "decode"),
            StageKind::Encode => write!(f, "encode"),
            StageKind::Remux => write!(f, "remux"),
        }
    }
}

/// Errors that end a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    /// The executable cannot be launched at all. No mode can fix this.
    Unlaunchable { stage: StageKind, message: String },
    /// The stage could not be started in the requested mode.
    StartFailed { stage: StageKind, message: String },
    /// No frame moved within the stall window.
    Stalled { stage: StageKind, waited: Duration },
    /// The byte stream ended, possibly in the middle of a frame.
    EndOfStream {
        stage: StageKind,
        partial_bytes: usize,
    },
    /// The process went away without reporting an error.
    Exited { stage: StageKind },
    /// Reading or writing the stage pipe failed.
    Io { stage: StageKind, message: String },
}

impl StageFailure {
    pub fn stage(&self) -> StageKind {
        match self {
            StageFailure::Unlaunchable { stage, .. }
            | StageFailure::StartFailed { stage, .. }
            | StageFailure::Stalled { stage, .. }
            | StageFailure::EndOfStream { stage, .. }
            | StageFailure::Exited { stage }
            | StageFailure::Io { stage, .. } => *stage,
        }
    }

    /// True when the whole session has to be torn down.
    ///
    /// A missing executable fails every mode, and the remuxer is shared by
    /// all modes of a session, so either one ends the session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, StageFailure::Unlaunchable { .. }) || self.stage() == StageKind::Remux
    }

    /// True for the "no forward progress" family: stalls, stream end, silent exit.
    pub fn is_stall(&self) -> bool {
        matches!(
            self,
            StageFailure::Stalled { .. }
                | StageFailure::EndOfStream { .. }
                | StageFailure::Exited { .. }
        )
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::Unlaunchable { stage, message } => {
                write!(f, "{} stage cannot be launched: {}", stage, message)
            }
            StageFailure::StartFailed { stage, message } => {
                write!(f, "{} stage failed to start: {}", stage, message)
            }
            StageFailure::Stalled { stage, waited } => write!(
                f,
                "{} stage stalled: no frame moved for {:.1}s",
                stage,
                waited.as_secs_f64()
            ),
            StageFailure::EndOfStream {
                stage,
                partial_bytes: 0,
            } => write!(f, "{} stage stream ended", stage),
            StageFailure::EndOfStream {
                stage,
                partial_bytes,
            } => write!(
                f,
                "{} stage stream ended with a partial frame ({} bytes)",
                stage, partial_bytes
            ),
            StageFailure::Exited { stage } => write!(f, "{} stage exited", stage),
            StageFailure::Io { stage, message } => {
                write!(f, "{} stage I/O error: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for StageFailure {}

/// Trait for reporting stage failures.
pub trait ErrorReporter: Send + Sync {
    /// Reports a failure observed while running in `mode_label`.
    fn report(&self, mode_label: &str, failure: &StageFailure);
}

/// Reporter that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, mode_label: &str, failure: &StageFailure) {
        if failure.is_session_fatal() {
            tracing::error!(mode = mode_label, "{}", failure);
        } else {
            tracing::warn!(mode = mode_label, "{}", failure);
        }
    }
}

/// Reporter that keeps every failure, for tests and embedders.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    failures: Mutex<Vec<StageFailure>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<StageFailure> {
        self.failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, _mode_label: &str, failure: &StageFailure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure.clone());
        }
    }
}
