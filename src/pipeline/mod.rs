//! Frame pipeline: decode → redact → encode, with the remuxer alongside.
//!
//! The supervisor drives one session at a time on a single control thread.
//! Each external stage is a separate process connected by pipes, and at most
//! one frame is in flight between them.

pub mod error;
pub mod framing;
pub mod redaction;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod types;

pub use error::{CollectingReporter, ErrorReporter, LogReporter, StageFailure, StageKind};
pub use framing::{FrameReader, FrameWriter, ReadOutcome};
pub use redaction::{DetectionFailurePolicy, RedactionOutcome, RedactionStatus, Redactor};
pub use session::{Session, SessionStats, StreamExit};
pub use shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
pub use supervisor::{Supervisor, SupervisorEvent, SupervisorSettings, SupervisorState};
pub use types::{CapabilityDecision, DetectionBox, Frame, FrameGeometry, Mode};
