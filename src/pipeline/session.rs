//! One decode/encode pairing and the frame loop that drives it.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::pipeline::redaction::{RedactionStatus, Redactor};
use crate::pipeline::shutdown::ShutdownSignal;
use crate::pipeline::types::{CapabilityDecision, FrameGeometry};
use crate::stage::{DecodeStage, EncodeStage, RemuxStage, StageLauncher};
use std::time::{Duration, Instant};

/// Longest the frame loop blocks before rechecking shutdown and the remuxer.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Frame counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames handed to the encoder.
    pub frames_forwarded: u64,
    /// Frames in which at least one face was blurred.
    pub frames_redacted: u64,
    /// Frames for which detection failed.
    pub detection_failures: u64,
}

/// Why the frame loop returned.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamExit {
    Shutdown,
    Failed(StageFailure),
}

/// A running decoder and encoder in one capability mode.
///
/// Dropping the session stops both stages.
pub struct Session {
    decision: CapabilityDecision,
    decode: DecodeStage,
    encode: EncodeStage,
    stats: SessionStats,
    started: Instant,
}

impl Session {
    /// Start the decoder and then the encoder. If the encoder cannot start,
    /// the decoder is stopped before returning.
    pub fn start(
        launcher: &dyn StageLauncher,
        decision: CapabilityDecision,
        geometry: FrameGeometry,
    ) -> Result<Self, StageFailure> {
        let decode = DecodeStage::start(launcher, decision.decode_mode, geometry)?;
        let encode = EncodeStage::start(launcher, decision.encode_mode, geometry)?;
        Ok(Self {
            decision,
            decode,
            encode,
            stats: SessionStats::default(),
            started: Instant::now(),
        })
    }

    pub fn decision(&self) -> CapabilityDecision {
        self.decision
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Move frames decode → redact → encode, strictly in order, until a stage
    /// fails, the remuxer dies, or shutdown is requested.
    ///
    /// Only one frame is in flight at a time. If no frame moves for
    /// `stall_timeout` the loop ends with [`StageFailure::Stalled`].
    pub fn stream(
        &mut self,
        redactor: &Redactor,
        remux: &mut RemuxStage,
        stall_timeout: Duration,
        shutdown: &ShutdownSignal,
    ) -> StreamExit {
        // Remuxer health is rechecked several times per stall window
        let poll = POLL_INTERVAL.min(stall_timeout / 4);
        let mut last_progress = Instant::now();

        loop {
            if shutdown.is_triggered() {
                return StreamExit::Shutdown;
            }
            if let Err(failure) = remux.check() {
                return StreamExit::Failed(failure);
            }

            let frame = match self.decode.read_frame(poll) {
                Ok(frame) => frame,
                Err(StageFailure::Stalled { .. }) => {
                    let waited = last_progress.elapsed();
                    if waited >= stall_timeout {
                        return StreamExit::Failed(StageFailure::Stalled {
                            stage: StageKind::Decode,
                            waited,
                        });
                    }
                    continue;
                }
                Err(failure) => return StreamExit::Failed(failure),
            };

            let outcome = redactor.redact(frame);
            match outcome.status {
                RedactionStatus::Redacted { .. } => self.stats.frames_redacted += 1,
                RedactionStatus::NoFaces => {}
                RedactionStatus::DetectionFailed { .. } => self.stats.detection_failures += 1,
            }

            if let Err(failure) = self.encode.write_frame(outcome.frame, stall_timeout) {
                return StreamExit::Failed(failure);
            }
            self.stats.frames_forwarded += 1;
            if self.stats.frames_forwarded == 1 {
                tracing::info!("First frame forwarded ({})", self.decision);
            }
            last_progress = Instant::now();
        }
    }

    /// Stop both stages and log the session's counters.
    pub fn stop(mut self) -> SessionStats {
        self.encode.stop();
        self.decode.stop();
        tracing::info!(
            mode = %self.decision,
            forwarded = self.stats.frames_forwarded,
            redacted = self.stats.frames_redacted,
            detection_failures = self.stats.detection_failures,
            "Decode/encode stopped after {:.1}s",
            self.started.elapsed().as_secs_f64()
        );
        self.stats
    }
}
