//! Encode stage: raw frames in, compressed video published to the intermediate endpoint.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::pipeline::framing::FrameWriter;
use crate::pipeline::types::{Frame, FrameGeometry, Mode};
use crate::stage::{StageHandle, StageLauncher, join_threads};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::io::Write;
use std::thread::JoinHandle;
use std::time::Duration;

/// A running encoder plus the thread that feeds its input pipe.
///
/// Frames are handed over through a rendezvous channel, so a write that does
/// not complete within the timeout means the encoder stopped consuming.
pub struct EncodeStage {
    handle: Box<dyn StageHandle>,
    mode: Mode,
    frames: Option<Sender<Frame>>,
    errors: Receiver<String>,
    writer: Option<JoinHandle<()>>,
}

impl EncodeStage {
    pub fn start(
        launcher: &dyn StageLauncher,
        mode: Mode,
        geometry: FrameGeometry,
    ) -> Result<Self, StageFailure> {
        let mut handle = launcher.launch_encode(mode)?;
        let Some(input) = handle.take_input() else {
            handle.terminate();
            return Err(StageFailure::StartFailed {
                stage: StageKind::Encode,
                message: "encoder has no input pipe".to_string(),
            });
        };

        let (frame_tx, frame_rx) = crossbeam_channel::bounded(0);
        let (error_tx, error_rx) = crossbeam_channel::bounded(1);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-writer", handle.name()))
            .spawn(move || pump_frames(input, geometry, frame_rx, error_tx));
        let writer = match spawned {
            Ok(writer) => writer,
            Err(e) => {
                handle.terminate();
                return Err(StageFailure::StartFailed {
                    stage: StageKind::Encode,
                    message: format!("failed to spawn writer thread: {}", e),
                });
            }
        };

        tracing::info!("Encoder started ({} mode)", mode);
        Ok(Self {
            handle,
            mode,
            frames: Some(frame_tx),
            errors: error_rx,
            writer: Some(writer),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True while the encoder process is running.
    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    /// Hand one frame to the encoder, waiting at most `timeout`.
    pub fn write_frame(&self, frame: Frame, timeout: Duration) -> Result<(), StageFailure> {
        let Some(frames) = &self.frames else {
            return Err(StageFailure::Exited {
                stage: StageKind::Encode,
            });
        };

        match frames.send_timeout(frame, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(StageFailure::Stalled {
                stage: StageKind::Encode,
                waited: timeout,
            }),
            Err(SendTimeoutError::Disconnected(_)) => Err(match self.errors.try_recv() {
                Ok(message) => StageFailure::Io {
                    stage: StageKind::Encode,
                    message,
                },
                Err(_) => StageFailure::Exited {
                    stage: StageKind::Encode,
                },
            }),
        }
    }

    /// Close the input, kill the encoder, and wait briefly for the writer thread.
    pub fn stop(&mut self) {
        self.frames.take();
        self.handle.terminate();
        if let Some(writer) = self.writer.take() {
            join_threads(self.handle.name(), vec![writer], Duration::from_secs(1));
        }
    }
}

impl Drop for EncodeStage {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_frames(
    input: Box<dyn Write + Send>,
    geometry: FrameGeometry,
    frames: Receiver<Frame>,
    errors: Sender<String>,
) {
    let mut writer = FrameWriter::new(input, geometry);
    for frame in frames.iter() {
        if let Err(e) = writer.write_frame(&frame) {
            if errors.try_send(e.to_string()).is_err() {
                tracing::debug!("Encoder write error dropped: {}", e);
            }
            return;
        }
    }
}
