//! Decode stage: source stream in, raw frames out.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::pipeline::framing::{FrameReader, ReadOutcome};
use crate::pipeline::types::{Frame, FrameGeometry, Mode};
use crate::stage::{StageHandle, StageLauncher, join_threads};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::Read;
use std::thread::JoinHandle;
use std::time::Duration;

enum DecodeEvent {
    Frame(Frame),
    End { partial_bytes: usize },
    Failed(String),
}

/// A running decoder plus the thread that cuts its output into frames.
///
/// The reader thread blocks on the pipe so the supervisor never does;
/// [`DecodeStage::read_frame`] waits on a channel with a deadline instead.
pub struct DecodeStage {
    handle: Box<dyn StageHandle>,
    mode: Mode,
    events: Option<Receiver<DecodeEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl DecodeStage {
    pub fn start(
        launcher: &dyn StageLauncher,
        mode: Mode,
        geometry: FrameGeometry,
    ) -> Result<Self, StageFailure> {
        let mut handle = launcher.launch_decode(mode)?;
        let Some(output) = handle.take_output() else {
            handle.terminate();
            return Err(StageFailure::StartFailed {
                stage: StageKind::Decode,
                message: "decoder has no output pipe".to_string(),
            });
        };

        // Rendezvous: the reader holds at most the frame it is handing over
        let (tx, rx) = crossbeam_channel::bounded(0);
        let spawned = std::thread::Builder::new()
            .name(format!("{}-reader", handle.name()))
            .spawn(move || pump_frames(output, geometry, tx));
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                handle.terminate();
                return Err(StageFailure::StartFailed {
                    stage: StageKind::Decode,
                    message: format!("failed to spawn reader thread: {}", e),
                });
            }
        };

        tracing::info!("Decoder started ({} mode)", mode);
        Ok(Self {
            handle,
            mode,
            events: Some(rx),
            reader: Some(reader),
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True while the decoder process is running.
    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    /// Wait up to `timeout` for the next complete frame.
    ///
    /// A partial frame at end of stream is discarded and reported as
    /// [`StageFailure::EndOfStream`].
    pub fn read_frame(&self, timeout: Duration) -> Result<Frame, StageFailure> {
        let Some(events) = &self.events else {
            return Err(StageFailure::Exited {
                stage: StageKind::Decode,
            });
        };

        match events.recv_timeout(timeout) {
            Ok(DecodeEvent::Frame(frame)) => Ok(frame),
            Ok(DecodeEvent::End { partial_bytes }) => {
                if partial_bytes > 0 {
                    tracing::warn!(
                        "Decoder output ended mid-frame, discarding {} bytes",
                        partial_bytes
                    );
                }
                Err(StageFailure::EndOfStream {
                    stage: StageKind::Decode,
                    partial_bytes,
                })
            }
            Ok(DecodeEvent::Failed(message)) => Err(StageFailure::Io {
                stage: StageKind::Decode,
                message,
            }),
            Err(RecvTimeoutError::Timeout) => Err(StageFailure::Stalled {
                stage: StageKind::Decode,
                waited: timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StageFailure::Exited {
                stage: StageKind::Decode,
            }),
        }
    }

    /// Kill the decoder and wait briefly for the reader thread.
    pub fn stop(&mut self) {
        self.handle.terminate();
        // Dropping the receiver unblocks a reader parked on send
        self.events.take();
        if let Some(reader) = self.reader.take() {
            join_threads(self.handle.name(), vec![reader], Duration::from_secs(1));
        }
    }
}

impl Drop for DecodeStage {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump_frames(output: Box<dyn Read + Send>, geometry: FrameGeometry, tx: Sender<DecodeEvent>) {
    let mut reader = FrameReader::new(output, geometry);
    loop {
        let event = match reader.read_frame() {
            Ok(ReadOutcome::Frame(frame)) => DecodeEvent::Frame(frame),
            Ok(ReadOutcome::End { partial_bytes }) => DecodeEvent::End { partial_bytes },
            Err(e) => DecodeEvent::Failed(e.to_string()),
        };
        let last = !matches!(event, DecodeEvent::Frame(_));
        if tx.send(event).is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{DecodeScript, MockLauncher};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TINY: FrameGeometry = FrameGeometry {
        width: 4,
        height: 2,
    };
    const SHORT: Duration = Duration::from_millis(100);

    #[test]
    fn test_reads_frames_in_order() {
        let launcher =
            MockLauncher::new(TINY).with_decode(Mode::Software, DecodeScript::FramesThenEnd(2));
        let decode = DecodeStage::start(&launcher, Mode::Software, TINY).unwrap();

        let first = decode.read_frame(SHORT).unwrap();
        let second = decode.read_frame(SHORT).unwrap();
        assert_eq!(first.as_bytes(), MockLauncher::synthetic_frame(TINY, 0).as_slice());
        assert_eq!(second.as_bytes(), MockLauncher::synthetic_frame(TINY, 1).as_slice());
        assert_eq!(
            decode.read_frame(SHORT).unwrap_err(),
            StageFailure::EndOfStream {
                stage: StageKind::Decode,
                partial_bytes: 0
            }
        );
    }

    #[test]
    fn test_partial_frame_is_never_emitted() {
        let launcher = MockLauncher::new(TINY).with_decode(
            Mode::Software,
            DecodeScript::FramesThenPartial {
                frames: 1,
                bytes: 23,
            },
        );
        let decode = DecodeStage::start(&launcher, Mode::Software, TINY).unwrap();

        assert!(decode.read_frame(SHORT).is_ok());
        assert_eq!(
            decode.read_frame(SHORT).unwrap_err(),
            StageFailure::EndOfStream {
                stage: StageKind::Decode,
                partial_bytes: 23
            }
        );
    }

    struct CountingReader {
        data: std::io::Cursor<Vec<u8>>,
        consumed: Arc<AtomicUsize>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.data.read(buf)?;
            self.consumed.fetch_add(n, Ordering::SeqCst);
            Ok(n)
        }
    }

    struct CountingHandle {
        output: Option<Box<dyn Read + Send>>,
    }

    impl StageHandle for CountingHandle {
        fn name(&self) -> &str {
            "decode-counting"
        }
        fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
            self.output.take()
        }
        fn take_input(&mut self) -> Option<Box<dyn std::io::Write + Send>> {
            None
        }
        fn is_alive(&mut self) -> bool {
            true
        }
        fn terminate(&mut self) {}
    }

    struct CountingLauncher {
        frames: usize,
        consumed: Arc<AtomicUsize>,
    }

    impl StageLauncher for CountingLauncher {
        fn launch_decode(&self, _mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
            let data = vec![7u8; self.frames * TINY.frame_size_bytes()];
            Ok(Box::new(CountingHandle {
                output: Some(Box::new(CountingReader {
                    data: std::io::Cursor::new(data),
                    consumed: Arc::clone(&self.consumed),
                })),
            }))
        }
        fn launch_encode(&self, _mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
            Err(StageFailure::StartFailed {
                stage: StageKind::Encode,
                message: "decode only".to_string(),
            })
        }
        fn launch_remux(&self) -> Result<Box<dyn StageHandle>, StageFailure> {
            Err(StageFailure::StartFailed {
                stage: StageKind::Remux,
                message: "decode only".to_string(),
            })
        }
    }

    #[test]
    fn test_reader_holds_only_the_frame_being_handed_over() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let launcher = CountingLauncher {
            frames: 5,
            consumed: Arc::clone(&consumed),
        };
        let decode = DecodeStage::start(&launcher, Mode::Software, TINY).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(consumed.load(Ordering::SeqCst), TINY.frame_size_bytes());

        decode.read_frame(SHORT).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(consumed.load(Ordering::SeqCst), 2 * TINY.frame_size_bytes());
    }

    #[test]
    fn test_partial_frame_on_open_pipe_is_a_stall() {
        let launcher = MockLauncher::new(TINY).with_decode(
            Mode::Software,
            DecodeScript::FramesThenPartialStall {
                frames: 1,
                bytes: 23,
            },
        );
        let mut decode = DecodeStage::start(&launcher, Mode::Software, TINY).unwrap();

        assert!(decode.read_frame(SHORT).is_ok());
        for _ in 0..2 {
            let failure = decode.read_frame(SHORT).unwrap_err();
            assert!(
                matches!(failure, StageFailure::Stalled { stage: StageKind::Decode, .. }),
                "got {:?}",
                failure
            );
        }

        decode.stop();
        assert_eq!(launcher.live_stages(), 0);
    }

    #[test]
    fn test_silence_is_a_stall() {
        let launcher =
            MockLauncher::new(TINY).with_decode(Mode::Software, DecodeScript::FramesThenStall(0));
        let mut decode = DecodeStage::start(&launcher, Mode::Software, TINY).unwrap();

        let failure = decode.read_frame(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(failure, StageFailure::Stalled { .. }));
        assert!(decode.is_alive());

        decode.stop();
        assert!(!decode.is_alive());
        assert_eq!(launcher.live_stages(), 0);
    }

    #[test]
    fn test_start_failure_propagates() {
        let launcher =
            MockLauncher::new(TINY).with_decode(Mode::Hardware, DecodeScript::StartFailure);
        let Err(failure) = DecodeStage::start(&launcher, Mode::Hardware, TINY) else {
            panic!("expected start failure");
        };
        assert!(matches!(failure, StageFailure::StartFailed { .. }));
        assert_eq!(launcher.live_stages(), 0);
    }
}
