//! End-to-end recovery behaviour of the supervisor against scripted stages.
//!
//! Each test runs the real supervisor loop on its own thread and observes it
//! through the event channel.

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use veilcast::detect::{Detection, MockFaceDetector};
use veilcast::pipeline::redaction::Redactor;
use veilcast::pipeline::types::{FrameGeometry, Mode};
use veilcast::probe::MockProber;
use veilcast::stage::{DecodeScript, MockLauncher, RemuxScript};
use veilcast::{
    ShutdownTrigger, StageFailure, StageKind, Supervisor, SupervisorEvent, SupervisorSettings,
    SupervisorState, shutdown_channel,
};

const TINY: FrameGeometry = FrameGeometry {
    width: 8,
    height: 8,
};

const WAIT: Duration = Duration::from_secs(10);

struct Running {
    trigger: Option<ShutdownTrigger>,
    events: Receiver<SupervisorEvent>,
    thread: JoinHandle<()>,
    seen: Vec<SupervisorEvent>,
}

impl Running {
    /// Collect events until `pred` matches one, failing the test after `WAIT`.
    fn wait_for(&mut self, pred: impl Fn(&SupervisorEvent) -> bool) -> SupervisorEvent {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = self
                .events
                .recv_timeout(remaining)
                .unwrap_or_else(|_| panic!("event not seen in time, got: {:#?}", self.seen));
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    fn count(&self, pred: impl Fn(&SupervisorEvent) -> bool) -> usize {
        self.seen.iter().filter(|e| pred(e)).count()
    }

    fn shutdown(mut self) -> Vec<SupervisorEvent> {
        self.trigger.take().expect("trigger present").trigger();
        self.wait_for(|e| *e == SupervisorEvent::Stopped);
        self.thread.join().unwrap();
        self.seen
    }
}

fn start(launcher: Arc<MockLauncher>, detector: MockFaceDetector, acceleration: bool) -> Running {
    let (event_tx, events) = crossbeam_channel::unbounded();
    let settings = SupervisorSettings {
        geometry: TINY,
        input_url: "srt://127.0.0.1:9000".to_string(),
        acceleration,
        stall_timeout: Duration::from_millis(150),
        cooldown: Duration::from_millis(20),
        event_tx: Some(event_tx),
    };
    let redactor = Redactor::new(Arc::new(detector.with_input_size(8))).with_blur_sigma(2.0);
    let supervisor = Supervisor::new(
        launcher,
        Arc::new(MockProber::default()),
        redactor,
        settings,
    );

    let (trigger, shutdown) = shutdown_channel();
    let thread = std::thread::spawn(move || supervisor.run(shutdown));
    Running {
        trigger: Some(trigger),
        events,
        thread,
        seen: Vec::new(),
    }
}

fn entered(state: SupervisorState) -> impl Fn(&SupervisorEvent) -> bool {
    move |e| *e == SupervisorEvent::Entered(state.clone())
}

fn is_session_failed(e: &SupervisorEvent) -> bool {
    matches!(
        e,
        SupervisorEvent::Entered(SupervisorState::SessionFailed { .. })
    )
}

#[test]
fn hardware_start_failure_falls_back_to_software_decode() {
    let launcher = Arc::new(
        MockLauncher::new(TINY)
            .with_decode(Mode::Hardware, DecodeScript::StartFailure)
            .with_decode(Mode::Software, DecodeScript::FramesThenStall(4)),
    );
    let mut running = start(launcher.clone(), MockFaceDetector::new(), true);

    running.wait_for(entered(SupervisorState::Streaming(1)));
    running.wait_for(|e| matches!(e, SupervisorEvent::Entered(SupervisorState::Stalled { mode: 1, .. })));
    let events = running.shutdown();

    assert!(events.iter().any(|e| matches!(
        e,
        SupervisorEvent::Failure(StageFailure::StartFailed { .. })
    )));
    assert_eq!(launcher.encoded_frames().len(), 4);
    assert_eq!(launcher.encoded_frames()[3], MockLauncher::synthetic_frame(TINY, 3));
    // The remuxer from the first attempt carried over to the fallback mode
    let launches = launcher.launches();
    assert_eq!(&launches[..4], ["remux", "decode:hardware", "decode:software", "encode:hardware"]);
    assert_eq!(launcher.live_stages(), 0);
}

#[test]
fn partial_trailing_frame_is_dropped_and_next_mode_runs() {
    let launcher = Arc::new(MockLauncher::new(TINY).with_decode(
        Mode::Hardware,
        DecodeScript::FramesThenPartial {
            frames: 2,
            bytes: 17,
        },
    ));
    let mut running = start(launcher.clone(), MockFaceDetector::new(), true);

    let failure = running.wait_for(|e| matches!(e, SupervisorEvent::Failure(_)));
    assert_eq!(
        failure,
        SupervisorEvent::Failure(StageFailure::EndOfStream {
            stage: StageKind::Decode,
            partial_bytes: 17,
        })
    );
    running.wait_for(|e| matches!(e, SupervisorEvent::ModeSelected { index: 1, .. }));
    running.shutdown();

    // Only whole frames reach the encoder
    assert_eq!(launcher.encoded_frames().len(), 2);
    assert_eq!(launcher.launch_count("remux"), 1);
}

#[test]
fn frame_missing_one_byte_on_open_pipe_stalls_into_next_mode() {
    let one_short = TINY.frame_size_bytes() - 1;
    let launcher = Arc::new(MockLauncher::new(TINY).with_decode(
        Mode::Hardware,
        DecodeScript::FramesThenPartialStall {
            frames: 1,
            bytes: one_short,
        },
    ));
    let mut running = start(launcher.clone(), MockFaceDetector::new(), true);

    let started = Instant::now();
    let failure = running.wait_for(|e| matches!(e, SupervisorEvent::Failure(_)));
    assert!(
        matches!(
            failure,
            SupervisorEvent::Failure(StageFailure::Stalled {
                stage: StageKind::Decode,
                ..
            })
        ),
        "got {:?}",
        failure
    );
    running.wait_for(|e| matches!(e, SupervisorEvent::ModeSelected { index: 1, .. }));
    // Stall window is 150ms; the fallback must not wait for the stream to close
    assert!(started.elapsed() < Duration::from_secs(5));
    running.shutdown();

    assert_eq!(launcher.encoded_frames().len(), 1);
    assert_eq!(launcher.launch_count("remux"), 1);
    assert_eq!(launcher.live_stages(), 0);
}

#[test]
fn detection_failure_forwards_frame_and_next_frame_is_redacted() {
    let launcher = Arc::new(
        MockLauncher::new(TINY).with_decode(Mode::Software, DecodeScript::FramesThenStall(3)),
    );
    let detector = MockFaceDetector::new()
        .with_detections(vec![Detection::new(0.0, 0.0, 1.0, 1.0, 0.95)])
        .failing_on(&[1]);
    let mut running = start(launcher.clone(), detector, false);

    running.wait_for(|e| matches!(e, SupervisorEvent::Entered(SupervisorState::Stalled { .. })));
    running.shutdown();

    let frames = launcher.encoded_frames();
    assert_eq!(frames.len(), 3, "no frame may be dropped");
    assert_ne!(frames[0], MockLauncher::synthetic_frame(TINY, 0));
    assert_eq!(frames[1], MockLauncher::synthetic_frame(TINY, 1));
    assert_ne!(frames[2], MockLauncher::synthetic_frame(TINY, 2));
}

#[test]
fn supervisor_keeps_cycling_after_repeated_exhaustion() {
    let launcher = Arc::new(MockLauncher::new(TINY));
    let mut running = start(launcher.clone(), MockFaceDetector::new(), true);

    for _ in 0..3 {
        running.wait_for(entered(SupervisorState::Probing));
    }
    assert_eq!(running.count(is_session_failed), 2);
    assert_eq!(
        running.count(|e| matches!(e, SupervisorEvent::Cooldown(_))),
        2
    );
    assert!(!running.thread.is_finished());

    running.shutdown();
    // One remuxer per outer iteration, each torn down on failure
    assert!(launcher.launch_count("remux") >= 2);
    assert_eq!(launcher.live_stages(), 0);
}

#[test]
fn remux_death_fails_session_and_restarts_remux() {
    let launcher = Arc::new(
        MockLauncher::new(TINY)
            .with_remux(RemuxScript::DiesAfter(Duration::from_millis(30))),
    );
    let mut running = start(launcher.clone(), MockFaceDetector::new(), false);

    running.wait_for(is_session_failed);
    running.wait_for(entered(SupervisorState::Probing));
    running.wait_for(entered(SupervisorState::Streaming(0)));
    let events = running.shutdown();

    assert!(events.contains(&SupervisorEvent::Failure(StageFailure::Exited {
        stage: StageKind::Remux,
    })));
    assert!(launcher.launch_count("remux") >= 2);
    assert_eq!(launcher.live_stages(), 0);
}
