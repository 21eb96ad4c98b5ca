//! The pipeline supervisor state machine.
//!
//! ```text
//! Probing ─▶ StartingMode(i) ─▶ Streaming(i) ─▶ Stalled(i) ─▶ StartingMode(i+1)
//!    ▲              │ start failed: i+1 ▲                            │ exhausted
//!    │              └───────────────────┘                            ▼
//!    └──────────────── cooldown ◀──────────────────────────── SessionFailed
//! ```
//!
//! The remuxer is started on the first `StartingMode` of an outer iteration
//! and survives mode fallbacks; only `SessionFailed` tears it down. The
//! machine never leaves the cycle on its own: only a shutdown request stops it.

use crate::config::Config;
use crate::pipeline::error::{ErrorReporter, LogReporter, StageFailure};
use crate::pipeline::redaction::Redactor;
use crate::pipeline::session::{Session, StreamExit};
use crate::pipeline::shutdown::ShutdownSignal;
use crate::pipeline::types::{CapabilityDecision, FrameGeometry};
use crate::probe::{CapabilityProber, candidate_modes};
use crate::stage::{RemuxStage, StageLauncher};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where the supervisor is.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorState {
    /// Probing the source before a new outer iteration.
    Probing,
    /// Starting decode and encode with candidate `i`.
    StartingMode(usize),
    /// Frames flowing with candidate `i`.
    Streaming(usize),
    /// Candidate `mode` stopped making progress.
    Stalled { mode: usize, failure: StageFailure },
    /// Everything is torn down; cooldown follows.
    SessionFailed { reason: String },
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Probing => write!(f, "PROBING"),
            SupervisorState::StartingMode(i) => write!(f, "DECODING_MODE[{}]", i),
            SupervisorState::Streaming(i) => write!(f, "STREAMING[{}]", i),
            SupervisorState::Stalled { mode, .. } => write!(f, "STALLED[{}]", mode),
            SupervisorState::SessionFailed { .. } => write!(f, "SESSION_FAILED"),
        }
    }
}

/// Notifications for embedders and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    /// A state was entered.
    Entered(SupervisorState),
    /// Candidate `index` is about to be started.
    ModeSelected {
        index: usize,
        decision: CapabilityDecision,
    },
    /// A stage failed.
    Failure(StageFailure),
    /// Cooldown before the next probe started.
    Cooldown(Duration),
    /// The supervisor stopped after a shutdown request.
    Stopped,
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub geometry: FrameGeometry,
    pub input_url: String,
    pub acceleration: bool,
    pub stall_timeout: Duration,
    pub cooldown: Duration,
    /// Optional event sender (crossbeam, non-blocking)
    pub event_tx: Option<crossbeam_channel::Sender<SupervisorEvent>>,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            geometry: config.geometry(),
            input_url: config.stream.input_url.clone(),
            acceleration: config.acceleration.enabled,
            stall_timeout: config.supervisor.stall_timeout(),
            cooldown: config.supervisor.cooldown(),
            event_tx: None,
        }
    }
}

pub struct Supervisor {
    launcher: Arc<dyn StageLauncher>,
    prober: Arc<dyn CapabilityProber>,
    redactor: Redactor,
    settings: SupervisorSettings,
    reporter: Arc<dyn ErrorReporter>,
    state: SupervisorState,
    candidates: Vec<CapabilityDecision>,
    remux: Option<RemuxStage>,
    session: Option<Session>,
    iteration: u64,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn StageLauncher>,
        prober: Arc<dyn CapabilityProber>,
        redactor: Redactor,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            launcher,
            prober,
            redactor,
            settings,
            reporter: Arc::new(LogReporter),
            state: SupervisorState::Probing,
            candidates: Vec::new(),
            remux: None,
            session: None,
            iteration: 0,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Outer iterations started so far (one per probe).
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Run until shutdown is requested, then tear every stage down.
    pub fn run(mut self, shutdown: ShutdownSignal) {
        tracing::info!(
            geometry = %self.settings.geometry,
            acceleration = self.settings.acceleration,
            "Supervisor started"
        );
        self.emit(SupervisorEvent::Entered(self.state.clone()));

        while !shutdown.is_triggered() {
            self.step(&shutdown);
        }

        self.stop_session();
        self.stop_remux();
        tracing::info!("Supervisor stopped");
        self.emit(SupervisorEvent::Stopped);
    }

    /// Execute the current state once and move to the next.
    ///
    /// `Streaming` blocks for as long as frames flow; `SessionFailed` blocks
    /// for the cooldown. Both return early on shutdown, leaving the state
    /// unchanged.
    pub fn step(&mut self, shutdown: &ShutdownSignal) {
        let next = match self.state.clone() {
            SupervisorState::Probing => self.probe(),
            SupervisorState::StartingMode(index) => self.start_mode(index),
            SupervisorState::Streaming(index) => match self.stream(index, shutdown) {
                Some(next) => next,
                None => return,
            },
            SupervisorState::Stalled { mode, .. } => {
                self.stop_session();
                SupervisorState::StartingMode(mode + 1)
            }
            SupervisorState::SessionFailed { .. } => {
                self.stop_session();
                self.stop_remux();
                let cooldown = self.settings.cooldown;
                tracing::info!("Retrying in {}s", cooldown.as_secs_f64());
                self.emit(SupervisorEvent::Cooldown(cooldown));
                if shutdown.wait(cooldown) {
                    return;
                }
                SupervisorState::Probing
            }
        };
        self.enter(next);
    }

    fn probe(&mut self) -> SupervisorState {
        self.iteration += 1;
        let report = self.prober.probe(&self.settings.input_url);
        self.candidates = candidate_modes(self.settings.acceleration);
        tracing::info!(
            iteration = self.iteration,
            codec = %report.video_codec,
            candidates = self.candidates.len(),
            "Capability probe complete"
        );
        SupervisorState::StartingMode(0)
    }

    fn start_mode(&mut self, index: usize) -> SupervisorState {
        let Some(&decision) = self.candidates.get(index) else {
            return SupervisorState::SessionFailed {
                reason: format!("all {} capability modes exhausted", self.candidates.len()),
            };
        };

        if self.remux.is_none() {
            match RemuxStage::start(self.launcher.as_ref()) {
                Ok(remux) => self.remux = Some(remux),
                Err(failure) => {
                    self.report(&decision.to_string(), &failure);
                    return SupervisorState::SessionFailed {
                        reason: failure.to_string(),
                    };
                }
            }
        }

        tracing::info!("Trying mode {} of {}: {}", index + 1, self.candidates.len(), decision);
        self.emit(SupervisorEvent::ModeSelected { index, decision });

        match Session::start(self.launcher.as_ref(), decision, self.settings.geometry) {
            Ok(session) => {
                self.session = Some(session);
                SupervisorState::Streaming(index)
            }
            Err(failure) => {
                self.report(&decision.to_string(), &failure);
                if failure.is_session_fatal() {
                    SupervisorState::SessionFailed {
                        reason: failure.to_string(),
                    }
                } else {
                    SupervisorState::StartingMode(index + 1)
                }
            }
        }
    }

    /// Returns `None` when streaming stopped for shutdown.
    fn stream(&mut self, index: usize, shutdown: &ShutdownSignal) -> Option<SupervisorState> {
        let exit = match (self.session.as_mut(), self.remux.as_mut()) {
            (Some(session), Some(remux)) => {
                session.stream(&self.redactor, remux, self.settings.stall_timeout, shutdown)
            }
            _ => {
                return Some(SupervisorState::SessionFailed {
                    reason: "no running stages to stream from".to_string(),
                });
            }
        };

        let failure = match exit {
            StreamExit::Shutdown => return None,
            StreamExit::Failed(failure) => failure,
        };

        let label = self.mode_label(index);
        self.report(&label, &failure);

        if failure.is_session_fatal() {
            Some(SupervisorState::SessionFailed {
                reason: failure.to_string(),
            })
        } else {
            Some(SupervisorState::Stalled {
                mode: index,
                failure,
            })
        }
    }

    fn enter(&mut self, next: SupervisorState) {
        match &next {
            SupervisorState::Stalled { failure, .. } => {
                tracing::warn!("Stalled ({}), falling back to next mode", failure)
            }
            SupervisorState::SessionFailed { reason } => {
                tracing::error!("Session failed: {}", reason)
            }
            state => tracing::debug!("Entering {}", state),
        }
        self.state = next;
        self.emit(SupervisorEvent::Entered(self.state.clone()));
    }

    fn mode_label(&self, index: usize) -> String {
        self.candidates
            .get(index)
            .map(|d| d.to_string())
            .unwrap_or_default()
    }

    fn report(&self, mode_label: &str, failure: &StageFailure) {
        self.reporter.report(mode_label, failure);
        self.emit(SupervisorEvent::Failure(failure.clone()));
    }

    fn emit(&self, event: SupervisorEvent) {
        if let Some(ref tx) = self.settings.event_tx
            && tx.try_send(event).is_err()
        {
            tracing::debug!("Supervisor event dropped");
        }
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn stop_remux(&mut self) {
        if let Some(mut remux) = self.remux.take() {
            remux.stop();
            tracing::info!("Remuxer stopped");
        }
    }
}
