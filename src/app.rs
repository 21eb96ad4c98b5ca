//! Service entry point.
//!
//! Wires the detector, the ffmpeg stages and the prober into a supervisor,
//! runs it on a dedicated blocking thread, and stops it on SIGINT/SIGTERM.

use crate::config::Config;
use crate::detect::load_detector;
use crate::error::{Result, VeilcastError};
use crate::pipeline::redaction::Redactor;
use crate::pipeline::shutdown::shutdown_channel;
use crate::pipeline::supervisor::{Supervisor, SupervisorSettings};
use crate::probe::FfprobeProber;
use crate::stage::FfmpegLauncher;
use std::sync::Arc;

/// Build a supervisor for `config`.
///
/// Validation and detector loading happen here, so configuration errors stop
/// the process before any stage is started.
pub fn build_supervisor(config: &Config) -> Result<Supervisor> {
    config.validate()?;

    let detector = load_detector(&config.detector, config.acceleration.enabled)?;
    let redactor = Redactor::new(detector)
        .with_threshold(config.detector.confidence_threshold)
        .with_failure_policy(config.detector.failure_policy);

    let launcher = Arc::new(FfmpegLauncher::from_config(config));
    let prober = Arc::new(FfprobeProber::new(
        &config.tools.ffprobe,
        config.supervisor.probe_timeout(),
    ));

    Ok(Supervisor::new(
        launcher,
        prober,
        redactor,
        SupervisorSettings::from_config(config),
    ))
}

/// Run the relay until a termination signal arrives.
pub async fn run_service(config: Config) -> Result<()> {
    let supervisor = build_supervisor(&config)?;
    tracing::info!(
        input = %config.stream.input_url,
        output = %config.stream.output_url,
        "veilcast {} starting",
        crate::version_string()
    );

    let (trigger, shutdown) = shutdown_channel();
    // Stages get PR_SET_PDEATHSIG, so they must be spawned from a thread that
    // lives as long as the supervisor: the blocking task owns one for its run.
    let mut supervisor_task = tokio::task::spawn_blocking(move || supervisor.run(shutdown));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("Error setting up signal handler: {}", e);
            }
            tracing::info!("Received SIGTERM, shutting down...");
        }
        res = &mut supervisor_task => {
            return match res {
                Ok(()) => Err(VeilcastError::Other("supervisor stopped unexpectedly".to_string())),
                Err(e) => Err(VeilcastError::Other(format!("supervisor thread failed: {}", e))),
            };
        }
    }

    trigger.trigger();
    supervisor_task
        .await
        .map_err(|e| VeilcastError::Other(format!("supervisor thread failed: {}", e)))
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| VeilcastError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
