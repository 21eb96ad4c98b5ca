//! External pipeline stages.
//!
//! A stage is a long-running external transformation (decode, encode, remux)
//! that exchanges bytes with the supervisor over pipes. [`StageLauncher`]
//! starts stages in a given [`Mode`]; [`StageHandle`] is the raw process-level
//! handle, wrapped by [`DecodeStage`], [`EncodeStage`] and [`RemuxStage`] for
//! frame-level I/O with stall detection.

pub mod decode;
pub mod encode;
pub mod ffmpeg;
pub mod mock;
pub mod process;
pub mod remux;

use crate::pipeline::error::StageFailure;
use crate::pipeline::types::Mode;
use std::io::{Read, Write};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub use decode::DecodeStage;
pub use encode::EncodeStage;
pub use ffmpeg::FfmpegLauncher;
pub use mock::{DecodeScript, EncodeScript, MockLauncher, RemuxScript};
pub use process::ChildStage;
pub use remux::RemuxStage;

/// Process-level handle to one running stage.
pub trait StageHandle: Send {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Takes the stage's output pipe. Returns `None` after the first call
    /// or if the stage produces no output.
    fn take_output(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Takes the stage's input pipe. Returns `None` after the first call
    /// or if the stage accepts no input.
    fn take_input(&mut self) -> Option<Box<dyn Write + Send>>;

    /// True while the stage is running.
    fn is_alive(&mut self) -> bool;

    /// Stops the stage and reaps it. Safe to call more than once.
    fn terminate(&mut self);
}

/// Starts stages.
pub trait StageLauncher: Send + Sync {
    fn launch_decode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure>;

    fn launch_encode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure>;

    fn launch_remux(&self) -> Result<Box<dyn StageHandle>, StageFailure>;
}

/// Join helper threads, giving them until `timeout` to finish.
///
/// Threads still running at the deadline are detached; a panicked thread is
/// logged with its message.
pub(crate) fn join_threads(label: &str, mut threads: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let poll_interval = Duration::from_millis(10);

    loop {
        let mut remaining = Vec::new();
        for handle in threads.drain(..) {
            if handle.is_finished() {
                if let Err(panic_info) = handle.join() {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    tracing::error!("{} thread panicked: {}", label, msg);
                }
            } else {
                remaining.push(handle);
            }
        }
        threads = remaining;

        if threads.is_empty() {
            return;
        }

        if Instant::now() >= deadline {
            tracing::warn!(
                "{}: {} thread(s) did not finish within {:?}, detaching",
                label,
                threads.len(),
                timeout
            );
            return;
        }

        std::thread::sleep(poll_interval);
    }
}
