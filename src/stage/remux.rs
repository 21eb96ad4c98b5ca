//! Remux stage: joins the redacted video with the source audio and publishes it.
//!
//! It reads the encoder's output from the intermediate endpoint rather than a
//! pipe, so it keeps running while decode and encode are restarted underneath.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::stage::{StageHandle, StageLauncher};

pub struct RemuxStage {
    handle: Box<dyn StageHandle>,
}

impl RemuxStage {
    pub fn start(launcher: &dyn StageLauncher) -> Result<Self, StageFailure> {
        let handle = launcher.launch_remux()?;
        tracing::info!("Remuxer started");
        Ok(Self { handle })
    }

    pub fn is_alive(&mut self) -> bool {
        self.handle.is_alive()
    }

    /// Returns the failure to report if the remuxer is gone.
    pub fn check(&mut self) -> Result<(), StageFailure> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(StageFailure::Exited {
                stage: StageKind::Remux,
            })
        }
    }

    pub fn stop(&mut self) {
        self.handle.terminate();
    }
}

impl Drop for RemuxStage {
    fn drop(&mut self) {
        self.stop();
    }
}
