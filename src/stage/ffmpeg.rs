//! ffmpeg-backed stages.
//!
//! Argument lists are built by pure functions so they can be checked without
//! running ffmpeg.

use crate::config::Config;
use crate::defaults;
use crate::pipeline::error::{StageFailure, StageKind};
use crate::pipeline::types::{FrameGeometry, Mode};
use crate::stage::process::{ChildStage, Pipes};
use crate::stage::{StageHandle, StageLauncher};
use std::path::PathBuf;

/// Launches decode, encode and remux stages as ffmpeg processes.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
    input_url: String,
    intermediate_url: String,
    output_url: String,
    geometry: FrameGeometry,
    fps: u32,
    audio_codec: String,
    audio_bitrate: String,
}

impl FfmpegLauncher {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.tools.ffmpeg.clone(),
            input_url: config.stream.input_url.clone(),
            intermediate_url: config.stream.intermediate_url.clone(),
            output_url: config.stream.output_url.clone(),
            geometry: config.geometry(),
            fps: config.frame.fps,
            audio_codec: config.remux.audio_codec.clone(),
            audio_bitrate: config.remux.audio_bitrate.clone(),
        }
    }

    /// Source stream → raw BGR24 frames on stdout.
    pub fn decode_args(&self, mode: Mode) -> Vec<String> {
        let mut args = quiet_args();
        args.push("-nostdin".into());
        if mode == Mode::Hardware {
            args.extend(["-hwaccel".into(), "cuda".into()]);
        }
        args.extend([
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            defaults::RECONNECT_DELAY_MAX_SECS.to_string(),
            "-i".into(),
            self.input_url.clone(),
            "-an".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-s".into(),
            self.geometry.to_string(),
            "-".into(),
        ]);
        args
    }

    /// Raw BGR24 frames on stdin → H.264 MPEG-TS on the intermediate endpoint.
    pub fn encode_args(&self, mode: Mode) -> Vec<String> {
        let mut args = quiet_args();
        args.extend([
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-s".into(),
            self.geometry.to_string(),
            "-r".into(),
            self.fps.to_string(),
            "-i".into(),
            "-".into(),
            "-c:v".into(),
        ]);
        match mode {
            Mode::Hardware => args.extend([
                "h264_nvenc".into(),
                "-preset".into(),
                "p1".into(),
                "-tune".into(),
                "ull".into(),
            ]),
            Mode::Software => args.extend([
                "libx264".into(),
                "-preset".into(),
                "ultrafast".into(),
                "-tune".into(),
                "zerolatency".into(),
            ]),
        }
        args.extend([
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-g".into(),
            self.fps.to_string(),
            "-f".into(),
            "mpegts".into(),
            self.intermediate_url.clone(),
        ]);
        args
    }

    /// Redacted video + original audio → final output.
    pub fn remux_args(&self) -> Vec<String> {
        let mut args = quiet_args();
        args.extend([
            "-nostdin".into(),
            "-use_wallclock_as_timestamps".into(),
            "1".into(),
            "-i".into(),
            self.intermediate_url.clone(),
            "-use_wallclock_as_timestamps".into(),
            "1".into(),
            "-i".into(),
            self.input_url.clone(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0?".into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            self.audio_codec.clone(),
            "-b:a".into(),
            self.audio_bitrate.clone(),
            "-f".into(),
            "flv".into(),
            self.output_url.clone(),
        ]);
        args
    }

    fn spawn(
        &self,
        kind: StageKind,
        name: &str,
        args: Vec<String>,
        pipes: Pipes,
    ) -> Result<Box<dyn StageHandle>, StageFailure> {
        let stage = ChildStage::spawn(kind, name, &self.ffmpeg, &args, pipes)?;
        tracing::debug!(stage = name, pid = stage.id(), "Stage started");
        Ok(Box::new(stage))
    }
}

fn quiet_args() -> Vec<String> {
    vec!["-hide_banner".into(), "-loglevel".into(), "error".into()]
}

impl StageLauncher for FfmpegLauncher {
    fn launch_decode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.spawn(
            StageKind::Decode,
            &format!("decode-{}", mode),
            self.decode_args(mode),
            Pipes::OUTPUT,
        )
    }

    fn launch_encode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.spawn(
            StageKind::Encode,
            &format!("encode-{}", mode),
            self.encode_args(mode),
            Pipes::INPUT,
        )
    }

    fn launch_remux(&self) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.spawn(StageKind::Remux, "remux", self.remux_args(), Pipes::NONE)
    }
}
