//! Capability probing of the source stream.
//!
//! Runs once per session before any stage starts. The probe only informs the
//! logs: hardware modes are always tried first, because a hardware stage that
//! cannot handle the stream fails fast at start and the next candidate runs.

use crate::defaults;
use crate::pipeline::types::{CapabilityDecision, Mode};
use crate::sys;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Codec reported when the source could not be identified.
pub const UNKNOWN_CODEC: &str = "unknown";

/// What the probe learned about the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub video_codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
}

impl ProbeReport {
    pub fn unknown() -> Self {
        Self {
            video_codec: UNKNOWN_CODEC.to_string(),
            width: None,
            height: None,
            has_audio: false,
        }
    }

    pub fn is_known(&self) -> bool {
        self.video_codec != UNKNOWN_CODEC
    }
}

/// Trait for source probing.
pub trait CapabilityProber: Send + Sync {
    /// Identify the source. Never fails: an unreachable or unparseable source
    /// yields [`ProbeReport::unknown`].
    fn probe(&self, url: &str) -> ProbeReport;
}

/// Ordered decode/encode pairs to try, best first.
pub fn candidate_modes(acceleration: bool) -> Vec<CapabilityDecision> {
    if acceleration {
        vec![
            CapabilityDecision::new(Mode::Hardware, Mode::Hardware),
            CapabilityDecision::new(Mode::Software, Mode::Hardware),
            CapabilityDecision::new(Mode::Software, Mode::Software),
        ]
    } else {
        vec![CapabilityDecision::new(Mode::Software, Mode::Software)]
    }
}

/// Probes with `ffprobe`, bounded by a timeout.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// `timeout` is capped at the ten second probe limit.
    pub fn new(ffprobe: &Path, timeout: Duration) -> Self {
        Self {
            ffprobe: ffprobe.to_path_buf(),
            timeout: timeout.min(Duration::from_secs(defaults::PROBE_TIMEOUT_SECS)),
        }
    }

    pub fn args(url: &str) -> Vec<String> {
        [
            "-v",
            "error",
            "-show_entries",
            "stream=codec_type,codec_name,width,height",
            "-of",
            "json",
            url,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn run(&self, url: &str) -> Result<String, String> {
        let mut command = Command::new(&self.ffprobe);
        command
            .args(Self::args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        sys::kill_on_parent_death(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| format!("failed to execute {}: {}", self.ffprobe.display(), e))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| "ffprobe stdout unavailable".to_string())?;

        // Read on a helper thread so the deadline holds even if ffprobe hangs
        let (tx, rx) = crossbeam_channel::bounded(1);
        let reader = std::thread::Builder::new()
            .name("probe-reader".to_string())
            .spawn(move || {
                let mut out = String::new();
                let result = stdout.read_to_string(&mut out).map(|_| out);
                if tx.send(result).is_err() {
                    tracing::debug!("Probe finished after its deadline");
                }
            });
        if let Err(e) = reader {
            kill_and_reap(&mut child);
            return Err(format!("failed to spawn probe reader: {}", e));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(out)) => {
                let status = child.wait().map_err(|e| e.to_string())?;
                if status.success() {
                    Ok(out)
                } else {
                    Err(format!("ffprobe exited with {}", status))
                }
            }
            Ok(Err(e)) => {
                kill_and_reap(&mut child);
                Err(format!("failed to read ffprobe output: {}", e))
            }
            Err(_) => {
                kill_and_reap(&mut child);
                Err(format!("timed out after {:?}", self.timeout))
            }
        }
    }
}

fn kill_and_reap(child: &mut std::process::Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill ffprobe: {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::debug!("Failed to reap ffprobe: {}", e);
    }
}

impl CapabilityProber for FfprobeProber {
    fn probe(&self, url: &str) -> ProbeReport {
        let report = self
            .run(url)
            .and_then(|json| parse_report(&json).ok_or_else(|| "unparseable output".to_string()));

        match report {
            Ok(report) => {
                tracing::info!(
                    codec = %report.video_codec,
                    audio = report.has_audio,
                    "Source probed"
                );
                report
            }
            Err(e) => {
                tracing::warn!("Source probe failed, codec unknown: {}", e);
                ProbeReport::unknown()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Parse `ffprobe -of json` output.
///
/// Returns `None` for malformed JSON. A stream list without video yields an
/// unknown codec.
pub fn parse_report(json: &str) -> Option<ProbeReport> {
    let output: FfprobeOutput = serde_json::from_str(json).ok()?;
    let mut report = ProbeReport::unknown();

    if let Some(video) = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
    {
        if let Some(codec) = video.codec_name.as_deref().filter(|c| !c.is_empty()) {
            report.video_codec = codec.to_string();
        }
        report.width = video.width;
        report.height = video.height;
    }
    report.has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    Some(report)
}

/// Prober that returns a fixed report, for tests.
#[derive(Debug)]
pub struct MockProber {
    report: ProbeReport,
    calls: AtomicUsize,
}

impl MockProber {
    pub fn new(report: ProbeReport) -> Self {
        Self {
            report,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockProber {
    fn default() -> Self {
        Self::new(ProbeReport::unknown())
    }
}

impl CapabilityProber for MockProber {
    fn probe(&self, _url: &str) -> ProbeReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.report.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_with_acceleration_are_hardware_first() {
        let modes = candidate_modes(true);
        assert_eq!(modes.len(), 3);
        assert_eq!(modes[0], CapabilityDecision::new(Mode::Hardware, Mode::Hardware));
        assert_eq!(
            modes.last(),
            Some(&CapabilityDecision::new(Mode::Software, Mode::Software))
        );
    }

    #[test]
    fn test_candidates_without_acceleration_are_software_only() {
        assert_eq!(
            candidate_modes(false),
            vec![CapabilityDecision::new(Mode::Software, Mode::Software)]
        );
    }

    #[test]
    fn test_parse_report_video_and_audio() {
        let json = r#"{
            "programs": [],
            "streams": [
                {"codec_name": "h264", "codec_type": "video", "width": 1280, "height": 720},
                {"codec_name": "aac", "codec_type": "audio"}
            ]
        }"#;
        let report = parse_report(json).unwrap();
        assert_eq!(report.video_codec, "h264");
        assert_eq!(report.width, Some(1280));
        assert_eq!(report.height, Some(720));
        assert!(report.has_audio);
        assert!(report.is_known());
    }

    #[test]
    fn test_parse_report_without_video_is_unknown() {
        let json = r#"{"streams": [{"codec_name": "aac", "codec_type": "audio"}]}"#;
        let report = parse_report(json).unwrap();
        assert!(!report.is_known());
        assert!(report.has_audio);
    }

    #[test]
    fn test_parse_report_rejects_garbage() {
        assert!(parse_report("not json").is_none());
    }

    #[test]
    fn test_timeout_is_capped_at_ten_seconds() {
        let prober = FfprobeProber::new(Path::new("ffprobe"), Duration::from_secs(60));
        assert_eq!(prober.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_ffprobe_reports_unknown() {
        let prober = FfprobeProber::new(
            Path::new("/nonexistent/veilcast/ffprobe"),
            Duration::from_secs(1),
        );
        assert_eq!(prober.probe("srt://127.0.0.1:9"), ProbeReport::unknown());
    }

    #[test]
    fn test_mock_prober_counts_calls() {
        let prober = MockProber::default();
        prober.probe("a");
        prober.probe("b");
        assert_eq!(prober.calls(), 2);
    }
}
