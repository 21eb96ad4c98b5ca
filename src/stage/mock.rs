//! Scripted in-process stages for tests.
//!
//! [`MockLauncher`] hands out stages whose behaviour is fixed up front:
//! decoders emit synthetic frames and then stall, end, or cut a frame short;
//! encoders record what they receive or stop consuming; remuxers stay up or
//! die after a delay. Launch attempts and live stages are counted so tests can
//! check fallback order and teardown.

use crate::pipeline::error::{StageFailure, StageKind};
use crate::pipeline::types::{FrameGeometry, Mode};
use crate::stage::{StageHandle, StageLauncher};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a mock decoder does.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeScript {
    /// Emit this many frames, then keep the stream open without data.
    FramesThenStall(usize),
    /// Emit this many frames, then close the stream.
    FramesThenEnd(usize),
    /// Emit frames, then `bytes` of an incomplete frame, then close.
    FramesThenPartial { frames: usize, bytes: usize },
    /// Emit frames, then `bytes` of an incomplete frame, then keep the stream
    /// open without data.
    FramesThenPartialStall { frames: usize, bytes: usize },
    /// Fail to start in this mode.
    StartFailure,
    /// The executable does not exist.
    Unlaunchable,
}

/// What a mock encoder does.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeScript {
    /// Accept every frame.
    Accept,
    /// Accept this many frames, then stop reading.
    StallAfter(usize),
    /// Fail to start in this mode.
    StartFailure,
    /// The executable does not exist.
    Unlaunchable,
}

/// What a mock remuxer does.
#[derive(Debug, Clone, PartialEq)]
pub enum RemuxScript {
    /// Stay up until terminated.
    Healthy,
    /// Report itself dead after this long.
    DiesAfter(Duration),
    /// The executable does not exist.
    Unlaunchable,
}

#[derive(Default)]
struct Scripts {
    decode: HashMap<Mode, VecDeque<DecodeScript>>,
    encode: HashMap<Mode, VecDeque<EncodeScript>>,
    remux: VecDeque<RemuxScript>,
}

/// Launcher producing scripted stages.
///
/// Scripts are queued per mode and consumed one per launch. When a queue is
/// empty the defaults apply: decoders stall without producing anything,
/// encoders accept everything, remuxers stay healthy.
pub struct MockLauncher {
    geometry: FrameGeometry,
    scripts: Mutex<Scripts>,
    launches: Mutex<Vec<String>>,
    live: Arc<AtomicUsize>,
    encoded: Arc<Mutex<Vec<u8>>>,
}

impl MockLauncher {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            scripts: Mutex::new(Scripts::default()),
            launches: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
            encoded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a script for the next decoder launched in `mode`.
    pub fn with_decode(self, mode: Mode, script: DecodeScript) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.decode.entry(mode).or_default().push_back(script);
        }
        self
    }

    /// Queue a script for the next encoder launched in `mode`.
    pub fn with_encode(self, mode: Mode, script: EncodeScript) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.encode.entry(mode).or_default().push_back(script);
        }
        self
    }

    /// Queue a script for the next remuxer.
    pub fn with_remux(self, script: RemuxScript) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.remux.push_back(script);
        }
        self
    }

    /// Every launch attempt in order, e.g. `"decode:hardware"` or `"remux"`.
    pub fn launches(&self) -> Vec<String> {
        self.launches
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Number of launch attempts whose label starts with `prefix`.
    pub fn launch_count(&self, prefix: &str) -> usize {
        self.launches()
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    /// Stages started and not yet terminated.
    pub fn live_stages(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// All frames every encoder received, split into frames.
    pub fn encoded_frames(&self) -> Vec<Vec<u8>> {
        let size = self.geometry.frame_size_bytes();
        self.encoded
            .lock()
            .map(|bytes| bytes.chunks_exact(size).map(<[u8]>::to_vec).collect())
            .unwrap_or_default()
    }

    /// Deterministic content for the `index`-th frame of a decoder.
    pub fn synthetic_frame(geometry: FrameGeometry, index: usize) -> Vec<u8> {
        (0..geometry.frame_size_bytes())
            .map(|i| ((i * 31 + index * 17) % 251) as u8)
            .collect()
    }

    fn record(&self, label: String) {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(label);
        }
    }

    fn next_decode(&self, mode: Mode) -> DecodeScript {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.decode.get_mut(&mode).and_then(VecDeque::pop_front))
            .unwrap_or(DecodeScript::FramesThenStall(0))
    }

    fn next_encode(&self, mode: Mode) -> EncodeScript {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.encode.get_mut(&mode).and_then(VecDeque::pop_front))
            .unwrap_or(EncodeScript::Accept)
    }

    fn next_remux(&self) -> RemuxScript {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.remux.pop_front())
            .unwrap_or(RemuxScript::Healthy)
    }

    fn stage(&self, name: String) -> (MockStage, Receiver<()>) {
        let (release_tx, release_rx) = crossbeam_channel::bounded(0);
        self.live.fetch_add(1, Ordering::SeqCst);
        let stage = MockStage {
            name,
            output: None,
            input: None,
            alive: true,
            dies_at: None,
            release: Some(release_tx),
            live: Arc::clone(&self.live),
        };
        (stage, release_rx)
    }
}

fn start_failure(stage: StageKind, mode: Mode) -> StageFailure {
    StageFailure::StartFailed {
        stage,
        message: format!("{} mode not supported", mode),
    }
}

fn unlaunchable(stage: StageKind) -> StageFailure {
    StageFailure::Unlaunchable {
        stage,
        message: "mock executable not found".to_string(),
    }
}

impl StageLauncher for MockLauncher {
    fn launch_decode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.record(format!("decode:{}", mode));
        let (frames, tail, stall) = match self.next_decode(mode) {
            DecodeScript::StartFailure => return Err(start_failure(StageKind::Decode, mode)),
            DecodeScript::Unlaunchable => return Err(unlaunchable(StageKind::Decode)),
            DecodeScript::FramesThenStall(n) => (n, 0, true),
            DecodeScript::FramesThenEnd(n) => (n, 0, false),
            DecodeScript::FramesThenPartial { frames, bytes } => (frames, bytes, false),
            DecodeScript::FramesThenPartialStall { frames, bytes } => (frames, bytes, true),
        };

        let mut data = Vec::with_capacity(frames * self.geometry.frame_size_bytes() + tail);
        for index in 0..frames {
            data.extend(Self::synthetic_frame(self.geometry, index));
        }
        data.extend(std::iter::repeat_n(0x5a, tail));

        let (mut stage, release) = self.stage(format!("decode-{}", mode));
        stage.output = Some(Box::new(ScriptedReader {
            data: Cursor::new(data),
            stall,
            release,
        }));
        Ok(Box::new(stage))
    }

    fn launch_encode(&self, mode: Mode) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.record(format!("encode:{}", mode));
        let limit = match self.next_encode(mode) {
            EncodeScript::StartFailure => return Err(start_failure(StageKind::Encode, mode)),
            EncodeScript::Unlaunchable => return Err(unlaunchable(StageKind::Encode)),
            EncodeScript::Accept => None,
            EncodeScript::StallAfter(n) => Some(n * self.geometry.frame_size_bytes()),
        };

        let (mut stage, release) = self.stage(format!("encode-{}", mode));
        stage.input = Some(Box::new(RecordingWriter {
            sink: Arc::clone(&self.encoded),
            accepted: 0,
            limit,
            release,
        }));
        Ok(Box::new(stage))
    }

    fn launch_remux(&self) -> Result<Box<dyn StageHandle>, StageFailure> {
        self.record("remux".to_string());
        let dies_after = match self.next_remux() {
            RemuxScript::Unlaunchable => return Err(unlaunchable(StageKind::Remux)),
            RemuxScript::Healthy => None,
            RemuxScript::DiesAfter(after) => Some(after),
        };

        let (mut stage, _release) = self.stage("remux".to_string());
        stage.dies_at = dies_after.map(|after| Instant::now() + after);
        Ok(Box::new(stage))
    }
}

/// One scripted stage.
pub struct MockStage {
    name: String,
    output: Option<Box<dyn Read + Send>>,
    input: Option<Box<dyn Write + Send>>,
    alive: bool,
    dies_at: Option<Instant>,
    release: Option<Sender<()>>,
    live: Arc<AtomicUsize>,
}

impl StageHandle for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn take_output(&mut self) -> Option<Box<dyn Read + Send>> {
        self.output.take()
    }

    fn take_input(&mut self) -> Option<Box<dyn Write + Send>> {
        self.input.take()
    }

    fn is_alive(&mut self) -> bool {
        self.alive && self.dies_at.is_none_or(|at| Instant::now() < at)
    }

    fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        // Unblocks any reader or writer parked on the release channel
        self.release.take();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for MockStage {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Serves scripted bytes, then either EOF or blocks until the stage is terminated.
struct ScriptedReader {
    data: Cursor<Vec<u8>>,
    stall: bool,
    release: Receiver<()>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.data.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        if self.stall {
            while self.release.recv().is_ok() {}
        }
        Ok(0)
    }
}

/// Records bytes into a shared buffer; blocks once `limit` bytes were taken.
struct RecordingWriter {
    sink: Arc<Mutex<Vec<u8>>>,
    accepted: usize,
    limit: Option<usize>,
    release: Receiver<()>,
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.accepted),
            None => buf.len(),
        };
        if room == 0 {
            while self.release.recv().is_ok() {}
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "encoder terminated"));
        }

        let n = room.min(buf.len());
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| io::Error::other("encoded buffer poisoned"))?;
        sink.extend_from_slice(&buf[..n]);
        self.accepted += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: FrameGeometry = FrameGeometry {
        width: 4,
        height: 2,
    };

    #[test]
    fn test_decode_emits_frames_then_ends() {
        let launcher = MockLauncher::new(TINY).with_decode(Mode::Software, DecodeScript::FramesThenEnd(2));
        let mut stage = launcher.launch_decode(Mode::Software).unwrap();
        let mut out = stage.take_output().unwrap();

        let mut bytes = Vec::new();
        out.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[..24], MockLauncher::synthetic_frame(TINY, 0).as_slice());
    }

    #[test]
    fn test_start_failure_is_per_mode() {
        let launcher =
            MockLauncher::new(TINY).with_decode(Mode::Hardware, DecodeScript::StartFailure);

        assert!(launcher.launch_decode(Mode::Hardware).is_err());
        assert!(launcher.launch_decode(Mode::Software).is_ok());
        assert_eq!(launcher.launches(), vec!["decode:hardware", "decode:software"]);
    }

    #[test]
    fn test_stalled_reader_unblocks_on_terminate() {
        let launcher = MockLauncher::new(TINY);
        let mut stage = launcher.launch_decode(Mode::Software).unwrap();
        let mut out = stage.take_output().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            out.read(&mut buf).unwrap()
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());

        stage.terminate();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_live_stage_count_tracks_terminate() {
        let launcher = MockLauncher::new(TINY);
        let mut remux = launcher.launch_remux().unwrap();
        let encode = launcher.launch_encode(Mode::Software).unwrap();
        assert_eq!(launcher.live_stages(), 2);

        remux.terminate();
        remux.terminate();
        assert_eq!(launcher.live_stages(), 1);

        drop(encode);
        assert_eq!(launcher.live_stages(), 0);
    }

    #[test]
    fn test_encoder_records_frames() {
        let launcher = MockLauncher::new(TINY);
        let mut stage = launcher.launch_encode(Mode::Software).unwrap();
        let mut input = stage.take_input().unwrap();
        input.write_all(&[1u8; 24]).unwrap();
        input.write_all(&[2u8; 24]).unwrap();

        let frames = launcher.encoded_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].iter().all(|&b| b == 2));
    }

    #[test]
    fn test_remux_dies_after_delay() {
        let launcher =
            MockLauncher::new(TINY).with_remux(RemuxScript::DiesAfter(Duration::from_millis(10)));
        let mut remux = launcher.launch_remux().unwrap();
        assert!(remux.is_alive());
        std::thread::sleep(Duration::from_millis(30));
        assert!(!remux.is_alive());
    }
}
