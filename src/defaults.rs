//! Default configuration constants for veilcast.
//!
//! Shared between the config layer, the supervisor, and the stage builders so
//! that the same numbers are used everywhere.

/// Default source stream (SRT listener).
pub const INPUT_URL: &str = "srt://0.0.0.0:9000";

/// Default hand-off endpoint between the encoder and the remuxer.
///
/// UDP is connectionless, so the remuxer keeps reading across encoder restarts.
pub const INTERMEDIATE_URL: &str = "udp://127.0.0.1:23000?pkt_size=1316&overrun_nonfatal=1";

/// Default final publish endpoint, relayed by an external stream server.
pub const OUTPUT_URL: &str = "rtmp://127.0.0.1:1935/live/blurred";

/// Default raw frame width in pixels.
pub const FRAME_WIDTH: u32 = 1280;

/// Default raw frame height in pixels.
pub const FRAME_HEIGHT: u32 = 720;

/// Default target encode rate.
pub const FRAME_RATE: u32 = 30;

/// Bytes per pixel in the BGR24 wire format.
pub const BYTES_PER_PIXEL: usize = 3;

/// Detections at or below this confidence leave the frame untouched.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Square input resolution of the face detector.
pub const DETECTOR_INPUT_SIZE: u32 = 300;

/// Default detector model location.
pub const DETECTOR_MODEL_PATH: &str = "models/face_detector.onnx";

/// Per-channel mean subtracted before inference, in B, G, R order.
pub const DETECTOR_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];

/// Gaussian sigma used for redaction.
///
/// Matches a 51×51 kernel with sigma 30: strong enough that a face cannot be
/// recovered from the output.
pub const BLUR_SIGMA: f32 = 30.0;

/// No frame moving for this long means a stage has stalled.
pub const STALL_TIMEOUT_SECS: u64 = 5;

/// Pause between a failed session and the next probe.
pub const COOLDOWN_SECS: u64 = 5;

/// Upper bound on the capability probe.
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Maximum delay between decoder reconnect attempts.
pub const RECONNECT_DELAY_MAX_SECS: u32 = 5;

/// Audio codec produced by the remuxer.
pub const AUDIO_CODEC: &str = "aac";

/// Audio bitrate produced by the remuxer.
pub const AUDIO_BITRATE: &str = "128k";

/// Default ffmpeg executable.
pub const FFMPEG: &str = "ffmpeg";

/// Default ffprobe executable.
pub const FFPROBE: &str = "ffprobe";

/// Report the inference backend compiled into this build.
pub fn inference_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "ONNX Runtime (CUDA + CPU)"
    } else if cfg!(feature = "onnx") {
        "ONNX Runtime (CPU)"
    } else {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_backend_matches_compiled_feature() {
        let expected = if cfg!(feature = "cuda") {
            "ONNX Runtime (CUDA + CPU)"
        } else if cfg!(feature = "onnx") {
            "ONNX Runtime (CPU)"
        } else {
            "none"
        };
        assert_eq!(inference_backend(), expected);
    }

    #[test]
    fn default_frame_size_matches_720p_bgr() {
        let size = FRAME_WIDTH as usize * FRAME_HEIGHT as usize * BYTES_PER_PIXEL;
        assert_eq!(size, 2_764_800);
    }
}
