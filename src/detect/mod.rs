//! Face detection service consumed by the redaction stage.
//!
//! The detector is initialised once per process with a fixed inference
//! backend and shared read-only through `Arc<dyn FaceDetector>`.

pub mod onnx;

use crate::config::DetectorConfig;
use crate::error::{Result, VeilcastError};
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use onnx::OnnxFaceDetector;

/// A three-channel 8-bit image whose channels are in B, G, R order.
///
/// Reuses `image`'s RGB buffer type; channel order is irrelevant to resizing
/// and blurring.
pub type BgrImage = image::RgbImage;

/// Where inference runs. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceBackend {
    Cpu,
    Cuda,
}

impl fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceBackend::Cpu => write!(f, "CPU"),
            InferenceBackend::Cuda => write!(f, "CUDA"),
        }
    }
}

/// One detector output, normalised to `[0, 1]` relative to the input image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }
}

/// Trait for face detection.
///
/// This trait allows swapping implementations (ONNX model vs mock).
pub trait FaceDetector: Send + Sync {
    /// Detect faces in an image already resized to `input_size() x input_size()`.
    fn detect(&self, image: &BgrImage) -> Result<Vec<Detection>>;

    /// Square input resolution the detector expects.
    fn input_size(&self) -> u32;

    /// Backend selected at initialisation.
    fn backend(&self) -> InferenceBackend;
}

/// Load the process-wide detector.
///
/// `acceleration` asks for the CUDA backend; if it is unavailable the
/// detector falls back to CPU with a warning.
pub fn load_detector(config: &DetectorConfig, acceleration: bool) -> Result<Arc<dyn FaceDetector>> {
    if !config.model_path.exists() {
        return Err(VeilcastError::DetectorModelNotFound {
            path: config.model_path.display().to_string(),
        });
    }
    let detector = OnnxFaceDetector::new(&config.model_path, config.input_size, acceleration)?;
    tracing::info!(
        model = %config.model_path.display(),
        backend = %detector.backend(),
        "Face detector loaded"
    );
    Ok(Arc::new(detector))
}

/// Mock detector for testing.
///
/// Returns a fixed set of detections and can be told to fail on specific calls.
#[derive(Debug)]
pub struct MockFaceDetector {
    detections: Vec<Detection>,
    fail_on_calls: Vec<usize>,
    fail_always: bool,
    input_size: u32,
    calls: AtomicUsize,
    seen_sizes: Mutex<Vec<(u32, u32)>>,
}

impl MockFaceDetector {
    /// Create a mock that finds nothing.
    pub fn new() -> Self {
        Self {
            detections: Vec::new(),
            fail_on_calls: Vec::new(),
            fail_always: false,
            input_size: crate::defaults::DETECTOR_INPUT_SIZE,
            calls: AtomicUsize::new(0),
            seen_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Configure the detections returned on every successful call
    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    /// Fail on the given zero-based call indices
    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_on_calls = calls.to_vec();
        self
    }

    /// Fail on every call
    pub fn with_failure(mut self) -> Self {
        self.fail_always = true;
        self
    }

    /// Override the input size
    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size;
        self
    }

    /// Number of detect() calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Dimensions of every image handed to detect()
    pub fn seen_sizes(&self) -> Vec<(u32, u32)> {
        self.seen_sizes
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Default for MockFaceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&self, image: &BgrImage) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.seen_sizes.lock() {
            sizes.push(image.dimensions());
        }
        if self.fail_always || self.fail_on_calls.contains(&call) {
            return Err(VeilcastError::Detection {
                message: format!("mock detection failure on call {}", call),
            });
        }
        Ok(self.detections.clone())
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn backend(&self) -> InferenceBackend {
        InferenceBackend::Cpu
    }
}

/// Implement FaceDetector for Arc<T> to allow sharing one loaded model.
impl<T: FaceDetector> FaceDetector for Arc<T> {
    fn detect(&self, image: &BgrImage) -> Result<Vec<Detection>> {
        (**self).detect(image)
    }

    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn backend(&self) -> InferenceBackend {
        (**self).backend()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mock_returns_detections() {
        let detector =
            MockFaceDetector::new().with_detections(vec![Detection::new(0.1, 0.1, 0.2, 0.2, 0.9)]);
        let image = BgrImage::new(300, 300);

        let detections = detector.detect(&image).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detector.calls(), 1);
        assert_eq!(detector.seen_sizes(), vec![(300, 300)]);
    }

    #[test]
    fn test_mock_fails_on_selected_call_only() {
        let detector = MockFaceDetector::new().failing_on(&[1]);
        let image = BgrImage::new(8, 8);

        assert!(detector.detect(&image).is_ok());
        assert!(detector.detect(&image).is_err());
        assert!(detector.detect(&image).is_ok());
    }

    #[test]
    fn test_mock_with_failure_always_fails() {
        let detector = MockFaceDetector::new().with_failure();
        let image = BgrImage::new(8, 8);
        assert!(detector.detect(&image).is_err());
        assert!(detector.detect(&image).is_err());
    }

    #[test]
    fn test_load_detector_missing_model_is_configuration_error() {
        let config = DetectorConfig {
            model_path: PathBuf::from("/nonexistent/veilcast/face.onnx"),
            ..Default::default()
        };
        let err = load_detector(&config, false).err().unwrap();
        assert!(matches!(err, VeilcastError::DetectorModelNotFound { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_arc_detector_delegates() {
        let detector = Arc::new(MockFaceDetector::new().with_input_size(128));
        assert_eq!(FaceDetector::input_size(&detector), 128);
        assert_eq!(FaceDetector::backend(&detector), InferenceBackend::Cpu);
    }
}
