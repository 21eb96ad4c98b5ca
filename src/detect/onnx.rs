//! ONNX Runtime face detector.
//!
//! Runs an SSD-style face model (the res10 300x300 family) through `ort`.
//! The model takes a `[1, 3, S, S]` f32 tensor of mean-subtracted B, G, R
//! planes and produces `[1, 1, N, 7]` rows of
//! `(image_id, label, confidence, x1, y1, x2, y2)` with normalised corners.
//!
//! # Feature Gate
//!
//! The real implementation requires the `onnx` feature (`cuda` adds the CUDA
//! execution provider):
//!
//! ```bash
//! cargo build --features onnx
//! ```

use crate::detect::{BgrImage, Detection, FaceDetector, InferenceBackend};
use crate::error::{Result, VeilcastError};
use std::path::Path;

#[cfg(feature = "onnx")]
use crate::defaults;
#[cfg(feature = "onnx")]
use ndarray::Array4;
#[cfg(feature = "onnx")]
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
#[cfg(feature = "onnx")]
use ort::session::{Session, builder::GraphOptimizationLevel};
#[cfg(feature = "onnx")]
use std::sync::Mutex;

/// Values per detection row in the SSD output.
#[cfg(feature = "onnx")]
const ROW_LEN: usize = 7;

/// ONNX-based face detector.
///
/// The session is wrapped in a Mutex; the frame loop is single-threaded so
/// the lock is never contended.
#[cfg(feature = "onnx")]
pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    backend: InferenceBackend,
}

/// Placeholder used when the crate is built without the `onnx` feature.
#[cfg(not(feature = "onnx"))]
#[derive(Debug)]
pub struct OnnxFaceDetector {
    input_size: u32,
}

#[cfg(feature = "onnx")]
impl std::fmt::Debug for OnnxFaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxFaceDetector")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("input_size", &self.input_size)
            .field("backend", &self.backend)
            .field("session", &"<Session>")
            .finish()
    }
}

#[cfg(feature = "onnx")]
impl OnnxFaceDetector {
    /// Load the model and pick the inference backend.
    ///
    /// # Errors
    /// Returns `VeilcastError::DetectorModelNotFound` if the model file doesn't exist,
    /// `VeilcastError::DetectorUnavailable` if ONNX Runtime cannot load it.
    pub fn new(model_path: &Path, input_size: u32, acceleration: bool) -> Result<Self> {
        if !model_path.exists() {
            return Err(VeilcastError::DetectorModelNotFound {
                path: model_path.display().to_string(),
            });
        }

        let backend = select_backend(acceleration);

        let mut builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .map_err(unavailable)?;
        if backend == InferenceBackend::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(unavailable)?;
        }
        let session = builder.commit_from_file(model_path).map_err(unavailable)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| VeilcastError::DetectorUnavailable {
                message: "model declares no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| VeilcastError::DetectorUnavailable {
                message: "model declares no outputs".to_string(),
            })?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size,
            backend,
        })
    }
}

#[cfg(not(feature = "onnx"))]
impl OnnxFaceDetector {
    /// Always fails: this build has no inference backend.
    pub fn new(model_path: &Path, _input_size: u32, _acceleration: bool) -> Result<Self> {
        Err(VeilcastError::DetectorUnavailable {
            message: format!(
                "cannot load {}: built without the `onnx` feature (rebuild with --features onnx)",
                model_path.display()
            ),
        })
    }
}

#[cfg(feature = "onnx")]
fn select_backend(acceleration: bool) -> InferenceBackend {
    if !acceleration {
        tracing::info!("Using CPU for face detection");
        return InferenceBackend::Cpu;
    }
    match CUDAExecutionProvider::default().is_available() {
        Ok(true) => {
            tracing::info!("Using GPU acceleration for face detection");
            InferenceBackend::Cuda
        }
        Ok(false) => {
            tracing::warn!("CUDA backend not available, falling back to CPU");
            InferenceBackend::Cpu
        }
        Err(e) => {
            tracing::warn!("CUDA backend check failed, falling back to CPU: {}", e);
            InferenceBackend::Cpu
        }
    }
}

#[cfg(feature = "onnx")]
fn unavailable(e: ort::Error) -> VeilcastError {
    VeilcastError::DetectorUnavailable {
        message: e.to_string(),
    }
}

#[cfg(feature = "onnx")]
fn inference_failed(e: ort::Error) -> VeilcastError {
    VeilcastError::Detection {
        message: e.to_string(),
    }
}

/// Build the NCHW input tensor: one plane per channel, mean subtracted.
#[cfg(feature = "onnx")]
fn to_tensor(image: &BgrImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for (c, mean) in defaults::DETECTOR_MEAN_BGR.iter().enumerate() {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 - mean;
        }
    }
    tensor
}

/// Decode SSD rows into detections, skipping padding rows.
#[cfg(feature = "onnx")]
fn parse_rows(values: &[f32]) -> Vec<Detection> {
    values
        .chunks_exact(ROW_LEN)
        .filter(|row| row[2] > 0.0)
        .map(|row| Detection::new(row[3], row[4], row[5], row[6], row[2]))
        .collect()
}

#[cfg(feature = "onnx")]
impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &BgrImage) -> Result<Vec<Detection>> {
        let tensor = to_tensor(image);
        let session = self.session.lock().map_err(|_| VeilcastError::Detection {
            message: "detector session lock poisoned".to_string(),
        })?;

        let inputs =
            ort::inputs![self.input_name.as_str() => tensor.view()].map_err(inference_failed)?;
        let outputs = session.run(inputs).map_err(inference_failed)?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference_failed)?;

        if output.shape().last() != Some(&ROW_LEN) {
            return Err(VeilcastError::Detection {
                message: format!("unexpected output shape {:?}", output.shape()),
            });
        }

        let values: Vec<f32> = output.iter().copied().collect();
        Ok(parse_rows(&values))
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn backend(&self) -> InferenceBackend {
        self.backend
    }
}

#[cfg(not(feature = "onnx"))]
impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, _image: &BgrImage) -> Result<Vec<Detection>> {
        Err(VeilcastError::DetectorUnavailable {
            message: "built without the `onnx` feature".to_string(),
        })
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn backend(&self) -> InferenceBackend {
        InferenceBackend::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_new_without_feature_explains_how_to_enable() {
        let err = OnnxFaceDetector::new(Path::new("model.onnx"), 300, false).unwrap_err();
        assert!(err.to_string().contains("--features onnx"));
        assert!(err.is_configuration_error());
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_new_missing_model() {
        let err = OnnxFaceDetector::new(Path::new("/nonexistent/face.onnx"), 300, false)
            .unwrap_err();
        assert!(matches!(err, VeilcastError::DetectorModelNotFound { .. }));
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_to_tensor_subtracts_channel_means() {
        let image = BgrImage::from_pixel(2, 2, image::Rgb([104, 177, 123]));
        let tensor = to_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 2, 2]);
        assert!(tensor.iter().all(|v| v.abs() < f32::EPSILON));
    }

    #[cfg(feature = "onnx")]
    #[test]
    fn test_parse_rows_skips_empty_rows() {
        let values = [
            0.0, 1.0, 0.93, 0.1, 0.2, 0.3, 0.4, //
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let detections = parse_rows(&values);
        assert_eq!(detections, vec![Detection::new(0.1, 0.2, 0.3, 0.4, 0.93)]);
    }
}
