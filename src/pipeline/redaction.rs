//! Per-frame face redaction.
//!
//! Each frame is handled on its own: a downscaled copy goes to the detector,
//! and every confident box is blurred in place on the full-resolution frame.
//! No state is carried between frames.

use crate::defaults;
use crate::detect::{Detection, FaceDetector};
use crate::error::{Result, VeilcastError};
use crate::pipeline::types::{DetectionBox, Frame, FrameGeometry};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to send downstream when detection fails for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionFailurePolicy {
    /// Forward the frame unredacted and keep streaming.
    #[default]
    Forward,
    /// Replace the whole frame with black.
    Blackout,
}

/// How a frame came out of redaction.
#[derive(Debug, Clone, PartialEq)]
pub enum RedactionStatus {
    /// Faces were found and blurred.
    Redacted { regions: usize },
    /// Detection ran and found nothing above the threshold.
    NoFaces,
    /// Detection failed; the frame was handled per [`DetectionFailurePolicy`].
    DetectionFailed { message: String },
}

/// A redacted frame plus whether detection succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct RedactionOutcome {
    pub frame: Frame,
    pub status: RedactionStatus,
}

impl RedactionOutcome {
    /// False when detection failed for this frame.
    pub fn ok(&self) -> bool {
        !matches!(self.status, RedactionStatus::DetectionFailed { .. })
    }
}

/// Detects faces and blurs them.
pub struct Redactor {
    detector: Arc<dyn FaceDetector>,
    threshold: f32,
    sigma: f32,
    failure_policy: DetectionFailurePolicy,
}

impl Redactor {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector,
            threshold: defaults::CONFIDENCE_THRESHOLD,
            sigma: defaults::BLUR_SIGMA,
            failure_policy: DetectionFailurePolicy::default(),
        }
    }

    /// Boxes at or below this confidence are ignored.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_blur_sigma(mut self, sigma: f32) -> Self {
        self.sigma = sigma.max(0.1);
        self
    }

    pub fn with_failure_policy(mut self, policy: DetectionFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Redact one frame. Always returns a frame of the same geometry.
    pub fn redact(&self, mut frame: Frame) -> RedactionOutcome {
        let regions = match self.detect(&frame) {
            Ok(regions) => regions,
            Err(e) => return self.on_detection_failure(frame, e),
        };

        if regions.is_empty() {
            return RedactionOutcome {
                frame,
                status: RedactionStatus::NoFaces,
            };
        }

        blur_regions(&mut frame, &regions, self.sigma);

        RedactionOutcome {
            frame,
            status: RedactionStatus::Redacted {
                regions: regions.len(),
            },
        }
    }

    /// Run the detector and return the clamped, confident boxes in frame pixels.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<DetectionBox>> {
        let geometry = frame.geometry();
        let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(
            geometry.width,
            geometry.height,
            frame.as_bytes(),
        )
        .ok_or_else(|| VeilcastError::Detection {
            message: format!("frame buffer does not match {}", geometry),
        })?;

        let size = self.detector.input_size();
        let resized = imageops::resize(&view, size, size, FilterType::Triangle);
        let detections = self.detector.detect(&resized)?;

        Ok(detections
            .iter()
            .filter(|d| d.confidence > self.threshold)
            .filter_map(|d| to_pixels(d, geometry).clamp(geometry))
            .collect())
    }

    fn on_detection_failure(&self, frame: Frame, error: VeilcastError) -> RedactionOutcome {
        tracing::error!("Face detection failed: {}", error);
        let frame = match self.failure_policy {
            DetectionFailurePolicy::Forward => frame,
            DetectionFailurePolicy::Blackout => Frame::black(frame.geometry()),
        };
        RedactionOutcome {
            frame,
            status: RedactionStatus::DetectionFailed {
                message: error.to_string(),
            },
        }
    }
}

/// Scale a normalised detection to frame pixels, rounding to the nearest pixel.
pub fn to_pixels(detection: &Detection, geometry: FrameGeometry) -> DetectionBox {
    let w = geometry.width as f32;
    let h = geometry.height as f32;
    DetectionBox::new(
        (detection.x1 * w).round() as i32,
        (detection.y1 * h).round() as i32,
        (detection.x2 * w).round() as i32,
        (detection.y2 * h).round() as i32,
        detection.confidence,
    )
}

/// Blur the pixels inside `region` and nothing else.
pub fn blur_region(frame: &mut Frame, region: &DetectionBox, sigma: f32) {
    blur_regions(frame, std::slice::from_ref(region), sigma);
}

/// Blur every region in turn, then make sure no pixel inside any of them still
/// matches the frame as it was before the first blur.
///
/// Regions are clamped to the frame first. Overlaps are blurred once per box;
/// a pixel that ends up identical to its source is nudged by one level.
pub fn blur_regions(frame: &mut Frame, regions: &[DetectionBox], sigma: f32) {
    let geometry = frame.geometry();
    let regions: Vec<DetectionBox> = regions.iter().filter_map(|r| r.clamp(geometry)).collect();
    if regions.is_empty() {
        return;
    }

    let original = frame.as_bytes().to_vec();
    for region in &regions {
        let crop = copy_region(frame.as_bytes(), geometry, region);
        let blurred = gaussian_blur_f32(&crop, sigma);
        write_region(frame.as_bytes_mut(), geometry, region, &blurred);
    }

    let bytes = frame.as_bytes_mut();
    for region in &regions {
        for y in region.y1 as u32..region.y2 as u32 {
            for x in region.x1 as u32..region.x2 as u32 {
                let at = offset(geometry, x, y);
                let px = at..at + defaults::BYTES_PER_PIXEL;
                if bytes[px.clone()] == original[px] {
                    let b = bytes[at];
                    bytes[at] = if b < 128 { b + 1 } else { b - 1 };
                }
            }
        }
    }
}

fn offset(geometry: FrameGeometry, x: u32, y: u32) -> usize {
    (y as usize * geometry.width as usize + x as usize) * defaults::BYTES_PER_PIXEL
}

/// Copy a clamped region out of raw BGR bytes.
fn copy_region(bytes: &[u8], geometry: FrameGeometry, region: &DetectionBox) -> RgbImage {
    let (x0, y0) = (region.x1 as u32, region.y1 as u32);
    ImageBuffer::from_fn(region.width(), region.height(), |x, y| {
        let at = offset(geometry, x0 + x, y0 + y);
        Rgb([bytes[at], bytes[at + 1], bytes[at + 2]])
    })
}

fn write_region(bytes: &mut [u8], geometry: FrameGeometry, region: &DetectionBox, image: &RgbImage) {
    let (x0, y0) = (region.x1 as u32, region.y1 as u32);
    for (x, y, pixel) in image.enumerate_pixels() {
        let at = offset(geometry, x0 + x, y0 + y);
        bytes[at..at + defaults::BYTES_PER_PIXEL].copy_from_slice(&pixel.0);
    }
}
