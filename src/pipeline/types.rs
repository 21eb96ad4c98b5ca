//! Data types flowing through the redaction pipeline.

use crate::defaults;
use std::fmt;

/// Fixed raw-frame dimensions for the whole process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one BGR24 frame on the wire.
    pub fn frame_size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * defaults::BYTES_PER_PIXEL
    }
}

impl fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One raw image: BGR byte order, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    geometry: FrameGeometry,
}

impl Frame {
    /// Wraps a buffer that must be exactly one frame long.
    ///
    /// Returns the buffer back if its length does not match the geometry;
    /// a short buffer is never reshaped into a frame.
    pub fn from_bytes(data: Vec<u8>, geometry: FrameGeometry) -> Result<Self, Vec<u8>> {
        if data.len() != geometry.frame_size_bytes() {
            return Err(data);
        }
        Ok(Self { data, geometry })
    }

    /// An all-black frame.
    pub fn black(geometry: FrameGeometry) -> Self {
        Self {
            data: vec![0; geometry.frame_size_bytes()],
            geometry,
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Returns the (b, g, r) triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.geometry.width || y >= self.geometry.height {
            return None;
        }
        let offset = (y as usize * self.geometry.width as usize + x as usize)
            * defaults::BYTES_PER_PIXEL;
        match self.data.get(offset..offset + defaults::BYTES_PER_PIXEL) {
            Some(&[b, g, r]) => Some([b, g, r]),
            _ => None,
        }
    }
}

/// A detected face region in pixel coordinates of the full-resolution frame.
///
/// `(x1, y1)` is inclusive, `(x2, y2)` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl DetectionBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    /// Clamps the box into the frame.
    ///
    /// Returns `None` when nothing is left (`x2 <= x1` or `y2 <= y1`).
    /// Clamping a box that is already inside the frame returns it unchanged.
    pub fn clamp(&self, geometry: FrameGeometry) -> Option<DetectionBox> {
        let max_x = geometry.width.min(i32::MAX as u32) as i32;
        let max_y = geometry.height.min(i32::MAX as u32) as i32;
        let clamped = DetectionBox {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
            confidence: self.confidence,
        };
        if clamped.x2 <= clamped.x1 || clamped.y2 <= clamped.y1 {
            return None;
        }
        Some(clamped)
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.x1 as i64 && x < self.x2 as i64 && y >= self.y1 as i64 && y < self.y2 as i64
    }
}

/// Hardware or software variant of an external transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Hardware,
    Software,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Hardware => write!(f, "hardware"),
            Mode::Software => write!(f, "software"),
        }
    }
}

/// Decode/encode pairing chosen for one attempt. Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDecision {
    pub decode_mode: Mode,
    pub encode_mode: Mode,
}

impl CapabilityDecision {
    pub fn new(decode_mode: Mode, encode_mode: Mode) -> Self {
        Self {
            decode_mode,
            encode_mode,
        }
    }
}

impl fmt::Display for CapabilityDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decode={} encode={}",
            self.decode_mode, self.encode_mode
        )
    }
}
