//! Fixed-size raw frame framing between pipeline stages.
//!
//! Frames travel back-to-back as `width * height * 3` byte blocks with no
//! separators. A reader that hits end-of-stream before a block is complete
//! reports [`ReadOutcome::End`] with the number of stray bytes; the partial
//! block is discarded, never reshaped into a frame.

use crate::pipeline::types::{Frame, FrameGeometry};
use std::io::{self, ErrorKind, Read, Write};

/// Result of reading one frame-sized block.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame.
    Frame(Frame),
    /// The source ended. `partial_bytes` is how much of a frame was pending.
    End { partial_bytes: usize },
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    geometry: FrameGeometry,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, geometry: FrameGeometry) -> Self {
        Self { inner, geometry }
    }

    /// Blocks until a full frame is available or the source ends.
    pub fn read_frame(&mut self) -> io::Result<ReadOutcome> {
        let size = self.geometry.frame_size_bytes();
        let mut buf = vec![0u8; size];
        let mut filled = 0;

        while filled < size {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Ok(ReadOutcome::End {
                        partial_bytes: filled,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        match Frame::from_bytes(buf, self.geometry) {
            Ok(frame) => Ok(ReadOutcome::Frame(frame)),
            // Unreachable by construction: buf is exactly frame-sized.
            Err(buf) => Ok(ReadOutcome::End {
                partial_bytes: buf.len(),
            }),
        }
    }
}

/// Writes frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
    geometry: FrameGeometry,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, geometry: FrameGeometry) -> Self {
        Self { inner, geometry }
    }

    /// Writes exactly one frame and flushes it to the consumer.
    pub fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        if frame.geometry() != self.geometry {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "frame is {} but stream expects {}",
                    frame.geometry(),
                    self.geometry
                ),
            ));
        }
        self.inner.write_all(frame.as_bytes())?;
        self.inner.flush()
    }
}
