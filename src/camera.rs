//! ExamGate - Capture Sources
//!
//! The capture device itself is platform glue (browser/webview camera) and
//! lives behind the [`FrameSource`] seam. What this module owns is the
//! resource discipline: a source wrapped in [`ScopedCapture`] is released on
//! every exit path, including early returns and panics, via `Drop`.

use crate::error::{GateError, GateResult};

/// One grabbed still frame, as encoded image bytes
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
}

/// A source of still frames: a live camera stream or an uploaded photo
pub trait FrameSource {
    /// Grab one still frame
    fn grab_frame(&mut self) -> GateResult<Frame>;

    /// Release the underlying device. Called at most once.
    fn release(&mut self) {}
}

/// An uploaded photo acting as a frame source (registration-time enrollment)
#[derive(Debug, Clone)]
pub struct StillImage {
    bytes: Vec<u8>,
}

impl StillImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl FrameSource for StillImage {
    fn grab_frame(&mut self) -> GateResult<Frame> {
        if self.bytes.is_empty() {
            return Err(GateError::CaptureFailed("empty image upload".into()));
        }
        Ok(Frame {
            bytes: self.bytes.clone(),
        })
    }
}

/// Scoped wrapper around a frame source.
///
/// Acquired when the capture UI opens; guarantees the device is released on
/// close, retry and success alike.
pub struct ScopedCapture<S: FrameSource> {
    source: S,
    released: bool,
}

impl<S: FrameSource> ScopedCapture<S> {
    /// Take ownership of the source for the duration of one capture
    pub fn acquire(source: S) -> Self {
        log::debug!("capture source acquired");
        Self {
            source,
            released: false,
        }
    }

    /// Grab one frame from the source
    pub fn grab(&mut self) -> GateResult<Frame> {
        if self.released {
            return Err(GateError::CaptureFailed(
                "capture source already released".into(),
            ));
        }
        self.source.grab_frame()
    }

    /// Release the source early. Idempotent; `Drop` covers the paths that
    /// never reach this.
    pub fn release(&mut self) {
        if !self.released {
            self.source.release();
            self.released = true;
            log::debug!("capture source released");
        }
    }
}

impl<S: FrameSource> Drop for ScopedCapture<S> {
    fn drop(&mut self) {
        self.release();
    }
}
