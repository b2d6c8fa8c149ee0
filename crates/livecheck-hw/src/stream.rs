use std::sync::Arc;

use crate::device::{CameraBackend, CameraError};
use crate::frame::Frame;

/// An acquired hardware stream.
///
/// Holding one keeps the camera locked; [`LiveStream::stop`] releases the
/// underlying tracks and must be idempotent.
pub trait LiveStream: Send {
    fn device_id(&self) -> &str;

    /// The most recent frame, or `None` while the stream is not yet playing.
    fn read_frame(&mut self) -> Option<Frame>;

    fn stop(&mut self);
}

/// Owner of the single bound stream.
pub struct CaptureStream {
    backend: Arc<dyn CameraBackend>,
    bound: Option<Box<dyn LiveStream>>,
}

impl CaptureStream {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            bound: None,
        }
    }

    /// Release the current stream, then acquire one for `device_id`.
    ///
    /// On failure the stream stays unbound; no other device is tried.
    pub fn rebind(&mut self, device_id: Option<&str>) -> Result<(), CameraError> {
        self.release();

        match self.backend.open(device_id) {
            Ok(stream) => {
                tracing::info!(device = stream.device_id(), "stream bound");
                self.bound = Some(stream);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(requested = ?device_id, error = %e, "stream acquisition failed");
                Err(e)
            }
        }
    }

    /// Stop the bound stream's tracks. No-op when nothing is bound.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.bound.take() {
            stream.stop();
            tracing::debug!(device = stream.device_id(), "stream released");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn bound_device(&self) -> Option<&str> {
        self.bound.as_deref().map(|s| s.device_id())
    }

    pub fn read_frame(&mut self) -> Option<Frame> {
        self.bound.as_mut()?.read_frame()
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.release();
    }
}
