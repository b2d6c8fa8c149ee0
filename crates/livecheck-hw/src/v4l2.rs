//! Video4Linux2 cameras.
//!
//! Each open stream runs a capture thread that owns the device and its mapped
//! buffers, decodes every dequeued buffer and keeps only the newest frame.
//! Reads never wait on the camera; stopping the stream joins the thread, which
//! turns streaming off and closes the device.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as _;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::device::{CameraBackend, CameraError, CaptureDevice};
use crate::frame::Frame;
use crate::stream::LiveStream;

const YUYV: &[u8; 4] = b"YUYV";
const MJPG: &[u8; 4] = b"MJPG";

const BUFFER_COUNT: u32 = 4;
/// Upper bound on how long `stop` waits for an in-progress dequeue.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Cameras exposed under `/dev/video*`. Device ids are node paths.
pub struct V4l2Backend {
    width: u32,
    height: u32,
}

impl V4l2Backend {
    /// `width` x `height` is requested from the driver, which may settle on
    /// the nearest mode it supports.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl CameraBackend for V4l2Backend {
    fn enumerate(&self) -> Result<Vec<CaptureDevice>, CameraError> {
        let mut nodes = v4l::context::enum_devices();
        nodes.sort_by_key(|node| node.index());

        let mut devices = Vec::new();
        for node in nodes {
            let path = node.path().display().to_string();
            // Metadata and output nodes share the namespace; keep capture only
            let caps = match Device::with_path(node.path()).and_then(|dev| dev.query_caps()) {
                Ok(caps) => caps,
                Err(e) => {
                    tracing::debug!(device = %path, error = %e, "skipping unreadable node");
                    continue;
                }
            };
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            let label = node.name().unwrap_or(caps.card);
            devices.push(CaptureDevice { id: path, label });
        }

        tracing::debug!(count = devices.len(), "v4l2 devices enumerated");
        Ok(devices)
    }

    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn LiveStream>, CameraError> {
        let path = match device_id {
            Some(id) => id.to_string(),
            None => self
                .enumerate()?
                .into_iter()
                .next()
                .map(|device| device.id)
                .ok_or_else(|| CameraError::Acquire {
                    device: "default".to_string(),
                    reason: "no capture devices".to_string(),
                })?,
        };
        V4l2Stream::start(path, self.width, self.height).map(|s| Box::new(s) as Box<dyn LiveStream>)
    }
}

struct V4l2Stream {
    device_id: String,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4l2Stream {
    /// Spawn the capture thread and wait until it has the device streaming
    /// or has failed to.
    fn start(device_id: String, width: u32, height: u32) -> Result<Self, CameraError> {
        let acquire_error = |reason: String| CameraError::Acquire {
            device: device_id.clone(),
            reason,
        };

        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("livecheck-v4l2".to_string())
            .spawn({
                let path = device_id.clone();
                let latest = Arc::clone(&latest);
                let running = Arc::clone(&running);
                move || capture_loop(&path, (width, height), &latest, &running, ready_tx)
            })
            .map_err(|e| acquire_error(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => {
                tracing::info!(
                    device = %device_id,
                    width = format.width,
                    height = format.height,
                    fourcc = %format.fourcc,
                    "camera streaming"
                );
                Ok(Self {
                    device_id,
                    latest,
                    running,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(acquire_error(e.to_string()))
            }
            Err(_) => {
                let _ = worker.join();
                Err(acquire_error("capture thread exited".to_string()))
            }
        }
    }
}

impl LiveStream for V4l2Stream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn read_frame(&mut self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(device = %self.device_id, "capture thread panicked");
            }
            tracing::debug!(device = %self.device_id, "camera released");
        }
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_device(path: &Path, width: u32, height: u32) -> io::Result<(Device, Format)> {
    let device = Device::with_path(path)?;
    let mut requested = device.format()?;
    requested.width = width;
    requested.height = height;
    requested.fourcc = FourCC::new(YUYV);
    let mut format = device.set_format(&requested)?;

    // Cameras without YUYV at this size usually offer motion JPEG
    if format.fourcc != FourCC::new(YUYV) {
        requested.fourcc = FourCC::new(MJPG);
        format = device.set_format(&requested)?;
    }
    if format.fourcc != FourCC::new(YUYV) && format.fourcc != FourCC::new(MJPG) {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported pixel format {}", format.fourcc),
        ));
    }
    Ok((device, format))
}

fn capture_loop(
    path: &str,
    (width, height): (u32, u32),
    latest: &Mutex<Option<Frame>>,
    running: &AtomicBool,
    ready: mpsc::Sender<io::Result<Format>>,
) {
    let opened = open_device(Path::new(path), width, height).and_then(|(device, format)| {
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
        stream.set_timeout(DEQUEUE_TIMEOUT);
        Ok((device, format, stream))
    });
    let (device, format, mut stream) = match opened {
        Ok(parts) => parts,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(format));

    while running.load(Ordering::SeqCst) {
        let frame = match stream.next() {
            Ok((buf, meta)) => {
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                decode(&buf[..used], &format)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                tracing::warn!(device = %path, error = %e, "capture failed; stream stalled");
                break;
            }
        };
        if let Some(frame) = frame {
            *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
        }
    }

    // Streaming off before the fd closes
    drop(stream);
    drop(device);
}

fn decode(buf: &[u8], format: &Format) -> Option<Frame> {
    if format.fourcc == FourCC::new(MJPG) {
        match Frame::from_jpeg(buf) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::trace!(error = %e, "dropping corrupt mjpeg frame");
                None
            }
        }
    } else {
        Frame::from_yuyv(buf, format.width, format.height, format.stride)
    }
}
