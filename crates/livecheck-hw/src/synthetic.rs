//! In-process camera backend producing a moving test pattern.
//!
//! Backs `livecheck --synthetic` and the tests. It can be told to fail
//! enumeration or acquisition of specific devices, and it counts live tracks
//! so callers can check that streams are released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;

use crate::device::{CameraBackend, CameraError, CaptureDevice};
use crate::frame::Frame;
use crate::stream::LiveStream;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticBackend {
    devices: Vec<CaptureDevice>,
    width: u32,
    height: u32,
    warmup_frames: u32,
    noise: bool,
    fail_enumerate: AtomicBool,
    failing_devices: Mutex<Vec<String>>,
    enumerate_calls: AtomicUsize,
    opened: AtomicUsize,
    live_tracks: Arc<AtomicUsize>,
}

impl SyntheticBackend {
    /// Create a backend listing `(id, label)` devices.
    pub fn new(devices: &[(&str, &str)]) -> Self {
        Self {
            devices: devices
                .iter()
                .map(|(id, label)| CaptureDevice {
                    id: id.to_string(),
                    label: label.to_string(),
                })
                .collect(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            warmup_frames: 0,
            noise: false,
            fail_enumerate: AtomicBool::new(false),
            failing_devices: Mutex::new(Vec::new()),
            enumerate_calls: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            live_tracks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Streams report "not playing" for the first `frames` reads.
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup_frames = frames;
        self
    }

    /// Sprinkle sensor-like noise over each frame.
    pub fn with_noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.fail_enumerate.store(fail, Ordering::SeqCst);
    }

    /// Make every future acquisition of `device_id` fail.
    pub fn fail_device(&self, device_id: &str) {
        self.failing_devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device_id.to_string());
    }

    /// Streams acquired and not yet stopped.
    pub fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    /// Total successful acquisitions.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }
}

impl CameraBackend for SyntheticBackend {
    fn enumerate(&self) -> Result<Vec<CaptureDevice>, CameraError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumerate.load(Ordering::SeqCst) {
            return Err(CameraError::Enumerate(
                "media devices unavailable".to_string(),
            ));
        }
        Ok(self.devices.clone())
    }

    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn LiveStream>, CameraError> {
        let device = match device_id {
            Some(id) => self.devices.iter().find(|d| d.id == id),
            None => self.devices.first(),
        }
        .ok_or_else(|| CameraError::Acquire {
            device: device_id.unwrap_or("default").to_string(),
            reason: "device not found".to_string(),
        })?;

        let failing = self
            .failing_devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&device.id);
        if failing {
            return Err(CameraError::Acquire {
                device: device.id.clone(),
                reason: "permission denied".to_string(),
            });
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticStream {
            device_id: device.id.clone(),
            width: self.width,
            height: self.height,
            warmup_left: self.warmup_frames,
            noise: self.noise,
            frame_no: 0,
            stopped: false,
            live_tracks: Arc::clone(&self.live_tracks),
        }))
    }
}

struct SyntheticStream {
    device_id: String,
    width: u32,
    height: u32,
    warmup_left: u32,
    noise: bool,
    frame_no: u32,
    stopped: bool,
    live_tracks: Arc<AtomicUsize>,
}

impl LiveStream for SyntheticStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn read_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        if self.warmup_left > 0 {
            self.warmup_left -= 1;
            return None;
        }

        // Diagonal gradient with a vertical bar sweeping left to right
        let bar_x = (self.frame_no * 8) % self.width.max(1);
        self.frame_no = self.frame_no.wrapping_add(1);

        let mut rng = rand::thread_rng();
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let base = ((x + y) % 256) as u8;
                let mut px = if x.abs_diff(bar_x) < 12 {
                    [255, 255, 255]
                } else {
                    [base, base / 2, 255 - base]
                };
                if self.noise {
                    let n: u8 = rng.gen_range(0..8);
                    for c in &mut px {
                        *c = c.saturating_add(n);
                    }
                }
                data.extend_from_slice(&px);
            }
        }

        Some(Frame {
            width: self.width,
            height: self.height,
            data,
        })
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}
