//! Camera access for livecheck sessions.
//!
//! A [`CameraBackend`] enumerates devices and opens [`LiveStream`]s. The
//! [`DeviceRegistry`] caches the device list and publishes the active
//! selection; the [`CaptureStream`] owns the one bound stream and rebinds it
//! when the selection changes.
//!
//! Real cameras come from the `v4l2` feature; [`SyntheticBackend`] is always
//! available.

pub mod device;
pub mod frame;
pub mod stream;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{CameraBackend, CameraError, CaptureDevice, DeviceRegistry};
pub use frame::{encode_still, render_preview, Frame, Overlay, Still};
pub use stream::{CaptureStream, LiveStream};
pub use synthetic::SyntheticBackend;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;
