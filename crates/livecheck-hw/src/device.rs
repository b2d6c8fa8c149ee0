use std::sync::{Arc, Mutex, PoisonError};

use livecheck_core::DeviceInfo;
use thiserror::Error;
use tokio::sync::watch;

use crate::stream::LiveStream;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device enumeration failed: {0}")]
    Enumerate(String),
    #[error("failed to acquire {device}: {reason}")]
    Acquire { device: String, reason: String },
    #[error("unknown capture device: {0}")]
    UnknownDevice(String),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A video input as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub id: String,
    pub label: String,
}

impl CaptureDevice {
    /// Label shown to the user; falls back to the id for unlabelled devices.
    pub fn display_label(&self) -> String {
        if self.label.is_empty() {
            format!("Camera {}", self.id)
        } else {
            self.label.clone()
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id.clone(),
            label: self.display_label(),
        }
    }
}

/// Source of capture devices and live streams.
///
/// Implementations may block, and so may the streams they open; the session
/// runner only calls them from the blocking pool.
pub trait CameraBackend: Send + Sync {
    /// List the video inputs currently available.
    fn enumerate(&self) -> Result<Vec<CaptureDevice>, CameraError>;

    /// Acquire a stream for `device_id`, or the system default when `None`.
    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn LiveStream>, CameraError>;
}

/// Cached device list plus the active selection.
///
/// Selection changes are published on a `watch` channel; the capture stream
/// subscribes to it rather than being called directly.
pub struct DeviceRegistry {
    backend: Arc<dyn CameraBackend>,
    devices: Mutex<Option<Vec<CaptureDevice>>>,
    selection: watch::Sender<Option<String>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        let (selection, _) = watch::channel(None);
        Self {
            backend,
            devices: Mutex::new(None),
            selection,
        }
    }

    /// List devices, querying the backend only when nothing is cached.
    ///
    /// A failed enumeration is not cached; the next call retries.
    pub fn list_devices(&self) -> Result<Vec<CaptureDevice>, CameraError> {
        let mut cached = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(devices) = cached.as_ref() {
            return Ok(devices.clone());
        }

        let devices = self.backend.enumerate()?;
        tracing::info!(count = devices.len(), "capture devices enumerated");
        for device in &devices {
            tracing::debug!(id = %device.id, label = %device.display_label(), "device");
        }
        *cached = Some(devices.clone());
        Ok(devices)
    }

    /// The cached list, if enumeration has succeeded.
    pub fn cached_devices(&self) -> Option<Vec<CaptureDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the active device. `None` selects the system default.
    ///
    /// A concrete id must belong to the cached list.
    pub fn select(&self, device_id: Option<&str>) -> Result<(), CameraError> {
        if let Some(id) = device_id {
            let known = self
                .cached_devices()
                .is_some_and(|devices| devices.iter().any(|d| d.id == id));
            if !known {
                return Err(CameraError::UnknownDevice(id.to_string()));
            }
        }

        let next = device_id.map(str::to_string);
        let changed = self.selection.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            tracing::info!(device = ?next, "device selection changed");
        }
        Ok(())
    }

    pub fn selected_id(&self) -> Option<String> {
        self.selection.borrow().clone()
    }

    /// The selected device, or the first listed device when none is selected.
    pub fn active_device(&self) -> Option<CaptureDevice> {
        let devices = self.cached_devices()?;
        match self.selected_id() {
            Some(id) => devices.into_iter().find(|d| d.id == id),
            None => devices.into_iter().next(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.selection.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticBackend;

    fn registry() -> (Arc<SyntheticBackend>, DeviceRegistry) {
        let backend = Arc::new(SyntheticBackend::new(&[("cam0", "Front"), ("cam1", "")]));
        let registry = DeviceRegistry::new(backend.clone());
        (backend, registry)
    }

    #[test]
    fn test_list_is_cached() {
        let (backend, registry) = registry();
        let first = registry.list_devices().unwrap();
        let second = registry.list_devices().unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.enumerate_calls(), 1);
    }

    #[test]
    fn test_failed_enumeration_not_cached() {
        let (backend, registry) = registry();
        backend.fail_enumeration(true);
        assert!(matches!(
            registry.list_devices(),
            Err(CameraError::Enumerate(_))
        ));
        assert!(registry.cached_devices().is_none());

        backend.fail_enumeration(false);
        assert_eq!(registry.list_devices().unwrap().len(), 2);
    }

    #[test]
    fn test_select_requires_listed_id() {
        let (_, registry) = registry();
        assert!(matches!(
            registry.select(Some("cam0")),
            Err(CameraError::UnknownDevice(_))
        ));

        registry.list_devices().unwrap();
        registry.select(Some("cam1")).unwrap();
        assert_eq!(registry.selected_id().as_deref(), Some("cam1"));
        assert!(registry.select(Some("cam9")).is_err());
        assert_eq!(registry.selected_id().as_deref(), Some("cam1"));
    }

    #[test]
    fn test_select_default() {
        let (_, registry) = registry();
        registry.list_devices().unwrap();
        registry.select(Some("cam1")).unwrap();
        registry.select(None).unwrap();
        assert_eq!(registry.selected_id(), None);
        assert_eq!(registry.active_device().unwrap().id, "cam0");
    }

    #[test]
    fn test_selection_change_is_published() {
        let (_, registry) = registry();
        registry.list_devices().unwrap();
        let mut rx = registry.subscribe();
        assert!(!rx.has_changed().unwrap());

        registry.select(Some("cam1")).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_deref(), Some("cam1"));

        // Re-selecting the same device is not a change
        registry.select(Some("cam1")).unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_display_label_fallback() {
        let device = CaptureDevice {
            id: "cam1".to_string(),
            label: String::new(),
        };
        assert_eq!(device.display_label(), "Camera cam1");
        assert_eq!(device.info().label, "Camera cam1");
    }
}
