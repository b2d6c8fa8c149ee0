use std::path::PathBuf;

use image::{ImageFormat, RgbImage};
use livecheck_session::PreviewSink;

/// Writes every `every`-th preview frame to a JPEG file, replacing it.
pub struct FilePreviewSink {
    path: PathBuf,
    every: u64,
    written: u64,
}

impl FilePreviewSink {
    pub fn new(path: PathBuf, every: u64) -> Self {
        Self {
            path,
            every: every.max(1),
            written: 0,
        }
    }
}

impl PreviewSink for FilePreviewSink {
    fn present(&mut self, tick: u64, preview: &RgbImage) {
        if tick % self.every != 0 {
            return;
        }
        // Stage beside the target, then rename over it
        let staging = self.path.with_extension("part");
        let written = preview
            .save_with_format(&staging, ImageFormat::Jpeg)
            .map_err(|e| e.to_string())
            .and_then(|()| std::fs::rename(&staging, &self.path).map_err(|e| e.to_string()));
        match written {
            Ok(()) => {
                self.written += 1;
                tracing::trace!(tick, path = %self.path.display(), "preview written");
            }
            Err(e) => tracing::warn!(tick, path = %self.path.display(), error = %e, "preview write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_writes_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut sink = FilePreviewSink::new(path.clone(), 10);
        let frame = RgbImage::from_pixel(16, 12, Rgb([10, 200, 10]));

        sink.present(3, &frame);
        assert!(!path.exists());

        sink.present(10, &frame);
        assert_eq!(sink.written, 1);
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
        assert!(!path.with_extension("part").exists());
    }

    #[test]
    fn test_unwritable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("preview.jpg");
        let mut sink = FilePreviewSink::new(path.clone(), 1);
        sink.present(0, &RgbImage::new(4, 4));
        assert_eq!(sink.written, 0);
        assert!(!path.exists());
    }
}
