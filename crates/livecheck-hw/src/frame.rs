//! Frame rendering for the preview surface and still encoding for scoring.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageError, ImageFormat, Rgb, RgbImage};
use livecheck_core::{fit_to_width, project_to_preview, FaceRegion, PixelRect};

use crate::device::CameraError;

/// Overlay stroke width in preview pixels.
const OVERLAY_LINE_WIDTH: i32 = 2;

/// A raw RGB8 frame as delivered by a live stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// `None` when the frame has no dimensions or a short buffer.
    pub fn to_image(&self) -> Option<RgbImage> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Convert packed YUYV 4:2:2 (BT.601, limited range) into RGB8.
    ///
    /// `stride` is the length of one source row in bytes and may include
    /// padding. `None` for odd widths or a short buffer.
    pub fn from_yuyv(data: &[u8], width: u32, height: u32, stride: u32) -> Option<Frame> {
        let row_len = width as usize * 2;
        let stride = (stride as usize).max(row_len);
        if width == 0 || height == 0 || width % 2 != 0 {
            return None;
        }
        if data.len() < stride * (height as usize - 1) + row_len {
            return None;
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for row in data.chunks(stride).take(height as usize) {
            for pair in row[..row_len].chunks_exact(4) {
                let (y0, u, y1, v) = (pair[0], pair[1], pair[2], pair[3]);
                rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
                rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
            }
        }
        Some(Frame {
            width,
            height,
            data: rgb,
        })
    }

    /// Decode one motion-JPEG frame.
    pub fn from_jpeg(data: &[u8]) -> Result<Frame, ImageError> {
        let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
        Ok(Frame {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        })
    }
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clip = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clip(c + 409 * e),
        clip(c - 100 * d - 208 * e),
        clip(c + 516 * d),
    ]
}

/// A downscaled JPEG still submitted for scoring.
#[derive(Debug, Clone)]
pub struct Still {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl Still {
    /// Base64 body without any `data:` URI prefix.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.jpeg)
    }
}

/// The most recent face box and the still width it was measured against.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    pub region: &'a FaceRegion,
    pub still_width: u32,
}

/// Resize the frame to `width` (aspect preserved) and encode it as JPEG.
///
/// Stills are never mirrored. Returns `Ok(None)` when the frame has no
/// usable dimensions.
pub fn encode_still(frame: &Frame, width: u32, quality: u8) -> Result<Option<Still>, CameraError> {
    let Some(source) = frame.to_image() else {
        return Ok(None);
    };
    let Some((w, h)) = fit_to_width(frame.width, frame.height, width) else {
        return Ok(None);
    };

    let resized = imageops::resize(&source, w, h, FilterType::Triangle);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&resized)?;

    Ok(Some(Still {
        width: w,
        height: h,
        jpeg,
    }))
}

/// Scale the frame to the surface width, mirror it if asked, and draw the
/// overlay box with the same mirroring.
pub fn render_preview(
    frame: &Frame,
    surface_width: u32,
    mirrored: bool,
    overlay: Option<Overlay<'_>>,
) -> Option<RgbImage> {
    let source = frame.to_image()?;
    let (w, h) = fit_to_width(frame.width, frame.height, surface_width)?;

    let mut preview = imageops::resize(&source, w, h, FilterType::Triangle);
    if mirrored {
        imageops::flip_horizontal_in_place(&mut preview);
    }

    if let Some(overlay) = overlay {
        let rect = project_to_preview(&overlay.region.bbox, overlay.still_width, w, mirrored);
        let [r, g, b] = overlay.region.classification.color();
        draw_rectangle(&mut preview, rect, Rgb([r, g, b]));
    }

    Some(preview)
}

fn draw_rectangle(image: &mut RgbImage, rect: PixelRect, color: Rgb<u8>) {
    let max_x = image.width() as i32 - 1;
    let max_y = image.height() as i32 - 1;
    if rect.right < 0 || rect.bottom < 0 || rect.left > max_x || rect.top > max_y {
        return;
    }
    if rect.left > rect.right || rect.top > rect.bottom {
        return;
    }
    // Spans are clamped; edges stay where they are and `put` drops the
    // ones lying off the surface.
    let (x0, x1) = (rect.left.max(0), rect.right.min(max_x));
    let (y0, y1) = (rect.top.max(0), rect.bottom.min(max_y));

    for t in 0..OVERLAY_LINE_WIDTH {
        for x in x0..=x1 {
            put(image, x, rect.top + t, color);
            put(image, x, rect.bottom - t, color);
        }
        for y in y0..=y1 {
            put(image, rect.left + t, y, color);
            put(image, rect.right - t, y, color);
        }
    }
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}
