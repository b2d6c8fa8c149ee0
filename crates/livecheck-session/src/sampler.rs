use image::RgbImage;
use livecheck_core::FaceRegion;
use livecheck_hw::{encode_still, render_preview, CaptureStream, Overlay, Still};

/// Cadence and geometry of the sampling loop.
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    pub still_every: u64,
    pub still_width: u32,
    pub still_quality: u8,
    pub preview_width: u32,
}

/// What one sampler tick produced.
#[derive(Default)]
pub struct SampledTick {
    pub preview: Option<RgbImage>,
    pub still: Option<Still>,
}

/// Renders the preview on every tick and encodes a still on still ticks.
///
/// Both come from the same frame read, so a still always matches the most
/// recently rendered preview.
pub struct FrameSampler {
    settings: SamplerSettings,
    mirrored: bool,
    overlay: Option<(FaceRegion, u32)>,
}

impl FrameSampler {
    pub fn new(settings: SamplerSettings, mirrored: bool) -> Self {
        Self {
            settings,
            mirrored,
            overlay: None,
        }
    }

    pub fn is_still_tick(&self, tick: u64) -> bool {
        tick % self.settings.still_every == 0
    }

    pub fn set_mirrored(&mut self, mirrored: bool) {
        self.mirrored = mirrored;
    }

    pub fn mirrored(&self) -> bool {
        self.mirrored
    }

    /// Replace the overlay box; `still_width` is the width it was measured in.
    pub fn set_overlay(&mut self, region: FaceRegion, still_width: u32) {
        self.overlay = Some((region, still_width));
    }

    /// Run one tick. `allow_still` gates still production (a submission in
    /// flight or a session no longer scoring).
    pub fn tick(&mut self, tick: u64, stream: &mut CaptureStream, allow_still: bool) -> SampledTick {
        let Some(frame) = stream.read_frame() else {
            tracing::trace!(tick, "no frame available, skipping render");
            return SampledTick::default();
        };

        let overlay = self.overlay.as_ref().map(|(region, still_width)| Overlay {
            region,
            still_width: *still_width,
        });
        let preview = render_preview(&frame, self.settings.preview_width, self.mirrored, overlay);

        let still = if allow_still && self.is_still_tick(tick) {
            match encode_still(&frame, self.settings.still_width, self.settings.still_quality) {
                Ok(still) => still,
                Err(e) => {
                    tracing::warn!(tick, error = %e, "still encoding failed");
                    None
                }
            }
        } else {
            None
        };

        SampledTick { preview, still }
    }
}
