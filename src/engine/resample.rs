//! Classical resampling engine.
//!
//! Enlarges by a fixed integer ratio with a convolution kernel. It needs no weights,
//! which makes the service usable out of the box and keeps tests deterministic.

use fast_image_resize::Resizer;
use image::RgbImage;
use tile_scale::cpu::{self, Filter};
use tile_scale::plan::Size;

use super::{EngineKind, TransformEngine};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct ResampleEngine {
    kind: EngineKind,
    ratio: u32,
}

impl ResampleEngine {
    pub fn new(kind: EngineKind, ratio: u32) -> ServiceResult<Self> {
        if ratio == 0 {
            return Err(ServiceError::config("engine.ratio", "0", "must be at least 1"));
        }
        Ok(Self { kind, ratio })
    }

    fn filter(&self) -> Filter {
        match self.kind {
            EngineKind::Nearest => Filter::Nearest,
            EngineKind::Bilinear => Filter::Linear,
            EngineKind::CatmullRom => Filter::Smooth,
            EngineKind::Lanczos3 => Filter::Lanczos,
        }
    }
}

impl TransformEngine for ResampleEngine {
    fn name(&self) -> &str {
        match self.kind {
            EngineKind::Nearest => "nearest",
            EngineKind::Bilinear => "bilinear",
            EngineKind::CatmullRom => "catmull-rom",
            EngineKind::Lanczos3 => "lanczos3",
        }
    }

    fn ratio(&self) -> u32 {
        self.ratio
    }

    fn transform(&self, input: &RgbImage) -> ServiceResult<RgbImage> {
        let src = Size::new(input.width(), input.height());
        let dst = src.scaled(self.ratio);
        let mut resizer = Resizer::new();
        let out = cpu::resize_rgb(&mut resizer, input.as_raw(), src, dst, self.filter())
            .map_err(|e| ServiceError::engine(self.name(), e.to_string()))?;
        RgbImage::from_raw(dst.w, dst.h, out)
            .ok_or_else(|| ServiceError::engine(self.name(), format!("resized buffer does not match {}", dst)))
    }
}
