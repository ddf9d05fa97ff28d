//! # Post-Processing Stack
//!
//! A fixed, ordered sequence of stateless enhancement filters applied to the final
//! color buffer (alpha is handled separately and never reaches these filters):
//!
//! 1. **Sharpen**: unsharp mask, `1.5·orig − 0.5·gaussian(orig, σ=1)`
//! 2. **Gamma**: power-law remap through a 256-entry lookup table
//! 3. **Bloom**: bright-pass on a quarter-resolution copy, blurred, upscaled and added back
//! 4. **Vignette**: separable Gaussian window, peak 1 at the center
//! 5. **Vibrance**: saturation boost in HSV space
//!
//! Stage order is part of the output contract. Every stage clamps to `0..=255` before
//! handing its result to the next one, so no stage can wrap around.

use fast_image_resize::Resizer;
use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;
use palette::{Hsv, IntoColor, Srgb};
use serde::{Deserialize, Serialize};
use tile_scale::cpu::{self, Filter};
use tile_scale::plan::Size;
use tracing::trace;

use crate::error::{ServiceError, ServiceResult};

/// Constants of the enhancement stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessCfg {
    /// Run the stack at all.
    pub enabled: bool,
    pub sharpen_sigma: f32,
    /// Weight of the original image; the blurred copy gets `1 − sharpen_amount`.
    pub sharpen_amount: f32,
    pub gamma: f32,
    /// Rec.601 luma above which a quarter-resolution pixel feeds the bloom.
    pub bloom_threshold: u8,
    pub bloom_sigma: f32,
    pub bloom_weight: f32,
    pub vignette_strength: f32,
    pub vibrance: f32,
}

impl Default for PostProcessCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            sharpen_sigma: 1.0,
            sharpen_amount: 1.5,
            gamma: 0.95,
            bloom_threshold: 210,
            bloom_sigma: 11.0,
            bloom_weight: 0.4,
            vignette_strength: 0.15,
            vibrance: 1.15,
        }
    }
}

impl PostProcessCfg {
    pub fn validate(&self) -> ServiceResult<()> {
        let positive = [
            ("post_process.sharpen_sigma", self.sharpen_sigma),
            ("post_process.gamma", self.gamma),
            ("post_process.bloom_sigma", self.bloom_sigma),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ServiceError::config(field, value.to_string(), "must be a positive number"));
            }
        }

        let non_negative = [
            ("post_process.sharpen_amount", self.sharpen_amount),
            ("post_process.bloom_weight", self.bloom_weight),
            ("post_process.vibrance", self.vibrance),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ServiceError::config(field, value.to_string(), "must be zero or greater"));
            }
        }

        if !(0.0..=1.0).contains(&self.vignette_strength) {
            return Err(ServiceError::config(
                "post_process.vignette_strength",
                self.vignette_strength.to_string(),
                "must be between 0 and 1",
            ));
        }
        Ok(())
    }
}

/// One stage of the enhancement stack.
pub trait ImageFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, img: RgbImage) -> ServiceResult<RgbImage>;
}

/// Ordered filter chain.
#[derive(Default)]
pub struct PostProcessPipeline {
    filters: Vec<Box<dyn ImageFilter>>,
}

impl std::fmt::Debug for PostProcessPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl PostProcessPipeline {
    /// Empty pipeline; `apply` is the identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard stack: sharpen, gamma, bloom, vignette, vibrance.
    /// A disabled configuration yields an empty pipeline.
    pub fn standard(cfg: &PostProcessCfg) -> Self {
        if !cfg.enabled {
            return Self::new();
        }
        Self::new()
            .with(Sharpen {
                sigma: cfg.sharpen_sigma,
                amount: cfg.sharpen_amount,
            })
            .with(Gamma::new(cfg.gamma))
            .with(Bloom {
                threshold: cfg.bloom_threshold,
                sigma: cfg.bloom_sigma,
                weight: cfg.bloom_weight,
            })
            .with(Vignette {
                strength: cfg.vignette_strength,
            })
            .with(Vibrance { factor: cfg.vibrance })
    }

    pub fn with(mut self, filter: impl ImageFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn apply(&self, img: RgbImage) -> ServiceResult<RgbImage> {
        let mut current = img;
        for filter in &self.filters {
            trace!(filter = filter.name(), w = current.width(), h = current.height(), "Applying filter");
            current = filter
                .apply(current)
                .map_err(|e| e.with_metadata("filter", filter.name()))?;
        }
        Ok(current)
    }
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// `gaussian_blur_f32` panics on a non-positive sigma.
fn blur(img: &RgbImage, sigma: f32, stage: &str) -> ServiceResult<RgbImage> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(ServiceError::config(
            format!("post_process.{}_sigma", stage),
            sigma.to_string(),
            "must be a positive number",
        ));
    }
    Ok(gaussian_blur_f32(img, sigma))
}

fn from_raw(w: u32, h: u32, buf: Vec<u8>, stage: &str) -> ServiceResult<RgbImage> {
    RgbImage::from_raw(w, h, buf).ok_or_else(|| {
        ServiceError::scale(format!("{} produced a buffer that does not match {}x{}", stage, w, h))
            .with_operation("post_process")
    })
}

/// Unsharp mask.
#[derive(Debug, Clone, Copy)]
pub struct Sharpen {
    pub sigma: f32,
    pub amount: f32,
}

impl ImageFilter for Sharpen {
    fn name(&self) -> &'static str {
        "sharpen"
    }

    fn apply(&self, mut img: RgbImage) -> ServiceResult<RgbImage> {
        let blurred = blur(&img, self.sigma, "sharpen")?;
        let blur_weight = 1.0 - self.amount;
        for (px, b) in img.iter_mut().zip(blurred.as_raw()) {
            *px = clamp_u8(*px as f32 * self.amount + *b as f32 * blur_weight);
        }
        Ok(img)
    }
}

/// Power-law remap with exponent `1/gamma`.
#[derive(Debug, Clone)]
pub struct Gamma {
    lut: [u8; 256],
}

impl Gamma {
    pub fn new(gamma: f32) -> Self {
        let inv = 1.0 / gamma;
        let mut lut = [0u8; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            *v = clamp_u8((i as f32 / 255.0).powf(inv) * 255.0);
        }
        Self { lut }
    }
}

impl ImageFilter for Gamma {
    fn name(&self) -> &'static str {
        "gamma"
    }

    fn apply(&self, mut img: RgbImage) -> ServiceResult<RgbImage> {
        for px in img.iter_mut() {
            *px = self.lut[*px as usize];
        }
        Ok(img)
    }
}

/// Additive glow around bright regions, computed at quarter resolution.
#[derive(Debug, Clone, Copy)]
pub struct Bloom {
    pub threshold: u8,
    pub sigma: f32,
    pub weight: f32,
}

impl ImageFilter for Bloom {
    fn name(&self) -> &'static str {
        "bloom"
    }

    fn apply(&self, mut img: RgbImage) -> ServiceResult<RgbImage> {
        let full = Size::new(img.width(), img.height());
        let quarter = Size::new((full.w / 4).max(1), (full.h / 4).max(1));
        let mut resizer = Resizer::new();

        let small = cpu::resize_rgb(&mut resizer, img.as_raw(), full, quarter, Filter::Area)?;
        let threshold = self.threshold as f32;
        let mut bright = Vec::with_capacity(small.len());
        for px in small.chunks_exact(3) {
            let luma = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            if luma > threshold {
                bright.extend_from_slice(px);
            } else {
                bright.extend_from_slice(&[0; 3]);
            }
        }
        if bright.iter().all(|&v| v == 0) {
            return Ok(img);
        }

        let bright = from_raw(quarter.w, quarter.h, bright, "bloom bright-pass")?;
        let glow = blur(&bright, self.sigma, "bloom")?;
        let glow = cpu::resize_rgb(&mut resizer, glow.as_raw(), quarter, full, Filter::Linear)?;

        for (px, g) in img.iter_mut().zip(glow) {
            *px = clamp_u8(*px as f32 + g as f32 * self.weight);
        }
        Ok(img)
    }
}

/// Darkens toward the corners by `1 − s + s·g(x, y)`.
#[derive(Debug, Clone, Copy)]
pub struct Vignette {
    pub strength: f32,
}

/// Gaussian window over `n` samples with `σ = n/2`, scaled so its largest entry is 1.
fn window(n: u32) -> Vec<f32> {
    let sigma = (n as f32 / 2.0).max(0.5);
    let center = (n as f32 - 1.0) / 2.0;
    let mut w: Vec<f32> = (0..n)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let peak = w.iter().cloned().fold(0.0f32, f32::max);
    if peak > 0.0 {
        w.iter_mut().for_each(|v| *v /= peak);
    }
    w
}

impl ImageFilter for Vignette {
    fn name(&self) -> &'static str {
        "vignette"
    }

    fn apply(&self, mut img: RgbImage) -> ServiceResult<RgbImage> {
        let wx = window(img.width());
        let wy = window(img.height());
        let base = 1.0 - self.strength;
        for (x, y, px) in img.enumerate_pixels_mut() {
            let factor = base + self.strength * wx[x as usize] * wy[y as usize];
            for c in px.0.iter_mut() {
                *c = clamp_u8(*c as f32 * factor);
            }
        }
        Ok(img)
    }
}

/// Saturation boost in HSV space.
#[derive(Debug, Clone, Copy)]
pub struct Vibrance {
    pub factor: f32,
}

impl ImageFilter for Vibrance {
    fn name(&self) -> &'static str {
        "vibrance"
    }

    fn apply(&self, mut img: RgbImage) -> ServiceResult<RgbImage> {
        for px in img.pixels_mut() {
            let [r, g, b] = px.0;
            let mut hsv: Hsv = Srgb::new(r, g, b).into_format::<f32>().into_color();
            hsv.saturation = (hsv.saturation * self.factor).clamp(0.0, 1.0);
            let rgb: Srgb = hsv.into_color();
            let rgb: Srgb<u8> = rgb.into_format();
            px.0 = [rgb.red, rgb.green, rgb.blue];
        }
        Ok(img)
    }
}
