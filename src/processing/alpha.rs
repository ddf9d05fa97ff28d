//! Alpha channel separation and recombination.
//!
//! The engine only sees three color channels. A fourth channel is split off before the
//! engine runs, resized on its own with linear interpolation straight to the final output
//! size, and reattached after the color post-processing stack.

use fast_image_resize::Resizer;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use tile_scale::cpu::{self, Filter};
use tile_scale::plan::Size;

use crate::error::{ServiceError, ServiceResult};

/// Color planes plus the optional alpha plane of one image.
#[derive(Debug, Clone)]
pub struct Planes {
    pub color: RgbImage,
    pub alpha: Option<GrayImage>,
}

/// Split a decoded image into 8-bit RGB and (if present) an 8-bit alpha plane.
pub fn split(img: DynamicImage) -> ServiceResult<Planes> {
    if !img.color().has_alpha() {
        return Ok(Planes {
            color: img.into_rgb8(),
            alpha: None,
        });
    }

    let rgba = img.into_rgba8();
    let (w, h) = rgba.dimensions();
    let mut color = Vec::with_capacity((w as usize) * (h as usize) * 3);
    let mut alpha = Vec::with_capacity((w as usize) * (h as usize));
    for px in rgba.as_raw().chunks_exact(4) {
        color.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }

    let color = RgbImage::from_raw(w, h, color)
        .ok_or_else(|| ServiceError::scale("color plane does not match its size").with_operation("alpha_split"))?;
    let alpha = GrayImage::from_raw(w, h, alpha)
        .ok_or_else(|| ServiceError::scale("alpha plane does not match its size").with_operation("alpha_split"))?;
    Ok(Planes {
        color,
        alpha: Some(alpha),
    })
}

/// Resize an alpha plane with linear interpolation.
pub fn resize_alpha(resizer: &mut Resizer, alpha: &GrayImage, w: u32, h: u32) -> ServiceResult<GrayImage> {
    if alpha.dimensions() == (w, h) {
        return Ok(alpha.clone());
    }
    let out = cpu::resize_gray(
        resizer,
        alpha.as_raw(),
        Size::new(alpha.width(), alpha.height()),
        Size::new(w, h),
        Filter::Linear,
    )?;
    GrayImage::from_raw(w, h, out).ok_or_else(|| ServiceError::scale("alpha plane does not match its size"))
}

/// Reattach alpha as the fourth channel. Without alpha the color image is returned as RGB.
pub fn merge(color: RgbImage, alpha: Option<GrayImage>) -> ServiceResult<DynamicImage> {
    let Some(alpha) = alpha else {
        return Ok(DynamicImage::ImageRgb8(color));
    };
    if color.dimensions() != alpha.dimensions() {
        return Err(ServiceError::scale(format!(
            "alpha plane is {}x{} but color is {}x{}",
            alpha.width(),
            alpha.height(),
            color.width(),
            color.height()
        ))
        .with_operation("alpha_merge"));
    }

    let (w, h) = color.dimensions();
    let mut rgba = Vec::with_capacity((w as usize) * (h as usize) * 4);
    for (px, a) in color.as_raw().chunks_exact(3).zip(alpha.as_raw()) {
        rgba.extend_from_slice(px);
        rgba.push(*a);
    }
    RgbaImage::from_raw(w, h, rgba)
        .map(DynamicImage::ImageRgba8)
        .ok_or_else(|| ServiceError::scale("merged buffer does not match its size"))
}
