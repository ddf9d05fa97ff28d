// SPDX-License-Identifier: MIT
// CPU resampler built on fast_image_resize (SIMD-accelerated).
// RGB8 or Gray8 in → same format out, tightly packed rows on both sides.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::{U8, U8x3};
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};

use crate::plan::{Resample, ScalePlan, Size};

/// Resampling kernels used across the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    /// Nearest neighbour; point-wise, no smoothing.
    Nearest,
    /// Area averaging (box convolution). Intended for downsampling.
    Area,
    /// Linear interpolation.
    Linear,
    /// Catmull-Rom bicubic.
    Smooth,
    /// Lanczos3 windowed sinc.
    Lanczos,
}

impl Filter {
    fn alg(self) -> ResizeAlg {
        match self {
            Filter::Nearest => ResizeAlg::Nearest,
            Filter::Area => ResizeAlg::Convolution(FilterType::Box),
            Filter::Linear => ResizeAlg::Convolution(FilterType::Bilinear),
            Filter::Smooth => ResizeAlg::Convolution(FilterType::CatmullRom),
            Filter::Lanczos => ResizeAlg::Convolution(FilterType::Lanczos3),
        }
    }

    /// Filter a scale plan asks for; `None` for the identity path.
    pub fn for_plan(plan: &ScalePlan) -> Option<Filter> {
        match plan.resample {
            Resample::Identity => None,
            Resample::Downsample => Some(Filter::Area),
            Resample::Upsample => Some(Filter::Smooth),
        }
    }
}

#[derive(Debug)]
pub enum ScaleError {
    BufferTooSmall { expected: usize, got: usize },
    EmptyImage(Size),
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferTooSmall { expected, got } => {
                write!(f, "Source buffer too small: expected {} bytes, got {}", expected, got)
            }
            ScaleError::EmptyImage(size) => write!(f, "Cannot resample an empty {} image", size),
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

fn check(src: &[u8], src_size: Size, dst_size: Size, channels: usize) -> Result<(), ScaleError> {
    if src_size.is_empty() {
        return Err(ScaleError::EmptyImage(src_size));
    }
    if dst_size.is_empty() {
        return Err(ScaleError::EmptyImage(dst_size));
    }
    let expected = src_size.byte_len(channels);
    if src.len() < expected {
        return Err(ScaleError::BufferTooSmall { expected, got: src.len() });
    }
    Ok(())
}

/// Resize a tightly packed RGB8 buffer to `dst_size`.
pub fn resize_rgb(
    resizer: &mut Resizer,
    src: &[u8],
    src_size: Size,
    dst_size: Size,
    filter: Filter,
) -> Result<Vec<u8>, ScaleError> {
    check(src, src_size, dst_size, 3)?;
    let src_view = TypedImageRef::<U8x3>::from_buffer(src_size.w, src_size.h, src)?;
    let mut out = vec![0u8; dst_size.byte_len(3)];
    let mut dst_view = TypedImage::<U8x3>::from_buffer(dst_size.w, dst_size.h, &mut out)?;
    let opts = ResizeOptions::new().resize_alg(filter.alg());
    resizer.resize_typed::<U8x3>(&src_view, &mut dst_view, &opts)?;
    Ok(out)
}

/// Resize a single-channel 8-bit plane (alpha, masks) to `dst_size`.
pub fn resize_gray(
    resizer: &mut Resizer,
    src: &[u8],
    src_size: Size,
    dst_size: Size,
    filter: Filter,
) -> Result<Vec<u8>, ScaleError> {
    check(src, src_size, dst_size, 1)?;
    let src_view = TypedImageRef::<U8>::from_buffer(src_size.w, src_size.h, src)?;
    let mut out = vec![0u8; dst_size.byte_len(1)];
    let mut dst_view = TypedImage::<U8>::from_buffer(dst_size.w, dst_size.h, &mut out)?;
    let opts = ResizeOptions::new().resize_alg(filter.alg());
    resizer.resize_typed::<U8>(&src_view, &mut dst_view, &opts)?;
    Ok(out)
}

/// Apply a scale plan to the engine's native RGB output.
/// The identity path hands the buffer back untouched.
pub fn normalize_rgb(resizer: &mut Resizer, native: Vec<u8>, plan: &ScalePlan) -> Result<Vec<u8>, ScaleError> {
    match Filter::for_plan(plan) {
        None => Ok(native),
        Some(filter) => resize_rgb(resizer, &native, plan.native, plan.out, filter),
    }
}
