// SPDX-License-Identifier: MIT
//! # Scale Plan Computation
//!
//! A fixed-ratio engine always enlarges by exactly `R`. Clients, however, ask for an
//! arbitrary scale relative to the *original* input. This module computes how the
//! `R×` buffer must be resampled to land on the requested size.
//!
//! ## Rules
//!
//! - `target_w = floor(original_w × scale)` and `target_h = floor(original_h × scale)`,
//!   each derived independently so the aspect ratio never drifts.
//! - If the target equals the native `R×` size the plan is an identity (no resample).
//! - A target no larger than the native size in both dimensions is a downsample and
//!   uses area averaging; anything else is an upsample and uses a smooth filter.

use std::fmt;

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Both dimensions multiplied by an integer ratio.
    pub fn scaled(self, ratio: u32) -> Self {
        Self {
            w: self.w * ratio,
            h: self.h * ratio,
        }
    }

    /// Number of pixels covered.
    pub fn area(self) -> usize {
        (self.w as usize) * (self.h as usize)
    }

    /// Byte length of a tightly packed interleaved buffer of this size.
    pub fn byte_len(self, channels: usize) -> usize {
        self.area() * channels
    }

    pub fn is_empty(self) -> bool {
        self.w == 0 || self.h == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

/// Resampling step needed to go from the engine's native output to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resample {
    /// Requested scale equals the engine ratio; the buffer is used as is.
    Identity,
    /// Target fits inside the native buffer; area averaging.
    Downsample,
    /// Target is larger in at least one dimension; smooth interpolation.
    Upsample,
}

/// Complete normalization plan for one request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScalePlan {
    /// Dimensions of the decoded source image
    pub original: Size,
    /// Engine ratio the plan was computed for
    pub ratio: u32,
    /// Requested scale relative to `original`
    pub scale: f64,
    /// Size of the engine's `R×` output
    pub native: Size,
    /// Final output size
    pub out: Size,
    /// Resample step from `native` to `out`
    pub resample: Resample,
}

impl ScalePlan {
    pub fn is_identity(&self) -> bool {
        self.resample == Resample::Identity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// Scale is NaN, infinite, zero or negative.
    InvalidScale(f64),
    /// Engine ratio of zero.
    ZeroRatio,
    /// The requested scale collapses a dimension to zero pixels.
    EmptyTarget { original: Size, scale: f64 },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::InvalidScale(s) => write!(f, "Scale must be a positive finite number, got {}", s),
            PlanError::ZeroRatio => write!(f, "Engine ratio must be at least 1"),
            PlanError::EmptyTarget { original, scale } => write!(
                f,
                "Scale {} turns a {} image into an empty output",
                scale, original
            ),
        }
    }
}

impl std::error::Error for PlanError {}

/// Compute the normalization plan for an image of `original` size, an engine of
/// integer `ratio`, and a client-requested `scale`.
pub fn build_plan(original: Size, ratio: u32, scale: f64) -> Result<ScalePlan, PlanError> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(PlanError::InvalidScale(scale));
    }
    if ratio == 0 {
        return Err(PlanError::ZeroRatio);
    }

    let native = original.scaled(ratio);
    let out = Size {
        w: target_dim(original.w, scale),
        h: target_dim(original.h, scale),
    };
    if out.is_empty() {
        return Err(PlanError::EmptyTarget { original, scale });
    }

    let resample = if out == native {
        Resample::Identity
    } else if out.w <= native.w && out.h <= native.h {
        Resample::Downsample
    } else {
        Resample::Upsample
    };

    Ok(ScalePlan {
        original,
        ratio,
        scale,
        native,
        out,
        resample,
    })
}

/// `floor(dim × scale)`, saturating at `u32::MAX`.
fn target_dim(dim: u32, scale: f64) -> u32 {
    let v = (f64::from(dim) * scale).floor();
    if v >= f64::from(u32::MAX) { u32::MAX } else { v as u32 }
}
