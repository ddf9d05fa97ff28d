// SPDX-License-Identifier: MIT
//! # tile-scale: Bounded-Memory Tiling for Fixed-Ratio Image Engines
//!
//! This crate holds the engine-agnostic pixel plumbing behind the upscaling service:
//! splitting an oversized image into overlapping tiles, stitching the `R×` engine outputs
//! back together at exact pixel boundaries, and resampling the result to whatever scale a
//! client asked for.
//!
//! ## Key Components
//!
//! - [`tiling`]: tile grid planning, padded crops and crop-and-place reassembly
//! - [`plan`]: scale-plan computation from `(original size, ratio, requested scale)`
//! - [`cpu`]: CPU resampling using SIMD acceleration (`fast_image_resize`)
//!
//! Buffers are plain tightly packed `&[u8]` slices, so the crate has no opinion about
//! image decoding or about what the engine actually is.
//!
//! ## Usage Example
//!
//! ```rust
//! use tile_scale::plan::{build_plan, Size};
//! use tile_scale::tiling::{run_tiled, TileCfg, CHANNELS};
//!
//! let size = Size::new(64, 48);
//! let src = vec![128u8; size.byte_len(CHANNELS)];
//!
//! // A stand-in 2× engine that paints every output pixel grey.
//! let engine = |_: &[u8], s: Size| -> Result<(Size, Vec<u8>), String> {
//!     let out = s.scaled(2);
//!     Ok((out, vec![128u8; out.byte_len(CHANNELS)]))
//! };
//!
//! let cfg = TileCfg { tile_size: 32, tile_pad: 4 };
//! let native = run_tiled(&src, size, 2, cfg, engine, |_, _| {}).unwrap();
//! assert_eq!(native.len(), size.scaled(2).byte_len(CHANNELS));
//!
//! let plan = build_plan(size, 2, 1.5).unwrap();
//! assert_eq!((plan.out.w, plan.out.h), (96, 72));
//! ```

pub mod cpu;
pub mod plan;
pub mod tiling;
