// SPDX-License-Identifier: MIT
//! # Overlapping Tile Scheduling
//!
//! Engines with a fixed upscale ratio `R` often cannot take a large image in one pass.
//! This module splits the source into a grid of owned regions, feeds each region to the
//! engine together with a padding margin, and stitches the engine outputs back into one
//! seamless `(W·R)×(H·R)` buffer.
//!
//! ## Coordinate Spaces
//!
//! 1. **Source**: the decoded image, `W×H`.
//! 2. **Padded tile**: the owned region grown by `P` on every side, clamped to the source.
//! 3. **Transformed**: the engine output for a padded tile, exactly `R×` its size.
//!
//! The owned region of tile `(c, r)` is `[c·T, min((c+1)·T, W)) × [r·T, min((r+1)·T, H))`.
//! Owned regions partition the source. After transformation the scaled padding
//! `(pad_left·R, pad_top·R)` is cropped away and the remainder lands at `(x·R, y·R)`.
//! Tiles write disjoint regions of the output, so order only matters for progress.
//!
//! ## Buffers
//!
//! All buffers are tightly packed RGB8 (`CHANNELS` bytes per pixel, row-major).

use std::fmt;

use crate::plan::Size;

/// Bytes per pixel on the engine path.
pub const CHANNELS: usize = 3;

/// Tiling parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileCfg {
    /// Side of an owned region in source pixels. `0` disables tiling.
    pub tile_size: u32,
    /// Context margin added on every side of a tile before it reaches the engine.
    pub tile_pad: u32,
}

impl Default for TileCfg {
    fn default() -> Self {
        Self {
            tile_size: 400,
            tile_pad: 10,
        }
    }
}

/// Rectangle in source pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn size(&self) -> Size {
        Size { w: self.w, h: self.h }
    }

    pub fn right(&self) -> u32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.h
    }

    /// Same rectangle in the `R×` output space.
    pub fn scaled(&self, ratio: u32) -> Rect {
        Rect {
            x: self.x * ratio,
            y: self.y * ratio,
            w: self.w * ratio,
            h: self.h * ratio,
        }
    }
}

/// One unit of engine work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    /// Row-major position in the grid
    pub index: usize,
    pub col: u32,
    pub row: u32,
    /// Region this tile is responsible for producing
    pub owned: Rect,
    /// Region actually handed to the engine
    pub padded: Rect,
}

impl Tile {
    pub fn pad_left(&self) -> u32 {
        self.owned.x - self.padded.x
    }

    pub fn pad_top(&self) -> u32 {
        self.owned.y - self.padded.y
    }

    pub fn pad_right(&self) -> u32 {
        self.padded.right() - self.owned.right()
    }

    pub fn pad_bottom(&self) -> u32 {
        self.padded.bottom() - self.owned.bottom()
    }

    /// Sub-rectangle of the engine output that belongs to the owned region,
    /// in the coordinates of that output.
    pub fn crop_in_output(&self, ratio: u32) -> Rect {
        Rect {
            x: self.pad_left() * ratio,
            y: self.pad_top() * ratio,
            w: self.owned.w * ratio,
            h: self.owned.h * ratio,
        }
    }
}

/// Whether an image must be split before it reaches the engine.
pub fn needs_tiling(size: Size, cfg: TileCfg) -> bool {
    cfg.tile_size != 0 && (size.w > cfg.tile_size || size.h > cfg.tile_size)
}

/// Grid dimensions `(cols, rows)` for an image.
pub fn grid_dims(size: Size, cfg: TileCfg) -> (u32, u32) {
    if !needs_tiling(size, cfg) {
        return (1, 1);
    }
    (size.w.div_ceil(cfg.tile_size), size.h.div_ceil(cfg.tile_size))
}

/// Plan every tile of the grid, row-major, top-left to bottom-right.
///
/// Padding is clamped to the image: edge tiles get asymmetric padding, never
/// wraparound or mirroring.
pub fn plan_tiles(size: Size, cfg: TileCfg) -> Vec<Tile> {
    let (cols, rows) = grid_dims(size, cfg);
    let step = if needs_tiling(size, cfg) { cfg.tile_size } else { size.w.max(size.h) };
    let mut tiles = Vec::with_capacity((cols * rows) as usize);

    for r in 0..rows {
        for c in 0..cols {
            let x0 = c * step;
            let y0 = r * step;
            let x1 = ((c + 1) * step).min(size.w);
            let y1 = ((r + 1) * step).min(size.h);

            let px0 = x0.saturating_sub(cfg.tile_pad);
            let py0 = y0.saturating_sub(cfg.tile_pad);
            let px1 = x1.saturating_add(cfg.tile_pad).min(size.w);
            let py1 = y1.saturating_add(cfg.tile_pad).min(size.h);

            tiles.push(Tile {
                index: tiles.len(),
                col: c,
                row: r,
                owned: Rect { x: x0, y: y0, w: x1 - x0, h: y1 - y0 },
                padded: Rect { x: px0, y: py0, w: px1 - px0, h: py1 - py0 },
            });
        }
    }
    tiles
}

/// Copy a rectangle out of a packed buffer into a new packed buffer.
pub fn compact_crop(src: &[u8], src_w: u32, roi: Rect) -> Vec<u8> {
    let row_bytes = (roi.w as usize) * CHANNELS;
    let pitch = (src_w as usize) * CHANNELS;
    let mut out = Vec::with_capacity(row_bytes * roi.h as usize);
    for r in 0..roi.h as usize {
        let off = (roi.y as usize + r) * pitch + (roi.x as usize) * CHANNELS;
        out.extend_from_slice(&src[off..off + row_bytes]);
    }
    out
}

/// Copy `roi` of `src` (a packed buffer `src_w` wide) into `dst` at `(dx, dy)`.
fn place(src: &[u8], src_w: u32, roi: Rect, dst: &mut [u8], dst_w: u32, dx: u32, dy: u32) {
    let row_bytes = (roi.w as usize) * CHANNELS;
    let src_pitch = (src_w as usize) * CHANNELS;
    let dst_pitch = (dst_w as usize) * CHANNELS;
    for r in 0..roi.h as usize {
        let s = (roi.y as usize + r) * src_pitch + (roi.x as usize) * CHANNELS;
        let d = (dy as usize + r) * dst_pitch + (dx as usize) * CHANNELS;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

/// Failure of a tiled run. `E` is the engine's own error type.
#[derive(Debug)]
pub enum TileError<E> {
    /// The engine failed on a tile; the whole run is abandoned.
    Engine { tile: usize, source: E },
    /// The engine returned something other than exactly `R×` its input.
    RatioMismatch { tile: usize, expected: Size, got: Size },
    /// Engine returned a buffer whose length disagrees with its stated size.
    BadBuffer { tile: usize, expected: usize, got: usize },
    /// Source buffer shorter than its stated size.
    SourceTooSmall { expected: usize, got: usize },
    ZeroRatio,
}

impl<E: fmt::Display> fmt::Display for TileError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileError::Engine { tile, source } => write!(f, "Engine failed on tile {}: {}", tile, source),
            TileError::RatioMismatch { tile, expected, got } => write!(
                f,
                "Engine output for tile {} is {}, expected {}",
                tile, got, expected
            ),
            TileError::BadBuffer { tile, expected, got } => write!(
                f,
                "Engine output for tile {} holds {} bytes, expected {}",
                tile, got, expected
            ),
            TileError::SourceTooSmall { expected, got } => {
                write!(f, "Source buffer too small: expected {} bytes, got {}", expected, got)
            }
            TileError::ZeroRatio => write!(f, "Engine ratio must be at least 1"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TileError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TileError::Engine { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn check_output<E>(tile: usize, input: Size, ratio: u32, out: &(Size, Vec<u8>)) -> Result<(), TileError<E>> {
    let expected = input.scaled(ratio);
    if out.0 != expected {
        return Err(TileError::RatioMismatch { tile, expected, got: out.0 });
    }
    if out.1.len() != expected.byte_len(CHANNELS) {
        return Err(TileError::BadBuffer {
            tile,
            expected: expected.byte_len(CHANNELS),
            got: out.1.len(),
        });
    }
    Ok(())
}

/// Run `transform` over `src` tile by tile and reassemble a `(W·R)×(H·R)` buffer.
///
/// `transform` receives a packed RGB8 buffer and its size and must return the
/// transformed buffer with its size. `on_tile` is called after each tile with the
/// finished tile and the total tile count.
///
/// Images that fit in one tile are transformed in a single call and the engine output
/// is returned as is.
pub fn run_tiled<E, F, P>(
    src: &[u8],
    size: Size,
    ratio: u32,
    cfg: TileCfg,
    mut transform: F,
    mut on_tile: P,
) -> Result<Vec<u8>, TileError<E>>
where
    F: FnMut(&[u8], Size) -> Result<(Size, Vec<u8>), E>,
    P: FnMut(&Tile, usize),
{
    if ratio == 0 {
        return Err(TileError::ZeroRatio);
    }
    let expected_src = size.byte_len(CHANNELS);
    if src.len() < expected_src {
        return Err(TileError::SourceTooSmall { expected: expected_src, got: src.len() });
    }

    let tiles = plan_tiles(size, cfg);
    let total = tiles.len();

    if !needs_tiling(size, cfg) {
        let out = transform(&src[..expected_src], size)
            .map_err(|source| TileError::Engine { tile: 0, source })?;
        check_output(0, size, ratio, &out)?;
        if let Some(tile) = tiles.first() {
            on_tile(tile, total);
        }
        return Ok(out.1);
    }

    let out_size = size.scaled(ratio);
    let mut out = vec![0u8; out_size.byte_len(CHANNELS)];

    for tile in &tiles {
        let input = compact_crop(src, size.w, tile.padded);
        let result = transform(&input, tile.padded.size())
            .map_err(|source| TileError::Engine { tile: tile.index, source })?;
        check_output(tile.index, tile.padded.size(), ratio, &result)?;

        let dst = tile.owned.scaled(ratio);
        place(
            &result.1,
            result.0.w,
            tile.crop_in_output(ratio),
            &mut out,
            out_size.w,
            dst.x,
            dst.y,
        );
        on_tile(tile, total);
    }

    Ok(out)
}
