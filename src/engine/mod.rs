//! # Transform Engine
//!
//! The engine is an opaque capability: it consumes an `H×W` RGB buffer and returns an
//! `(R·H)×(R·W)` RGB buffer for a fixed integer ratio `R`. Whatever sits behind the
//! [`TransformEngine`] trait (a neural network, a classical filter, a remote call) the
//! rest of the service treats it identically.
//!
//! ## Session Lifecycle
//!
//! [`EngineSession::start`] builds the configured engine once and runs a self-test on a
//! small sample image. A session that fails to come up is a startup error: the service
//! must never accept connections without a working engine. The session is then shared
//! read-only (behind an `Arc`) for the lifetime of the process.

pub mod resample;

use clap::ValueEnum;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tile_scale::plan::Size;
use tile_scale::tiling::{self, TileCfg, TileError};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{ServiceError, ServiceResult};

pub use resample::ResampleEngine;

/// Side of the square sample image used by the startup self-test.
const SAMPLE_SIDE: u32 = 8;

/// Fixed-ratio pixel transform.
pub trait TransformEngine: Send + Sync {
    /// Short identifier used in logs and error replies.
    fn name(&self) -> &str;

    /// Integer upscale ratio `R`; constant for the engine's lifetime.
    fn ratio(&self) -> u32;

    /// Transform one RGB buffer. Must return exactly `R×` the input dimensions.
    fn transform(&self, input: &RgbImage) -> ServiceResult<RgbImage>;
}

/// Built-in engines selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Pixel replication
    Nearest,
    /// Linear interpolation
    Bilinear,
    /// Catmull-Rom bicubic
    CatmullRom,
    /// Lanczos3 windowed sinc
    Lanczos3,
}

/// Build the engine described by `config`.
pub fn build_engine(config: &EngineConfig) -> ServiceResult<Box<dyn TransformEngine>> {
    Ok(Box::new(ResampleEngine::new(config.kind, config.ratio)?))
}

/// Process-wide holder of the loaded engine.
pub struct EngineSession {
    engine: Box<dyn TransformEngine>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("engine", &self.engine.name())
            .field("ratio", &self.engine.ratio())
            .finish()
    }
}

impl EngineSession {
    /// Build the configured engine and verify it.
    pub fn start(config: &EngineConfig) -> ServiceResult<Self> {
        let engine = build_engine(config)
            .map_err(|e| ServiceError::startup(format!("could not build engine: {}", e)))?;
        Self::with_engine(engine)
    }

    /// Wrap an already constructed engine, running the startup self-test.
    pub fn with_engine(engine: Box<dyn TransformEngine>) -> ServiceResult<Self> {
        let ratio = engine.ratio();
        if ratio == 0 {
            return Err(ServiceError::startup(format!(
                "engine '{}' reports a ratio of 0",
                engine.name()
            )));
        }

        let sample = RgbImage::from_fn(SAMPLE_SIDE, SAMPLE_SIDE, |x, y| {
            image::Rgb([(x * 32) as u8, (y * 32) as u8, 128])
        });
        let out = engine.transform(&sample).map_err(|e| {
            ServiceError::startup(format!("engine '{}' failed its self-test: {}", engine.name(), e))
                .with_operation("engine_self_test")
        })?;
        let expected = (SAMPLE_SIDE * ratio, SAMPLE_SIDE * ratio);
        if out.dimensions() != expected {
            return Err(ServiceError::startup(format!(
                "engine '{}' returned {}x{} for a {}x{} sample, expected {}x{}",
                engine.name(),
                out.width(),
                out.height(),
                SAMPLE_SIDE,
                SAMPLE_SIDE,
                expected.0,
                expected.1
            ))
            .with_operation("engine_self_test"));
        }

        info!(engine = engine.name(), ratio, "Engine session ready");
        Ok(Self { engine })
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn ratio(&self) -> u32 {
        self.engine.ratio()
    }

    /// Run the engine over `color`, splitting it into overlapping tiles when it exceeds
    /// the tile size. Returns the `R×` buffer.
    pub fn transform_tiled(&self, color: &RgbImage, cfg: TileCfg) -> ServiceResult<RgbImage> {
        let ratio = self.ratio();
        let size = Size::new(color.width(), color.height());
        let engine = self.engine.as_ref();

        let native = tiling::run_tiled(
            color.as_raw(),
            size,
            ratio,
            cfg,
            |buf: &[u8], tile_size: Size| -> ServiceResult<(Size, Vec<u8>)> {
                let input = RgbImage::from_raw(tile_size.w, tile_size.h, buf.to_vec()).ok_or_else(|| {
                    ServiceError::engine(engine.name(), format!("tile buffer does not match {}", tile_size))
                })?;
                let out = engine.transform(&input)?;
                Ok((Size::new(out.width(), out.height()), out.into_raw()))
            },
            |tile, total| {
                debug!(
                    tile = tile.index + 1,
                    total,
                    x = tile.owned.x,
                    y = tile.owned.y,
                    w = tile.owned.w,
                    h = tile.owned.h,
                    "Tile transformed"
                );
            },
        )
        .map_err(|e| self.tile_error(e))?;

        let out = size.scaled(ratio);
        RgbImage::from_raw(out.w, out.h, native)
            .ok_or_else(|| ServiceError::engine(self.name(), format!("assembled buffer does not match {}", out)))
    }

    fn tile_error(&self, error: TileError<ServiceError>) -> ServiceError {
        match error {
            TileError::Engine { tile, source } => source.with_metadata("tile", tile.to_string()),
            other => ServiceError::engine(self.name(), other.to_string()).with_operation("tiled_transform"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl TransformEngine for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn ratio(&self) -> u32 {
            2
        }
        fn transform(&self, _input: &RgbImage) -> ServiceResult<RgbImage> {
            Err(ServiceError::engine("broken", "weights missing"))
        }
    }

    struct WrongSize;

    impl TransformEngine for WrongSize {
        fn name(&self) -> &str {
            "wrong-size"
        }
        fn ratio(&self) -> u32 {
            4
        }
        fn transform(&self, input: &RgbImage) -> ServiceResult<RgbImage> {
            Ok(RgbImage::new(input.width() * 2, input.height() * 2))
        }
    }

    #[test]
    fn start_builds_configured_engine() {
        let session = EngineSession::start(&EngineConfig { kind: EngineKind::Nearest, ratio: 3 }).unwrap();
        assert_eq!(session.ratio(), 3);
        assert_eq!(session.name(), "nearest");
    }

    #[test]
    fn failing_self_test_is_a_startup_error() {
        let err = EngineSession::with_engine(Box::new(Broken)).unwrap_err();
        assert_eq!(err.category(), "startup");
        assert!(err.to_string().contains("weights missing"));
    }

    #[test]
    fn wrong_output_size_is_a_startup_error() {
        let err = EngineSession::with_engine(Box::new(WrongSize)).unwrap_err();
        assert_eq!(err.category(), "startup");
        assert!(err.to_string().contains("expected 32x32"));
    }

    #[test]
    fn zero_ratio_config_fails_to_start() {
        let err = EngineSession::start(&EngineConfig { kind: EngineKind::Bilinear, ratio: 0 }).unwrap_err();
        assert_eq!(err.category(), "startup");
    }

    #[test]
    fn tiled_transform_has_exact_dimensions() {
        let session = EngineSession::start(&EngineConfig { kind: EngineKind::Nearest, ratio: 2 }).unwrap();
        let img = RgbImage::from_fn(53, 29, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let out = session
            .transform_tiled(&img, TileCfg { tile_size: 16, tile_pad: 4 })
            .unwrap();
        assert_eq!(out.dimensions(), (106, 58));
        assert_eq!(out.get_pixel(105, 57), img.get_pixel(52, 28));
    }
}
