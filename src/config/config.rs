//! # Service Configuration
//!
//! Configuration structures and validation for the upscaling service. Values come from
//! three layers, later layers winning:
//!
//! 1. Built-in defaults ([`ServiceConfig::default`])
//! 2. An optional JSON file (`--config service.json`)
//! 3. Command-line flags
//!
//! ## Configuration Parameters
//!
//! | Parameter | Default | Description |
//! |-----------|---------|-------------|
//! | `server.host` | `127.0.0.1` | Listen address |
//! | `server.port` | `50051` | Listen port (`0` picks an ephemeral port) |
//! | `engine.kind` | `lanczos3` | Built-in transform engine |
//! | `engine.ratio` | `4` | Fixed integer upscale ratio `R` |
//! | `tiling.tile_size` | `400` | Owned tile side in source pixels, `0` disables tiling |
//! | `tiling.tile_pad` | `10` | Context margin per tile side |
//! | `post_process.*` | see [`PostProcessCfg`] | Enhancement filter stack |
//!
//! ## Examples
//!
//! ```rust
//! use tiled_upscale::config::ServiceConfig;
//!
//! let config: ServiceConfig = serde_json::from_str(
//!     r#"{ "server": { "port": 6000 }, "tiling": { "tile_size": 256 } }"#,
//! ).unwrap();
//!
//! assert_eq!(config.server.port, 6000);
//! assert_eq!(config.server.host, "127.0.0.1");
//! assert_eq!(config.tiling.tile_size, 256);
//! assert_eq!(config.tiling.tile_pad, 10);
//! assert!(config.validate().is_ok());
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tile_scale::tiling::TileCfg;

use crate::engine::EngineKind;
use crate::error::{ServiceError, ServiceResult};
use crate::processing::postprocess::PostProcessCfg;

/// Smallest non-zero tile side accepted.
pub const MIN_TILE_SIZE: u32 = 16;

/// Largest engine ratio accepted.
pub const MAX_RATIO: u32 = 16;

/// Listening address of the request server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which engine to load at startup and its fixed ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub ratio: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Lanczos3,
            ratio: 4,
        }
    }
}

/// Serializable mirror of [`TileCfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_size: u32,
    pub tile_pad: u32,
}

impl Default for TilingConfig {
    fn default() -> Self {
        let cfg = TileCfg::default();
        Self {
            tile_size: cfg.tile_size,
            tile_pad: cfg.tile_pad,
        }
    }
}

impl From<TilingConfig> for TileCfg {
    fn from(value: TilingConfig) -> Self {
        TileCfg {
            tile_size: value.tile_size,
            tile_pad: value.tile_pad,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub tiling: TilingConfig,
    pub post_process: PostProcessCfg,
}

impl ServiceConfig {
    /// Load a JSON configuration file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> ServiceResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ServiceError::io_at("read_config", path.display().to_string(), e))?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(ServiceError::config("server.host", "", "must not be empty"));
        }
        if self.engine.ratio == 0 || self.engine.ratio > MAX_RATIO {
            return Err(ServiceError::config(
                "engine.ratio",
                self.engine.ratio.to_string(),
                format!("must be between 1 and {}", MAX_RATIO),
            ));
        }
        let tiling = self.tiling;
        if tiling.tile_size != 0 && tiling.tile_size < MIN_TILE_SIZE {
            return Err(ServiceError::config(
                "tiling.tile_size",
                tiling.tile_size.to_string(),
                format!("must be 0 (disabled) or at least {}", MIN_TILE_SIZE),
            ));
        }
        if tiling.tile_size != 0 && tiling.tile_pad >= tiling.tile_size {
            return Err(ServiceError::config(
                "tiling.tile_pad",
                tiling.tile_pad.to_string(),
                "must be smaller than tiling.tile_size",
            ));
        }
        self.post_process.validate()?;
        Ok(())
    }

    pub fn tile_cfg(&self) -> TileCfg {
        self.tiling.into()
    }
}
