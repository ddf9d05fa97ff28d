//! # Tiled Upscale Service
//!
//! A bounded-memory image upscaling service. An opaque fixed-ratio transform engine is
//! driven over overlapping tiles, the tiles are stitched back at exact pixel boundaries,
//! the result is resampled to the scale the client asked for, and a deterministic
//! enhancement stack runs before the image is written to disk.
//!
//! ## Architecture
//!
//! - `config`: Layered service configuration and validation
//! - `engine`: The [`TransformEngine`](engine::TransformEngine) trait and the startup session
//! - `processing`: Alpha handling, post-processing filters and the request pipeline
//! - `server`: Text wire protocol and the single-flight TCP server
//! - `error`: Service error type and classification helpers
//!
//! Pixel plumbing that knows nothing about files or sockets (tile planning, scale plans,
//! SIMD resampling) lives in the `tile_scale` workspace crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tiled_upscale::config::ServiceConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ServiceConfig::default();
//! config.server.port = 6000;
//!
//! tiled_upscale::serve(config, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

pub mod config;
pub mod engine;
pub mod error;
pub mod processing;
pub mod server;

pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use processing::{Outcome, TransformRequest, UpscalePipeline};
pub use server::RequestServer;

/// Validate `config`, bring up the engine, bind the listener and serve until `shutdown`
/// resolves.
///
/// # Errors
///
/// Returns a startup or configuration error if the service cannot come up. Once the
/// server is accepting connections, per-request failures are answered on the wire and
/// never surface here.
pub async fn serve<F>(config: ServiceConfig, shutdown: F) -> ServiceResult<()>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    let pipeline = UpscalePipeline::from_config(&config)?;
    let server = RequestServer::bind(&config.server.addr(), Arc::new(pipeline)).await?;
    server.run_until(shutdown).await
}

/// Run one job without a socket, the same way the server would.
pub fn upscale_once(config: &ServiceConfig, request: &TransformRequest) -> ServiceResult<Outcome> {
    config.validate()?;
    UpscalePipeline::from_config(config)?.process(request)
}
