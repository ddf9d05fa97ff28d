//! Shared helpers for the integration tests: synthetic images and a server running on
//! an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use tiled_upscale::config::ServiceConfig;
use tiled_upscale::engine::EngineKind;
use tiled_upscale::{RequestServer, ServiceResult, UpscalePipeline};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Horizontal ramp in red, vertical ramp in green.
pub fn gradient(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            (x * 255 / w.max(2).saturating_sub(1)) as u8,
            (y * 255 / h.max(2).saturating_sub(1)) as u8,
            96,
        ])
    })
}

/// Flat color with an alpha channel that ramps from 0 at the left edge to 255 at the right.
pub fn alpha_ramp(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, _| Rgba([40, 120, 200, (x * 255 / (w - 1)) as u8]))
}

pub fn write_png(dir: &Path, name: &str, img: DynamicImage) -> PathBuf {
    let path = dir.join(name);
    img.save(&path).unwrap();
    path
}

/// Small, fast configuration: classical engine, small tiles, ephemeral port.
pub fn test_config(kind: EngineKind, ratio: u32) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.server.port = 0;
    config.engine.kind = kind;
    config.engine.ratio = ratio;
    config.tiling.tile_size = 48;
    config.tiling.tile_pad = 8;
    config
}

pub struct RunningServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<ServiceResult<()>>,
}

impl RunningServer {
    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    pub async fn stop(mut self) -> ServiceResult<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap()
    }
}

pub async fn start_server(config: ServiceConfig) -> RunningServer {
    let pipeline = UpscalePipeline::from_config(&config).unwrap();
    serve_pipeline(&config.server.addr(), pipeline).await
}

/// Serve an already assembled pipeline, e.g. one wrapping a custom engine.
pub async fn start_server_with(pipeline: UpscalePipeline) -> RunningServer {
    serve_pipeline("127.0.0.1:0", pipeline).await
}

async fn serve_pipeline(addr: &str, pipeline: UpscalePipeline) -> RunningServer {
    let server = RequestServer::bind(addr, Arc::new(pipeline)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));
    RunningServer {
        addr,
        stop: Some(tx),
        handle,
    }
}

pub fn request_line(input: &Path, output: &Path, scale: f64) -> String {
    format!("{}|{}|{}", input.display(), output.display(), scale)
}
