//! Full requests through the server and through the socket-less entry point.

mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{alpha_ramp, gradient, request_line, start_server, start_server_with, test_config, write_png};
use image::{DynamicImage, GenericImageView, RgbImage};
use tile_scale::tiling::TileCfg;
use tiled_upscale::config::ServiceConfig;
use tiled_upscale::engine::{EngineKind, EngineSession, ResampleEngine, TransformEngine};
use tiled_upscale::processing::PostProcessPipeline;
use tiled_upscale::server::send_request;
use tiled_upscale::{Outcome, ServiceError, ServiceResult, TransformRequest, UpscalePipeline};

/// Nearest-neighbour engine that gives out partway through a tiled job.
///
/// Call 1 is the session self-test, so failing on call 4 hits the third tile.
struct FlakyEngine {
    inner: ResampleEngine,
    calls: AtomicUsize,
    fail_on: usize,
    panics: bool,
}

impl FlakyEngine {
    fn new(panics: bool) -> Self {
        Self {
            inner: ResampleEngine::new(EngineKind::Nearest, 2).unwrap(),
            calls: AtomicUsize::new(0),
            fail_on: 4,
            panics,
        }
    }
}

impl TransformEngine for FlakyEngine {
    fn name(&self) -> &str {
        "flaky"
    }

    fn ratio(&self) -> u32 {
        2
    }

    fn transform(&self, input: &RgbImage) -> ServiceResult<RgbImage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            if self.panics {
                panic!("tile {} blew up", call);
            }
            return Err(ServiceError::engine("flaky", format!("tile {} ran out of memory", call)));
        }
        self.inner.transform(input)
    }
}

fn flaky_pipeline(panics: bool) -> UpscalePipeline {
    let session = EngineSession::with_engine(Box::new(FlakyEngine::new(panics))).unwrap();
    UpscalePipeline::new(
        Arc::new(session),
        TileCfg { tile_size: 48, tile_pad: 8 },
        PostProcessPipeline::new(),
    )
}

async fn assert_engine_failure_is_contained(panics: bool) {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "in.png", DynamicImage::ImageRgb8(gradient(100, 100)));
    let output = dir.path().join("out.png");

    let server = start_server_with(flaky_pipeline(panics)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 2.0))
        .await
        .unwrap();
    assert!(reply.starts_with("ERROR: "), "unexpected reply: {}", reply);
    assert!(reply.contains("flaky"), "unexpected reply: {}", reply);
    assert!(!output.exists());

    let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(leftovers.len(), 1, "only the input should remain");

    let pong = send_request(&server.addr_string(), "PING").await.unwrap();
    assert_eq!(pong, "PONG");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn engine_error_mid_job_fails_request_without_output() {
    assert_engine_failure_is_contained(false).await;
}

#[tokio::test]
async fn engine_panic_mid_job_fails_request_without_output() {
    assert_engine_failure_is_contained(true).await;
}

#[tokio::test]
async fn native_scale_request_writes_exact_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(
        dir.path(),
        "in.png",
        DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, image::Rgb([120, 80, 40]))),
    );
    let output = dir.path().join("out.png");

    let server = start_server(test_config(EngineKind::Lanczos3, 4)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 4.0))
        .await
        .unwrap();
    assert_eq!(reply, "SUCCESS");

    let written = image::open(&output).unwrap();
    assert_eq!(written.dimensions(), (400, 400));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn missing_input_replies_error_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("missing.png");
    let output = dir.path().join("out.png");

    let server = start_server(test_config(EngineKind::Nearest, 4)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 2.0))
        .await
        .unwrap();
    assert!(reply.starts_with("ERROR: "), "{}", reply);
    assert!(reply.contains("missing.png"));
    assert!(!output.exists());

    // No temporary files are left behind either.
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn half_ratio_scale_halves_native_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "in.png", DynamicImage::ImageRgb8(gradient(41, 27)));
    let output = dir.path().join("out.png");

    let server = start_server(test_config(EngineKind::Bilinear, 4)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 2.0))
        .await
        .unwrap();
    assert_eq!(reply, "SUCCESS");
    assert_eq!(image::open(&output).unwrap().dimensions(), (82, 54));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn fractional_scale_rounds_down_each_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "in.png", DynamicImage::ImageRgb8(gradient(33, 17)));
    let output = dir.path().join("out.png");

    let server = start_server(test_config(EngineKind::CatmullRom, 2)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 1.5))
        .await
        .unwrap();
    assert_eq!(reply, "SUCCESS");
    // floor(33 * 1.5) = 49, floor(17 * 1.5) = 25
    assert_eq!(image::open(&output).unwrap().dimensions(), (49, 25));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn alpha_ramp_stays_monotonic_through_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "ramp.png", DynamicImage::ImageRgba8(alpha_ramp(64, 20)));
    let output = dir.path().join("ramp_out.png");

    let server = start_server(test_config(EngineKind::Bilinear, 2)).await;
    let reply = send_request(&server.addr_string(), &request_line(&input, &output, 3.0))
        .await
        .unwrap();
    assert_eq!(reply, "SUCCESS");

    let written = image::open(&output).unwrap();
    assert!(written.color().has_alpha());
    let rgba = written.into_rgba8();
    assert_eq!(rgba.dimensions(), (192, 60));
    for y in 0..rgba.height() {
        for x in 1..rgba.width() {
            assert!(rgba.get_pixel(x, y).0[3] >= rgba.get_pixel(x - 1, y).0[3], "at ({}, {})", x, y);
        }
    }
    assert!(rgba.get_pixel(0, 30).0[3] < 10);
    assert!(rgba.get_pixel(191, 30).0[3] > 245);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn directory_request_runs_batch_mode() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    let outputs = dir.path().join("outputs");
    fs::create_dir(&inputs).unwrap();
    write_png(&inputs, "a.png", DynamicImage::ImageRgb8(gradient(20, 10)));
    write_png(&inputs, "b.JPG", DynamicImage::ImageRgb8(gradient(12, 12)));
    write_png(&inputs, "c_upscaled.png", DynamicImage::ImageRgb8(gradient(8, 8)));
    fs::write(inputs.join("notes.txt"), "not an image").unwrap();

    let server = start_server(test_config(EngineKind::Nearest, 2)).await;
    let reply = send_request(&server.addr_string(), &request_line(&inputs, &outputs, 2.0))
        .await
        .unwrap();
    assert_eq!(reply, "SUCCESS");

    let mut written: Vec<String> = fs::read_dir(&outputs)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    written.sort();
    assert_eq!(written, vec!["a_upscaled.png", "b_upscaled.png"]);
    assert_eq!(image::open(outputs.join("a_upscaled.png")).unwrap().dimensions(), (40, 20));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn batch_reports_failures_but_finishes_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    let outputs = dir.path().join("outputs");
    fs::create_dir(&inputs).unwrap();
    fs::write(inputs.join("broken.png"), b"garbage").unwrap();
    write_png(&inputs, "good.png", DynamicImage::ImageRgb8(gradient(10, 10)));

    let server = start_server(test_config(EngineKind::Nearest, 2)).await;
    let reply = send_request(&server.addr_string(), &request_line(&inputs, &outputs, 2.0))
        .await
        .unwrap();
    assert!(reply.starts_with("ERROR: 1 of 2 images failed: "), "{}", reply);
    assert!(outputs.join("good_upscaled.png").exists());
    assert!(!outputs.join("broken_upscaled.png").exists());
    server.stop().await.unwrap();
}

#[test]
fn one_shot_run_matches_server_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(dir.path(), "in.png", DynamicImage::ImageRgb8(gradient(30, 20)));
    let output = dir.path().join("out.jpg");

    let mut config = test_config(EngineKind::Lanczos3, 4);
    config.post_process.enabled = false;
    let outcome = tiled_upscale::upscale_once(
        &config,
        &TransformRequest {
            input,
            output: output.clone(),
            scale: 3.0,
        },
    )
    .unwrap();

    match outcome {
        Outcome::Single { size } => assert_eq!((size.w, size.h), (90, 60)),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(image::open(&output).unwrap().dimensions(), (90, 60));
}

#[test]
fn one_shot_run_rejects_invalid_config() {
    let mut config = ServiceConfig::default();
    config.engine.ratio = 0;
    let dir = tempfile::tempdir().unwrap();
    let err = tiled_upscale::upscale_once(
        &config,
        &TransformRequest {
            input: dir.path().join("in.png"),
            output: dir.path().join("out.png"),
            scale: 2.0,
        },
    )
    .unwrap_err();
    assert_eq!(err.category(), "config");
}
