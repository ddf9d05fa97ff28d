//! # Upscale Pipeline
//!
//! Orchestrates one request end to end:
//!
//! ```text
//! load → split alpha → tiled transform → scale normalize → alpha resize/merge
//!      → post-process → atomic write
//! ```
//!
//! The pipeline is synchronous and CPU-bound. The server runs it on a blocking thread
//! and never has more than one request in flight, so buffers are owned exclusively by
//! the request being served.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fast_image_resize::Resizer;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use tempfile::NamedTempFile;
use tile_scale::cpu;
use tile_scale::plan::{build_plan, Size};
use tile_scale::tiling::TileCfg;
use tracing::{debug, info, warn};

use super::alpha;
use super::postprocess::PostProcessPipeline;
use crate::config::ServiceConfig;
use crate::engine::EngineSession;
use crate::error::{ServiceError, ServiceResult};

/// Suffix appended to output stems in batch mode; inputs already carrying it are skipped.
pub const BATCH_SUFFIX: &str = "_upscaled";

const BATCH_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// One parsed job: read `input`, write `output` at `scale` × the original size.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub scale: f64,
}

/// What a successful job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A single image of the given size was written.
    Single { size: Size },
    /// A directory job; every matching image was written.
    Batch { processed: usize },
}

pub struct UpscalePipeline {
    session: Arc<EngineSession>,
    tiles: TileCfg,
    post: PostProcessPipeline,
}

impl std::fmt::Debug for UpscalePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpscalePipeline")
            .field("session", &self.session)
            .field("tiles", &self.tiles)
            .field("post", &self.post)
            .finish()
    }
}

impl UpscalePipeline {
    pub fn new(session: Arc<EngineSession>, tiles: TileCfg, post: PostProcessPipeline) -> Self {
        Self { session, tiles, post }
    }

    /// Start the configured engine and build the standard post-processing stack.
    pub fn from_config(config: &ServiceConfig) -> ServiceResult<Self> {
        let session = EngineSession::start(&config.engine)?;
        Ok(Self::new(
            Arc::new(session),
            config.tile_cfg(),
            PostProcessPipeline::standard(&config.post_process),
        ))
    }

    pub fn session(&self) -> &EngineSession {
        &self.session
    }

    /// Run a request. A directory `input` switches to batch mode.
    pub fn process(&self, request: &TransformRequest) -> ServiceResult<Outcome> {
        if request.input.is_dir() {
            let processed = self.process_dir(&request.input, &request.output, request.scale)?;
            return Ok(Outcome::Batch { processed });
        }
        let size = self.process_file(&request.input, &request.output, request.scale)?;
        Ok(Outcome::Single { size })
    }

    /// Upscale one file on disk. Returns the written image size.
    pub fn process_file(&self, input: &Path, output: &Path, scale: f64) -> ServiceResult<Size> {
        info!("Processing {} -> {} at {}x", input.display(), output.display(), scale);
        let img = load(input)?;
        let out = self.upscale_image(img, scale)?;
        let size = Size::new(out.width(), out.height());
        write_atomic(output, &out)?;
        info!("Wrote {} ({})", output.display(), size);
        Ok(size)
    }

    /// Upscale every eligible image in `input_dir` into `output_dir`.
    ///
    /// Files are handled one at a time; a failure is logged and the rest still run.
    pub fn process_dir(&self, input_dir: &Path, output_dir: &Path, scale: f64) -> ServiceResult<usize> {
        let inputs = batch_inputs(input_dir)?;
        if inputs.is_empty() {
            warn!("No images found in {}", input_dir.display());
            return Ok(0);
        }
        fs::create_dir_all(output_dir)
            .map_err(|e| ServiceError::io_at("create_output_dir", output_dir.display().to_string(), e))?;

        let total = inputs.len();
        let mut failed = 0;
        let mut first_error = None;
        for (i, input) in inputs.iter().enumerate() {
            let output = batch_output(input, output_dir);
            info!("Batch image {}/{}: {}", i + 1, total, input.display());
            if let Err(e) = self.process_file(input, &output, scale) {
                let e = e.with_context(format!("batch image {} of {}: {}", i + 1, total, input.display()));
                warn!("Skipping {}: {}", input.display(), e);
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(first) => Err(ServiceError::batch(failed, total, first)
                .with_metadata("input_dir", input_dir.display().to_string())),
            None => Ok(total),
        }
    }

    /// In-memory part of the pipeline: everything between decode and encode.
    pub fn upscale_image(&self, img: DynamicImage, scale: f64) -> ServiceResult<DynamicImage> {
        let original = Size::new(img.width(), img.height());
        let plan = build_plan(original, self.session.ratio(), scale)?;
        debug!(
            original = %plan.original,
            native = %plan.native,
            out = %plan.out,
            resample = ?plan.resample,
            "Scale plan"
        );

        let planes = alpha::split(img)?;
        let native = self.session.transform_tiled(&planes.color, self.tiles)?;

        let mut resizer = Resizer::new();
        let color = cpu::normalize_rgb(&mut resizer, native.into_raw(), &plan)?;
        let color = RgbImage::from_raw(plan.out.w, plan.out.h, color)
            .ok_or_else(|| ServiceError::scale(format!("normalized buffer does not match {}", plan.out)))?;

        let alpha = planes
            .alpha
            .map(|a| alpha::resize_alpha(&mut resizer, &a, plan.out.w, plan.out.h))
            .transpose()?;

        let color = self.post.apply(color)?;
        alpha::merge(color, alpha)
    }
}

fn load(path: &Path) -> ServiceResult<DynamicImage> {
    let shown = path.display().to_string();
    if !path.is_file() {
        return Err(ServiceError::input_not_found(shown));
    }
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|_| ServiceError::input_not_found(shown.clone()))?;
    reader
        .decode()
        .map_err(|e| ServiceError::decode(shown, e.to_string()))
}

/// Encode into a temporary file beside `path`, then rename it into place.
fn write_atomic(path: &Path, img: &DynamicImage) -> ServiceResult<()> {
    let shown = path.display().to_string();
    let format = ImageFormat::from_path(path).map_err(|e| ServiceError::encode(shown.clone(), e.to_string()))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| ServiceError::io_at("create_temp_output", dir.display().to_string(), e))?;

    // JPEG has no alpha channel.
    let flattened;
    let img = if format == ImageFormat::Jpeg && img.color().has_alpha() {
        flattened = DynamicImage::ImageRgb8(img.to_rgb8());
        &flattened
    } else {
        img
    };

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        img.write_to(&mut writer, format)
            .map_err(|e| ServiceError::encode(shown.clone(), e.to_string()))?;
        writer
            .flush()
            .map_err(|e| ServiceError::io_at("write_output", shown.clone(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| ServiceError::io_at("persist_output", shown, e.error))?;
    Ok(())
}

fn batch_inputs(dir: &Path) -> ServiceResult<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).map_err(|e| ServiceError::io_at("read_input_dir", dir.display().to_string(), e))?;
    let mut inputs = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| ServiceError::io_at("read_input_dir", dir.display().to_string(), e))?
            .path();
        if path.is_file() && is_batch_candidate(&path) {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}

fn is_batch_candidate(path: &Path) -> bool {
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| BATCH_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false);
    let stem_ok = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| !s.contains(BATCH_SUFFIX))
        .unwrap_or(false);
    ext_ok && stem_ok
}

fn batch_output(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    output_dir.join(format!("{}{}.png", stem, BATCH_SUFFIX))
}
