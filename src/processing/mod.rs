//! # Processing Module
//!
//! Everything that happens to an image between decode and encode: alpha handling,
//! the post-processing filter stack, and the request pipeline that ties them to the
//! transform engine.

pub mod alpha;
pub mod pipeline;
pub mod postprocess;

pub use pipeline::{Outcome, TransformRequest, UpscalePipeline};
pub use postprocess::{ImageFilter, PostProcessCfg, PostProcessPipeline};
