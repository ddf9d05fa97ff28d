//! # Server Module
//!
//! TCP front end of the service: the text wire protocol and the single-flight
//! accept loop that feeds requests into the [`UpscalePipeline`](crate::processing::UpscalePipeline).

pub mod protocol;
pub mod server;

pub use protocol::{parse_request, reply_for, Command};
pub use server::{send_request, RequestServer};
