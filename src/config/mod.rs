//! # Configuration Module
//!
//! This module provides the process-wide configuration of the upscaling service.

pub mod config;

pub use config::{EngineConfig, ServerConfig, ServiceConfig, TilingConfig};
