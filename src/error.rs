//! # Error Handling
//!
//! Every failure the service can hit is a [`ServiceError`]. Each variant carries an
//! [`ErrorContext`] with the operation that was running and free-form metadata, so log
//! lines can say *where* a request died without the reply text growing noisy.
//!
//! ## Propagation
//!
//! - Request-scoped errors (`InputNotFound`, `Protocol`, `EngineFailure`, `Decode`,
//!   `Encode`, `Scale`, `Io`) are caught at the server boundary and turned into an
//!   `ERROR: <description>` reply. The server keeps listening.
//! - `ConnectionReset` is swallowed: the peer is gone, nobody is left to reply to.
//! - `Startup` and `Config` errors abort the process before it starts listening.
//!
//! ## Usage
//!
//! ```rust
//! use tiled_upscale::error::{classify, ServiceError};
//!
//! let error = ServiceError::engine("lanczos3", "output has the wrong size")
//!     .with_operation("engine_self_test")
//!     .with_metadata("ratio", "4");
//!
//! assert_eq!(error.category(), "engine");
//! assert!(!classify::is_connection_reset(&error));
//! ```

use std::collections::HashMap;
use std::io;

use thiserror::Error;

use tile_scale::cpu::ScaleError;
use tile_scale::plan::PlanError;

/// Where and while doing what an error happened.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Additional metadata as key-value pairs
    pub metadata: HashMap<String, String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Base error type for the upscaling service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Source image missing or unreadable
    #[error("Could not read image {path}")]
    InputNotFound { path: String, context: ErrorContext },

    /// Source exists but could not be decoded
    #[error("Could not decode image {path}: {reason}")]
    Decode {
        path: String,
        reason: String,
        context: ErrorContext,
    },

    /// Output could not be encoded or written
    #[error("Could not write image {path}: {reason}")]
    Encode {
        path: String,
        reason: String,
        context: ErrorContext,
    },

    /// Malformed request line
    #[error("{reason}")]
    Protocol { reason: String, context: ErrorContext },

    /// Requested scale cannot be honoured, or resampling failed
    #[error("{reason}")]
    Scale { reason: String, context: ErrorContext },

    /// The transform engine raised
    #[error("Engine '{engine}' failed: {reason}")]
    EngineFailure {
        engine: String,
        reason: String,
        context: ErrorContext,
    },

    /// Peer dropped the connection mid-exchange
    #[error("Connection reset by {}", peer.as_deref().unwrap_or("peer"))]
    ConnectionReset {
        peer: Option<String>,
        context: ErrorContext,
    },

    /// Any other I/O failure
    #[error("I/O error during {operation}{}: {source}", path.as_deref().map(|p| format!(" on '{}'", p)).unwrap_or_default())]
    Io {
        operation: String,
        path: Option<String>,
        source: io::Error,
        context: ErrorContext,
    },

    /// Some images of a directory request failed
    #[error("{failed} of {total} images failed: {first}")]
    Batch {
        failed: usize,
        total: usize,
        first: Box<ServiceError>,
        context: ErrorContext,
    },

    /// Configuration rejected
    #[error("Configuration error in '{field}': {reason} (value: {value})")]
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },

    /// Service could not come up
    #[error("Startup failed: {reason}")]
    Startup { reason: String, context: ErrorContext },
}

/// Result type alias using our custom error type
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn input_not_found(path: impl Into<String>) -> Self {
        Self::InputNotFound {
            path: path.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn decode(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn encode(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn scale(reason: impl Into<String>) -> Self {
        Self::Scale {
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn engine(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineFailure {
            engine: engine.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn connection_reset(peer: Option<String>) -> Self {
        Self::ConnectionReset {
            peer,
            context: ErrorContext::new(),
        }
    }

    pub fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn io_at(operation: impl Into<String>, path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into()),
            source,
            context: ErrorContext::new(),
        }
    }

    pub fn batch(failed: usize, total: usize, first: ServiceError) -> Self {
        Self::Batch {
            failed,
            total,
            first: Box::new(first),
            context: ErrorContext::new(),
        }
    }

    pub fn config(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn startup(reason: impl Into<String>) -> Self {
        Self::Startup {
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::InputNotFound { context, .. }
            | Self::Decode { context, .. }
            | Self::Encode { context, .. }
            | Self::Protocol { context, .. }
            | Self::Scale { context, .. }
            | Self::EngineFailure { context, .. }
            | Self::ConnectionReset { context, .. }
            | Self::Io { context, .. }
            | Self::Batch { context, .. }
            | Self::Config { context, .. }
            | Self::Startup { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::InputNotFound { context, .. }
            | Self::Decode { context, .. }
            | Self::Encode { context, .. }
            | Self::Protocol { context, .. }
            | Self::Scale { context, .. }
            | Self::EngineFailure { context, .. }
            | Self::ConnectionReset { context, .. }
            | Self::Io { context, .. }
            | Self::Batch { context, .. }
            | Self::Config { context, .. }
            | Self::Startup { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::InputNotFound { .. } => "input_not_found",
            Self::Decode { .. } => "decode",
            Self::Encode { .. } => "encode",
            Self::Protocol { .. } => "protocol",
            Self::Scale { .. } => "scale",
            Self::EngineFailure { .. } => "engine",
            Self::ConnectionReset { .. } => "connection_reset",
            Self::Io { .. } => "io",
            Self::Batch { .. } => "batch",
            Self::Config { .. } => "config",
            Self::Startup { .. } => "startup",
        }
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// I/O error kinds that mean the peer went away.
    pub fn is_peer_gone(error: &io::Error) -> bool {
        matches!(
            error.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
                | io::ErrorKind::UnexpectedEof
        )
    }

    /// Reset errors are swallowed without a reply.
    pub fn is_connection_reset(error: &ServiceError) -> bool {
        match error {
            ServiceError::ConnectionReset { .. } => true,
            ServiceError::Io { source, .. } => is_peer_gone(source),
            _ => false,
        }
    }

    /// Errors that must stop the process instead of failing one request.
    pub fn is_fatal_to_process(error: &ServiceError) -> bool {
        matches!(error, ServiceError::Startup { .. } | ServiceError::Config { .. })
    }
}

impl From<io::Error> for ServiceError {
    fn from(error: io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(error: serde_json::Error) -> Self {
        Self::config("config_file", "<json>", error.to_string())
    }
}

impl From<PlanError> for ServiceError {
    fn from(error: PlanError) -> Self {
        Self::scale(error.to_string()).with_operation("scale_plan")
    }
}

impl From<ScaleError> for ServiceError {
    fn from(error: ScaleError) -> Self {
        Self::scale(error.to_string()).with_operation("resample")
    }
}

impl From<std::num::ParseFloatError> for ServiceError {
    fn from(error: std::num::ParseFloatError) -> Self {
        Self::protocol(format!("Invalid scale: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ServiceError::config("port", "abc", "not a number");
        assert_eq!(error.category(), "config");
        assert!(classify::is_fatal_to_process(&error));
        assert_eq!(
            error.to_string(),
            "Configuration error in 'port': not a number (value: abc)"
        );
    }

    #[test]
    fn test_error_with_context() {
        let error = ServiceError::engine("nearest", "tile 3 exploded")
            .with_operation("transform")
            .with_context("tiled run over 12 tiles")
            .with_metadata("tile", "3");

        assert_eq!(error.category(), "engine");
        assert_eq!(error.context().operation.as_deref(), Some("transform"));
        assert_eq!(error.context().metadata.get("tile").map(String::as_str), Some("3"));
        assert_eq!(error.to_string(), "Engine 'nearest' failed: tile 3 exploded");
    }

    #[test]
    fn test_reset_classification() {
        let reset = ServiceError::io("read_request", io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(classify::is_connection_reset(&reset));
        assert!(classify::is_connection_reset(&ServiceError::connection_reset(None)));

        let closed = ServiceError::io("close", io::Error::from(io::ErrorKind::NotConnected));
        assert!(classify::is_connection_reset(&closed));

        let other = ServiceError::io("read_request", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!classify::is_connection_reset(&other));
        assert!(!classify::is_fatal_to_process(&other));
    }

    #[test]
    fn test_io_display_with_path() {
        let error = ServiceError::io_at("rename", "/tmp/out.png", io::Error::other("disk full"));
        assert_eq!(error.to_string(), "I/O error during rename on '/tmp/out.png': disk full");
    }

    #[test]
    fn test_batch_display() {
        let error = ServiceError::batch(2, 5, ServiceError::input_not_found("/data/a.png"));
        assert_eq!(error.to_string(), "2 of 5 images failed: Could not read image /data/a.png");
        assert_eq!(error.category(), "batch");
    }

    #[test]
    fn test_plan_error_conversion() {
        let error: ServiceError = PlanError::ZeroRatio.into();
        assert_eq!(error.category(), "scale");
        assert_eq!(error.context().operation.as_deref(), Some("scale_plan"));
    }
}
