//! Error types for the formatter harness.

use thiserror::Error;

/// Harness error type
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Malformed frame header or body
    #[error("framing error: {0}")]
    Framing(String),

    /// Message body is not valid JSON
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedded module code is not valid base64
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Module bytes failed to compile
    #[error("module compilation failed: {0}")]
    Compile(String),

    /// Module declares no memory import
    #[error("no memory import declared by module")]
    MissingMemoryImport,

    /// Module still rejected the memory after the single resize retry
    #[error("memory too small: provided {provided} pages, module requires {required}")]
    MemoryTooSmall {
        /// Pages supplied on the retry
        provided: u32,
        /// Pages the module asked for after the retry
        required: u32,
    },

    /// Module requires more memory than the configured limit
    #[error("module requires {required} pages, limit is {limit}")]
    MemoryLimit {
        /// Pages the module asked for
        required: u32,
        /// Configured page limit
        limit: u32,
    },

    /// Any other linkage failure
    #[error("instantiation failed: {0}")]
    Link(String),

    /// Required export missing or of the wrong shape
    #[error("missing export: {0}")]
    MissingExport(String),

    /// Sandboxed call trapped
    #[error("trap in '{name}': {message}")]
    Trap {
        /// Export that was being called
        name: String,
        /// Trap description
        message: String,
    },

    /// Sandbox memory access out of bounds
    #[error("memory access out of bounds: offset {offset}, length {len}")]
    OutOfBounds {
        /// Start offset
        offset: usize,
        /// Length requested
        len: usize,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
