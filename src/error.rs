//! Error types for querybind.

use thiserror::Error;

/// The main error type for querybind operations.
///
/// Parse and validation errors happen once, while a method's procedure is
/// being compiled, and are fatal to producing that procedure. Data-access
/// errors are raised by the driver during invocation and pass through
/// unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed placeholder grammar inside a template block.
    #[error("Parse error in '{text}' ({start}..{end}): {message}")]
    Parse {
        /// The offending block text, stripped of surrounding whitespace.
        text: String,
        /// Byte offset of the block in the template source.
        start: usize,
        /// Byte offset one past the end of the block.
        end: usize,
        message: String,
    },

    /// A mapping plan could not be built from the method description.
    #[error("Validation error for {method}: {detail}")]
    Validation { method: String, detail: String },

    /// The selected dialect does not implement the requested capability.
    #[error("{0}")]
    Unsupported(&'static str),

    /// Invocation-time fault that is not a driver failure, such as a batch
    /// cardinality mismatch or an argument of the wrong shape.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Failure propagated unchanged from the underlying statement execution.
    #[error(transparent)]
    DataAccess(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Create a parse error for a definition block.
    pub fn parse(
        text: impl Into<String>,
        start: usize,
        end: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            text: text.into(),
            start,
            end,
            message: message.into(),
        }
    }

    /// Create a validation error naming the offending method signature.
    pub fn validation(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            method: method.into(),
            detail: detail.into(),
        }
    }

    /// Wrap a driver failure without altering it.
    pub fn data_access(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::DataAccess(Box::new(source))
    }
}

/// Result type alias for querybind operations.
pub type Result<T> = std::result::Result<T, Error>;
