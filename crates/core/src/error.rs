//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidBoundingBox(String),

    #[error("{0}")]
    InvalidZoomRange(String),

    #[error("area is an invalid geojson: {0}")]
    InvalidGeometry(String),

    #[error("{0}")]
    InvalidTile(String),

    #[error("invalid metatile size: {0} (must be a positive integer)")]
    InvalidMetatile(u32),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error describes bad caller input rather than an internal failure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Serialization(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
