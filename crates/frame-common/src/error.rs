//! Error types for the forecast frame viewer.

use thiserror::Error;

/// Result type alias using FrameError.
pub type FrameResult<T> = Result<T, FrameError>;

/// Primary error type shared by every crate in the workspace.
#[derive(Debug, Error)]
pub enum FrameError {
    // === Metadata Errors ===
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Failed to fetch metadata: {0}")]
    MetadataFetch(String),

    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Level index {index} out of range ({available} levels available)")]
    LevelOutOfRange { index: usize, available: usize },

    #[error("Variable '{0}' requires a pressure level")]
    LevelRequired(String),

    #[error("Unknown pressure level: {0}")]
    UnknownLevel(u32),

    #[error("No colormap for {0}")]
    MissingColormap(String),

    // === Scheduler Errors ===
    #[error("Time index {index} outside forecast range [0, {duration}]")]
    TimeIndexOutOfRange { index: usize, duration: usize },

    #[error("No series selected")]
    NoActiveSeries,

    #[error("{0} is not a step of the forecast run")]
    UnknownTime(String),

    // === Tile Errors ===
    #[error("Failed to fetch tile data: {0}")]
    TileFetch(String),

    #[error("Failed to decode tile: {0}")]
    TileDecode(String),

    #[error("Invalid tile archive: {0}")]
    InvalidArchive(String),

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FrameError {
    /// Whether the error only affects a single tile and should render as blank.
    pub fn is_tile_local(&self) -> bool {
        matches!(
            self,
            FrameError::TileFetch(_) | FrameError::TileDecode(_) | FrameError::InvalidArchive(_)
        )
    }
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::MalformedMetadata(format!("JSON error: {}", err))
    }
}
