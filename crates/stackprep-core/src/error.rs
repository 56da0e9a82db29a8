use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid parameters: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Cannot export parameters: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid session data: {0}")]
    Session(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Fatal run error: {0}")]
    Fatal(String),
}

/// Failures reported by an [`ImageSource`](crate::engine::ImageSource) or
/// [`ImageSink`](crate::engine::ImageSink).
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("No such file: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unreadable image format: {}: {reason}", .path.display())]
    UnreadableFormat { path: PathBuf, reason: String },

    #[error("Multiple images per file are not supported: {}", .0.display())]
    MultiImageUnsupported(PathBuf),

    #[error("Cannot create {}: {reason}", .path.display())]
    Create { path: PathBuf, reason: String },

    #[error("Cannot write {}: {reason}", .path.display())]
    Write { path: PathBuf, reason: String },

    #[error("Cannot decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

impl ImageError {
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::UnreadableFormat {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    }
}

/// Failure of one external processing engine call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{engine} failed: {reason}")]
    Failed { engine: &'static str, reason: String },

    #[error("{engine} produced no output")]
    NoOutput { engine: &'static str },
}

pub type Result<T> = std::result::Result<T, PrepError>;
