use std::io;

use thiserror::Error;

use crate::lossless::TransformError;
use crate::mapping::MappingError;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("invalid tile mapping: {0}")]
    InvalidMapping(MappingError),
    #[error("tile mapping out of bounds: {0}")]
    MappingOutOfBounds(MappingError),
    #[error("scrambled image could not be decoded: {0}")]
    Decode(String),
    #[error("lossless backend only accepts JPEG sources, got {0}")]
    UnsupportedFormat(&'static str),
    #[error("lossless transform failed: {0}")]
    TransformTool(#[from] TransformError),
    #[error("failed to encode reconstructed image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<MappingError> for ReconstructError {
    fn from(value: MappingError) -> Self {
        match value {
            MappingError::OutOfBounds { .. } => ReconstructError::MappingOutOfBounds(value),
            other => ReconstructError::InvalidMapping(other),
        }
    }
}
