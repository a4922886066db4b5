use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ReconstructError;
use crate::format::{ImageCodec, SourceFormat};
use crate::lossless::{JpegTran, LosslessBackend};
use crate::mapping::TileMapping;
use crate::raster::RasterBackend;

/// A descrambled page, ready for the caller to write to `save_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedImage {
    pub page_number: u32,
    pub save_path: PathBuf,
    pub content: Vec<u8>,
    pub mime_type: String,
}

impl ReconstructedImage {
    pub(crate) fn new(
        mapping: &TileMapping,
        output_dir: &Path,
        codec: &dyn ImageCodec,
        content: Vec<u8>,
    ) -> Self {
        Self {
            page_number: mapping.page_number,
            save_path: page_path(output_dir, mapping.page_number, codec.extension()),
            content,
            mime_type: codec.mime_type().to_string(),
        }
    }
}

pub fn page_path(output_dir: &Path, page: u32, extension: &str) -> PathBuf {
    output_dir.join(format!("{}.{}", page, extension))
}

pub trait ReconstructionBackend {
    fn reconstruct(
        &self,
        scrambled: &[u8],
        mapping: &TileMapping,
        output_dir: &Path,
    ) -> Result<ReconstructedImage, ReconstructError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backend {
    #[default]
    Raster,
    Lossless,
}

/// Reconstructs one page with the chosen backend. Lossless requests for
/// anything other than JPEG go through the raster backend instead.
pub fn reconstruct(
    scrambled: &[u8],
    mapping: &TileMapping,
    backend: Backend,
    output_dir: &Path,
) -> Result<ReconstructedImage, ReconstructError> {
    match backend {
        Backend::Raster => RasterBackend.reconstruct(scrambled, mapping, output_dir),
        Backend::Lossless => reconstruct_with(
            &LosslessBackend::<JpegTran>::default(),
            scrambled,
            mapping,
            output_dir,
        ),
    }
}

pub(crate) fn reconstruct_with<B: ReconstructionBackend>(
    lossless: &B,
    scrambled: &[u8],
    mapping: &TileMapping,
    output_dir: &Path,
) -> Result<ReconstructedImage, ReconstructError> {
    let format = SourceFormat::detect(scrambled);
    if format == SourceFormat::Jpeg {
        lossless.reconstruct(scrambled, mapping, output_dir)
    } else {
        log::debug!(
            "page {} is {}, using raster backend",
            mapping.page_number,
            format.name()
        );
        RasterBackend.reconstruct(scrambled, mapping, output_dir)
    }
}
