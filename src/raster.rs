use std::path::Path;

use image::{imageops, DynamicImage, GenericImageView, ImageBuffer, Pixel};

use crate::error::ReconstructError;
use crate::format::SourceFormat;
use crate::mapping::{TileMapping, TileTransfer, TILE_SIZE};
use crate::reconstruct::{ReconstructedImage, ReconstructionBackend};

/// Decodes the scrambled page, moves tiles in pixel space and re-encodes in
/// the source format at maximum quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterBackend;

impl ReconstructionBackend for RasterBackend {
    fn reconstruct(
        &self,
        scrambled: &[u8],
        mapping: &TileMapping,
        output_dir: &Path,
    ) -> Result<ReconstructedImage, ReconstructError> {
        let format = SourceFormat::detect(scrambled);
        let codec = format.codec().ok_or_else(|| {
            ReconstructError::Decode(format!(
                "unrecognized image signature for page {}",
                mapping.page_number
            ))
        })?;

        let source = codec
            .decode(scrambled)
            .map_err(|err| ReconstructError::Decode(err.to_string()))?;
        mapping.validate(source.dimensions())?;

        log::debug!(
            "descrambling page {} ({} tiles, {}x{} -> {}x{})",
            mapping.page_number,
            mapping.transfers.len(),
            source.width(),
            source.height(),
            mapping.final_width,
            mapping.final_height
        );

        let output = descramble_image(&source, mapping);
        let content = codec.encode(&output).map_err(ReconstructError::Encode)?;

        Ok(ReconstructedImage::new(mapping, output_dir, codec, content))
    }
}

/// Composites `mapping` onto a canvas shaped like `source`, keeping its pixel
/// layout. The mapping must already be validated against `source`.
pub fn descramble_image(source: &DynamicImage, mapping: &TileMapping) -> DynamicImage {
    let transfers = mapping.transfers.as_slice();
    let (width, height) = (mapping.final_width, mapping.final_height);
    match source {
        DynamicImage::ImageLuma8(buffer) => {
            DynamicImage::ImageLuma8(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageLumaA8(buffer) => {
            DynamicImage::ImageLumaA8(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageRgb8(buffer) => {
            DynamicImage::ImageRgb8(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageRgba8(buffer) => {
            DynamicImage::ImageRgba8(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageLuma16(buffer) => {
            DynamicImage::ImageLuma16(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageLumaA16(buffer) => {
            DynamicImage::ImageLumaA16(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageRgb16(buffer) => {
            DynamicImage::ImageRgb16(descramble_buffer(buffer, transfers, width, height))
        }
        DynamicImage::ImageRgba16(buffer) => {
            DynamicImage::ImageRgba16(descramble_buffer(buffer, transfers, width, height))
        }
        other => DynamicImage::ImageRgba16(descramble_buffer(
            &other.to_rgba16(),
            transfers,
            width,
            height,
        )),
    }
}

fn descramble_buffer<P>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
    transfers: &[TileTransfer],
    final_width: u32,
    final_height: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (width, height) = source.dimensions();
    let mut canvas: ImageBuffer<P, Vec<P::Subpixel>> = ImageBuffer::new(width, height);

    for transfer in transfers {
        let tile = imageops::crop_imm(
            source,
            transfer.source_x,
            transfer.source_y,
            TILE_SIZE,
            TILE_SIZE,
        )
        .to_image();
        imageops::replace(
            &mut canvas,
            &tile,
            i64::from(transfer.dest_x),
            i64::from(transfer.dest_y),
        );
    }

    imageops::crop_imm(&canvas, 0, 0, final_width, final_height).to_image()
}
