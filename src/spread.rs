use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::{ImageCodec, PngCodec};
use crate::reconstruct::page_path;

/// Extensions a reconstructed page may have been saved with.
const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Two pages meant to be read side by side, low page on the left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpreadPair(pub u32, pub u32);

impl SpreadPair {
    pub fn low(&self) -> u32 {
        self.0
    }

    pub fn high(&self) -> u32 {
        self.1
    }

    /// The service lists each spread twice; only the ascending entry is built.
    pub fn is_materialized(&self) -> bool {
        self.1 > self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.png", self.0, self.1)
    }
}

#[derive(Debug, Error)]
pub enum SpreadError {
    #[error("page {page} has not been reconstructed in {}", .directory.display())]
    MissingPageImage { page: u32, directory: PathBuf },
    #[error("image error for {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpreadMergeOutcome {
    pub created: Vec<PathBuf>,
    pub existing: Vec<PathBuf>,
    pub skipped: Vec<SpreadPair>,
}

pub fn merge_spreads(
    pairs: &[SpreadPair],
    directory: &Path,
) -> Result<SpreadMergeOutcome, SpreadError> {
    let mut outcome = SpreadMergeOutcome::default();

    for pair in pairs {
        if !pair.is_materialized() {
            outcome.skipped.push(*pair);
            continue;
        }

        let target = directory.join(pair.file_name());
        if target.exists() {
            log::debug!("spread {} already exists", target.display());
            outcome.existing.push(target);
            continue;
        }

        let left = load_page(directory, pair.low())?;
        let right = load_page(directory, pair.high())?;
        let merged = join_horizontally(&left, &right);

        let content = PngCodec
            .encode(&DynamicImage::ImageRgb8(merged))
            .map_err(|source| SpreadError::Image {
                path: target.clone(),
                source,
            })?;
        fs::write(&target, content)?;

        log::info!("created spread {}", target.display());
        outcome.created.push(target);
    }

    Ok(outcome)
}

pub fn find_page_image(directory: &Path, page: u32) -> Option<PathBuf> {
    PAGE_EXTENSIONS
        .iter()
        .map(|ext| page_path(directory, page, ext))
        .find(|path| path.is_file())
}

fn load_page(directory: &Path, page: u32) -> Result<RgbaImage, SpreadError> {
    let path = find_page_image(directory, page).ok_or_else(|| SpreadError::MissingPageImage {
        page,
        directory: directory.to_path_buf(),
    })?;

    let image = image::open(&path).map_err(|source| SpreadError::Image { path, source })?;
    Ok(image.to_rgba8())
}

/// Places `left` and `right` side by side, top aligned, over an opaque white
/// background so any transparency is flattened.
fn join_horizontally(left: &RgbaImage, right: &RgbaImage) -> image::RgbImage {
    let width = left.width() + right.width();
    let height = left.height().max(right.height());
    let mut canvas: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

    imageops::overlay(&mut canvas, left, 0, 0);
    imageops::overlay(&mut canvas, right, i64::from(left.width()), 0);

    DynamicImage::ImageRgba8(canvas).to_rgb8()
}
