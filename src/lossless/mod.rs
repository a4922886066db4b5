//! JPEG reconstruction by moving encoded blocks instead of pixels.
//!
//! Every tile is cut out of the scrambled stream and dropped into a row strip,
//! rows are built in parallel and then stacked top to bottom onto a canvas
//! cropped from the source. Nothing is decoded or requantized, so the output
//! keeps the quantization of the file the service sent.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tempfile::TempDir;

mod jpegtran;
pub use jpegtran::{JpegTran, JpegTransform, TransformError};

use crate::error::ReconstructError;
use crate::format::{ImageCodec, JpegCodec, SourceFormat};
use crate::mapping::{TileMapping, TileRect, TileRow, TILE_SIZE};
use crate::reconstruct::{ReconstructedImage, ReconstructionBackend};

#[derive(Debug, Clone, Default)]
pub struct LosslessBackend<T: JpegTransform = JpegTran> {
    tool: T,
    workers: Option<usize>,
}

impl<T: JpegTransform> LosslessBackend<T> {
    pub fn new(tool: T) -> Self {
        Self {
            tool,
            workers: None,
        }
    }

    /// Caps the row worker pool; defaults to the available parallelism.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    fn worker_count(&self, rows: usize) -> usize {
        let available = self.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|value| value.get())
                .unwrap_or(1)
        });
        available.min(rows.max(1))
    }

    fn build_row(
        &self,
        workspace: &Path,
        source: &Path,
        index: usize,
        row: &TileRow,
    ) -> Result<PathBuf, ReconstructError> {
        let mut current = workspace.join(format!("row{}-seed.jpg", index));
        self.tool
            .crop(source, strip(row.width(), TILE_SIZE), &current)?;

        for (step, transfer) in row.transfers.iter().enumerate() {
            let tile = workspace.join(format!("row{}-tile{}.jpg", index, step));
            self.tool.crop(
                source,
                TileRect::tile(transfer.source_x, transfer.source_y),
                &tile,
            )?;

            let next = workspace.join(format!("row{}-step{}.jpg", index, step));
            self.tool.splice(&current, &tile, transfer.dest_x, 0, &next)?;
            fs::remove_file(&tile)?;
            fs::remove_file(&current)?;
            current = next;
        }

        Ok(current)
    }

    /// Builds every row on the worker pool. Slot `i` holds the strip for
    /// `rows[i]`, whichever worker finished it.
    fn build_rows(
        &self,
        workspace: &Path,
        source: &Path,
        rows: &[TileRow],
    ) -> Result<Vec<PathBuf>, ReconstructError> {
        let slots: Vec<Mutex<Option<Result<PathBuf, ReconstructError>>>> =
            rows.iter().map(|_| Mutex::new(None)).collect();
        let cursor = AtomicUsize::new(0);
        let worker_count = self.worker_count(rows.len());

        thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= rows.len() {
                        break;
                    }

                    let outcome = self.build_row(workspace, source, index, &rows[index]);
                    let mut slot = slots[index].lock().expect("row slot poisoned");
                    *slot = Some(outcome);
                });
            }
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.into_inner()
                    .expect("row slot poisoned")
                    .unwrap_or_else(|| {
                        Err(ReconstructError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("row {} was never built", index),
                        )))
                    })
            })
            .collect()
    }
}

fn strip(width: u32, height: u32) -> TileRect {
    TileRect {
        x: 0,
        y: 0,
        width,
        height,
    }
}

impl<T: JpegTransform> ReconstructionBackend for LosslessBackend<T> {
    fn reconstruct(
        &self,
        scrambled: &[u8],
        mapping: &TileMapping,
        output_dir: &Path,
    ) -> Result<ReconstructedImage, ReconstructError> {
        let format = SourceFormat::detect(scrambled);
        if format != SourceFormat::Jpeg {
            return Err(ReconstructError::UnsupportedFormat(format.name()));
        }

        let codec = JpegCodec;
        let (width, height) = codec
            .dimensions(scrambled)
            .map_err(|err| ReconstructError::Decode(err.to_string()))?;
        mapping.validate((width, height))?;

        let rows = mapping.rows();
        log::debug!(
            "lossless reconstruction of page {} ({} rows, {} tiles)",
            mapping.page_number,
            rows.len(),
            mapping.transfers.len()
        );

        // Dropped on every return path, taking all intermediates with it.
        let workspace = tempfile::Builder::new()
            .prefix("page-reconstruct")
            .tempdir()?;
        let content = self.assemble(&workspace, scrambled, mapping, &rows, (width, height))?;

        Ok(ReconstructedImage::new(mapping, output_dir, &codec, content))
    }
}

impl<T: JpegTransform> LosslessBackend<T> {
    fn assemble(
        &self,
        workspace: &TempDir,
        scrambled: &[u8],
        mapping: &TileMapping,
        rows: &[TileRow],
        dimensions: (u32, u32),
    ) -> Result<Vec<u8>, ReconstructError> {
        let dir = workspace.path();
        let source = dir.join("source.jpg");
        fs::write(&source, scrambled)?;

        let strips = self.build_rows(dir, &source, rows)?;

        let mut canvas = dir.join("canvas-seed.jpg");
        self.tool
            .crop(&source, strip(dimensions.0, dimensions.1), &canvas)?;

        for (index, (row, strip_path)) in rows.iter().zip(strips.iter()).enumerate() {
            let next = dir.join(format!("canvas-{}.jpg", index));
            self.tool.splice(&canvas, strip_path, 0, row.dest_y, &next)?;
            fs::remove_file(&canvas)?;
            canvas = next;
        }

        let output = dir.join("output.jpg");
        self.tool
            .finish(&canvas, mapping.final_width, mapping.final_height, &output)?;

        Ok(fs::read(&output)?)
    }
}
