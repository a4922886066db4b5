use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Edge length of the square scrambling unit, in source pixels.
pub const TILE_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TileTransfer {
    #[serde(alias = "sx")]
    pub source_x: u32,
    #[serde(alias = "sy")]
    pub source_y: u32,
    #[serde(alias = "dx")]
    pub dest_x: u32,
    #[serde(alias = "dy")]
    pub dest_y: u32,
}

impl TileTransfer {
    pub const fn new(source_x: u32, source_y: u32, dest_x: u32, dest_y: u32) -> Self {
        Self {
            source_x,
            source_y,
            dest_x,
            dest_y,
        }
    }

    /// The same move in the opposite direction.
    pub const fn inverted(self) -> Self {
        Self {
            source_x: self.dest_x,
            source_y: self.dest_y,
            dest_x: self.source_x,
            dest_y: self.source_y,
        }
    }
}

/// How to reassemble one scrambled page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TileMapping {
    #[serde(alias = "page")]
    pub page_number: u32,
    #[serde(alias = "mapping")]
    pub transfers: Vec<TileTransfer>,
    #[serde(alias = "width")]
    pub final_width: u32,
    #[serde(alias = "height")]
    pub final_height: u32,
    #[serde(default, alias = "filename")]
    pub source_filename: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub const fn tile(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            width: TILE_SIZE,
            height: TILE_SIZE,
        }
    }

    fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = u64::from(self.x) + u64::from(self.width);
        let bottom = u64::from(self.y) + u64::from(self.height);
        right <= u64::from(width) && bottom <= u64::from(height)
    }
}

impl std::fmt::Display for TileRect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSide {
    Source,
    Destination,
}

impl std::fmt::Display for TileSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TileSide::Source => f.write_str("source"),
            TileSide::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("page {page} has no tile transfers")]
    Empty { page: u32 },
    #[error("page {page} has invalid final size {width}x{height} for a {canvas_width}x{canvas_height} canvas")]
    InvalidDimensions {
        page: u32,
        width: u32,
        height: u32,
        canvas_width: u32,
        canvas_height: u32,
    },
    #[error("page {page} transfer #{index} {side} tile {rect} exceeds {width}x{height}")]
    OutOfBounds {
        page: u32,
        index: usize,
        side: TileSide,
        rect: TileRect,
        width: u32,
        height: u32,
    },
}

impl TileMapping {
    /// Checks the mapping against the scrambled image size, which is also the
    /// size of the destination canvas.
    pub fn validate(&self, dimensions: (u32, u32)) -> Result<(), MappingError> {
        let (width, height) = dimensions;

        if self.transfers.is_empty() {
            return Err(MappingError::Empty {
                page: self.page_number,
            });
        }

        if self.final_width == 0
            || self.final_height == 0
            || self.final_width > width
            || self.final_height > height
        {
            return Err(MappingError::InvalidDimensions {
                page: self.page_number,
                width: self.final_width,
                height: self.final_height,
                canvas_width: width,
                canvas_height: height,
            });
        }

        for (index, transfer) in self.transfers.iter().enumerate() {
            let checks = [
                (
                    TileSide::Source,
                    TileRect::tile(transfer.source_x, transfer.source_y),
                ),
                (
                    TileSide::Destination,
                    TileRect::tile(transfer.dest_x, transfer.dest_y),
                ),
            ];
            for (side, rect) in checks {
                if !rect.fits_within(width, height) {
                    return Err(MappingError::OutOfBounds {
                        page: self.page_number,
                        index,
                        side,
                        rect,
                        width,
                        height,
                    });
                }
            }
        }

        Ok(())
    }

    /// Transfers grouped by destination row, rows ascending by `dest_y`,
    /// transfer order preserved inside each row.
    pub fn rows(&self) -> Vec<TileRow> {
        let mut rows: Vec<TileRow> = Vec::new();
        for transfer in self.transfers.iter() {
            match rows.iter_mut().find(|row| row.dest_y == transfer.dest_y) {
                Some(row) => row.transfers.push(*transfer),
                None => rows.push(TileRow {
                    dest_y: transfer.dest_y,
                    transfers: vec![*transfer],
                }),
            }
        }
        rows.sort_by_key(|row| row.dest_y);
        rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRow {
    pub dest_y: u32,
    pub transfers: Vec<TileTransfer>,
}

impl TileRow {
    /// Width of the strip needed to hold every tile of the row.
    pub fn width(&self) -> u32 {
        self.transfers
            .iter()
            .map(|transfer| transfer.dest_x + TILE_SIZE)
            .max()
            .unwrap_or(TILE_SIZE)
    }
}
