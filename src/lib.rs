pub mod config;
pub mod error;
pub mod format;
pub mod job_state;
pub mod lossless;
pub mod mapping;
pub mod pipeline;
pub mod raster;
pub mod reconstruct;
pub mod spread;

pub use config::EngineOptions;
pub use error::ReconstructError;
pub use job_state::{JobState, JobStateStore, StatePersistence};
pub use mapping::{TileMapping, TileTransfer, TILE_SIZE};
pub use pipeline::{
    BatchDriver, BatchReport, GalleryAccess, GalleryOutcome, GallerySource, PipelineError,
};
pub use reconstruct::{reconstruct, Backend, ReconstructedImage, ReconstructionBackend};
pub use spread::{merge_spreads, SpreadError, SpreadPair};
