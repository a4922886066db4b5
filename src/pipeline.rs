//! Sequential gallery processing on top of the reconstruction engine.
//!
//! A [`GallerySource`] owns everything network related: it reports whether a
//! gallery can be read, lists its pages and spreads, and hands back the
//! scrambled bytes with the tile mapping for each page. The driver persists
//! those inputs, reconstructs and verifies every page, builds spreads and
//! records the gallery in the job state once every listed page is on disk.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::config::EngineOptions;
use crate::error::ReconstructError;
use crate::job_state::{FileStatePersistence, JobState, JobStateStore, StatePersistence};
use crate::lossless::{JpegTran, LosslessBackend};
use crate::mapping::TileMapping;
use crate::raster::RasterBackend;
use crate::reconstruct::{reconstruct_with, Backend, ReconstructedImage, ReconstructionBackend};
use crate::spread::{merge_spreads, SpreadError, SpreadPair};

pub const SCRAMBLED_DIR: &str = "scrambled";
pub const MAPPINGS_FILE: &str = "mappings.json";

pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One page as listed by the gallery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPage {
    pub page_number: u32,
    /// Opaque identifier passed back to the source when acquiring the page.
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryAccess {
    Inaccessible,
    Available {
        session_token: String,
        pages: Vec<GalleryPage>,
        spreads: Vec<SpreadPair>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredPage {
    pub mapping: TileMapping,
    pub scrambled: Vec<u8>,
}

/// Supplies gallery listings and scrambled pages. Implemented by the caller.
pub trait GallerySource {
    fn open_gallery(&self, url: &Url) -> Result<GalleryAccess, SourceError>;

    /// Returns the tile mapping and scrambled bytes for one page. The same
    /// page and session token always yield the same mapping.
    fn acquire_permutation(
        &self,
        page: &GalleryPage,
        session_token: &str,
    ) -> Result<AcquiredPage, SourceError>;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not a gallery url: {0}")]
    InvalidGalleryUrl(String),
    #[error("gallery source failed for {url}: {source}")]
    Source {
        url: String,
        page: Option<u32>,
        #[source]
        source: SourceError,
    },
    #[error("page {page} of {url} failed: {source}")]
    Page {
        url: String,
        page: u32,
        #[source]
        source: ReconstructError,
    },
    #[error("spread merge failed: {0}")]
    Spread(#[from] SpreadError),
    #[error("job state could not be persisted: {0}")]
    State(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{} was written with sha256 {expected} but reads back as {actual}", .path.display())]
    Verification {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("failed to serialize tile mappings: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum GalleryOutcome {
    SkippedDone,
    SkippedInaccessible,
    MarkedInaccessible,
    Completed {
        slug: String,
        pages: usize,
        spreads_created: usize,
    },
    /// Fewer distinct page files than listed pages; not marked done.
    Incomplete {
        slug: String,
        saved: usize,
        listed: usize,
    },
}

#[derive(Debug)]
pub struct GalleryFailure {
    pub url: String,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, GalleryOutcome)>,
    pub failures: Vec<GalleryFailure>,
}

impl BatchReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, GalleryOutcome::Completed { .. }))
            .count()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingsDocument<'a> {
    gallery: &'a str,
    generated_at: DateTime<Utc>,
    pages: &'a [TileMapping],
}

/// Gallery URL reduced to its canonical identifier and download slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryId {
    pub url: Url,
    pub canonical: String,
    pub slug: String,
}

impl GalleryId {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let invalid = || PipelineError::InvalidGalleryUrl(raw.to_string());
        let mut url = Url::parse(raw.trim()).map_err(|_| invalid())?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(invalid());
        }
        url.set_query(None);
        url.set_fragment(None);

        let slug = url
            .path_segments()
            .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
            .map(str::to_string)
            .ok_or_else(invalid)?;
        if slug == "." || slug == ".." {
            return Err(invalid());
        }

        let canonical = url.as_str().trim_end_matches('/').to_string();
        Ok(Self {
            url,
            canonical,
            slug,
        })
    }
}

pub struct BatchDriver<P: StatePersistence = FileStatePersistence> {
    options: EngineOptions,
    state: JobStateStore<P>,
    lossless: LosslessBackend<JpegTran>,
}

impl BatchDriver<FileStatePersistence> {
    pub fn from_options(options: EngineOptions) -> Result<Self, PipelineError> {
        let persistence = options.state_persistence();
        Self::new(options, persistence)
    }
}

impl<P: StatePersistence> BatchDriver<P> {
    pub fn new(options: EngineOptions, persistence: P) -> Result<Self, PipelineError> {
        let state = JobStateStore::open(persistence).map_err(PipelineError::State)?;
        let lossless = options.lossless_backend();
        Ok(Self {
            options,
            state,
            lossless,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn state(&self) -> &JobStateStore<P> {
        &self.state
    }

    pub fn gallery_dir(&self, slug: &str) -> PathBuf {
        self.options.download_dir.join(slug)
    }

    /// Processes every URL in order. A failing gallery is recorded and the
    /// batch moves on.
    pub fn run<S, I>(&mut self, source: &S, urls: I) -> BatchReport
    where
        S: GallerySource,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut report = BatchReport::default();
        for url in urls {
            let url = url.as_ref();
            match self.process_gallery(source, url) {
                Ok(outcome) => report.outcomes.push((url.to_string(), outcome)),
                Err(error) => {
                    log::warn!("gallery {} failed: {}", url, error);
                    report.failures.push(GalleryFailure {
                        url: url.to_string(),
                        error,
                    });
                }
            }
        }
        log::info!(
            "batch finished: {} processed, {} failed",
            report.outcomes.len(),
            report.failures.len()
        );
        report
    }

    pub fn process_gallery<S: GallerySource>(
        &mut self,
        source: &S,
        raw_url: &str,
    ) -> Result<GalleryOutcome, PipelineError> {
        let gallery = GalleryId::parse(raw_url)?;
        let id = gallery.canonical.as_str();

        match self.state.state(id) {
            JobState::Done if !self.options.force => {
                log::info!("skipping {}: already done", id);
                return Ok(GalleryOutcome::SkippedDone);
            }
            JobState::Inaccessible => {
                log::info!("skipping {}: inaccessible", id);
                return Ok(GalleryOutcome::SkippedInaccessible);
            }
            _ => {}
        }

        let access = source
            .open_gallery(&gallery.url)
            .map_err(|source| PipelineError::Source {
                url: id.to_string(),
                page: None,
                source,
            })?;

        let (session_token, pages, spreads) = match access {
            GalleryAccess::Inaccessible => {
                log::warn!("{} is not accessible, recording it", id);
                self.state
                    .mark_inaccessible(id)
                    .map_err(PipelineError::State)?;
                return Ok(GalleryOutcome::MarkedInaccessible);
            }
            GalleryAccess::Available {
                session_token,
                pages,
                spreads,
            } => (session_token, pages, spreads),
        };

        let gallery_dir = self.gallery_dir(&gallery.slug);
        let scrambled_dir = gallery_dir.join(SCRAMBLED_DIR);
        fs::create_dir_all(&scrambled_dir)?;
        log::info!(
            "processing {} ({} pages) into {}",
            id,
            pages.len(),
            gallery_dir.display()
        );

        let mut acquired = Vec::with_capacity(pages.len());
        for page in &pages {
            let page_data = source
                .acquire_permutation(page, &session_token)
                .map_err(|source| PipelineError::Source {
                    url: id.to_string(),
                    page: Some(page.page_number),
                    source,
                })?;
            fs::write(
                scrambled_dir.join(page.page_number.to_string()),
                &page_data.scrambled,
            )?;
            acquired.push(page_data);
        }

        let mappings: Vec<TileMapping> = acquired.iter().map(|page| page.mapping.clone()).collect();
        write_mappings(&scrambled_dir.join(MAPPINGS_FILE), id, &mappings)?;

        let mut saved = BTreeSet::new();
        for page in &acquired {
            let image = self
                .reconstruct_page(&page.scrambled, &page.mapping, &gallery_dir)
                .map_err(|source| PipelineError::Page {
                    url: id.to_string(),
                    page: page.mapping.page_number,
                    source,
                })?;
            write_verified(&image)?;
            log::debug!("saved page {} to {}", image.page_number, image.save_path.display());
            saved.insert(image.save_path);
        }

        let spreads_created = if self.options.spreads {
            merge_spreads(&spreads, &gallery_dir)?.created.len()
        } else {
            0
        };

        if saved.len() != pages.len() {
            log::warn!(
                "{}: saved {} of {} listed pages, not marking done",
                id,
                saved.len(),
                pages.len()
            );
            return Ok(GalleryOutcome::Incomplete {
                slug: gallery.slug,
                saved: saved.len(),
                listed: pages.len(),
            });
        }

        self.state.mark_done(id).map_err(PipelineError::State)?;
        log::info!("finished {}", id);
        Ok(GalleryOutcome::Completed {
            slug: gallery.slug,
            pages: saved.len(),
            spreads_created,
        })
    }

    fn reconstruct_page(
        &self,
        scrambled: &[u8],
        mapping: &TileMapping,
        output_dir: &Path,
    ) -> Result<ReconstructedImage, ReconstructError> {
        match self.options.backend {
            Backend::Raster => RasterBackend.reconstruct(scrambled, mapping, output_dir),
            Backend::Lossless => reconstruct_with(&self.lossless, scrambled, mapping, output_dir),
        }
    }
}

fn write_mappings(path: &Path, gallery: &str, pages: &[TileMapping]) -> Result<(), PipelineError> {
    let document = MappingsDocument {
        gallery,
        generated_at: Utc::now(),
        pages,
    };
    let json = serde_json::to_vec_pretty(&document)?;
    fs::write(path, json)?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_verified(image: &ReconstructedImage) -> Result<(), PipelineError> {
    fs::write(&image.save_path, &image.content)?;
    let expected = sha256_hex(&image.content);
    let actual = sha256_hex(&fs::read(&image.save_path)?);
    if expected != actual {
        return Err(PipelineError::Verification {
            path: image.save_path.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}
