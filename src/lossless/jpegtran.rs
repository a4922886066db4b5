use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::mapping::TileRect;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Crop/splice primitives over JPEG files that never touch pixel data.
pub trait JpegTransform: Send + Sync {
    fn crop(&self, input: &Path, region: TileRect, output: &Path) -> Result<(), TransformError>;

    /// Writes `base` with `patch` dropped in at `(x, y)` to `output`.
    fn splice(
        &self,
        base: &Path,
        patch: &Path,
        x: u32,
        y: u32,
        output: &Path,
    ) -> Result<(), TransformError>;

    /// Final crop with an optimized, progressive container.
    fn finish(
        &self,
        input: &Path,
        width: u32,
        height: u32,
        output: &Path,
    ) -> Result<(), TransformError>;
}

/// The libjpeg `jpegtran` utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JpegTran {
    program: PathBuf,
}

impl Default for JpegTran {
    fn default() -> Self {
        Self::new("jpegtran")
    }
}

impl JpegTran {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: Vec<OsString>) -> Result<(), TransformError> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| TransformError::Unavailable {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TransformError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

fn arg(value: impl Into<OsString>) -> OsString {
    value.into()
}

impl JpegTran {
    pub fn crop_args(input: &Path, region: TileRect, output: &Path) -> Vec<OsString> {
        vec![
            arg("-copy"),
            arg("none"),
            arg("-crop"),
            arg(region.to_string()),
            arg("-outfile"),
            arg(output),
            arg(input),
        ]
    }

    pub fn splice_args(base: &Path, patch: &Path, x: u32, y: u32, output: &Path) -> Vec<OsString> {
        vec![
            arg("-copy"),
            arg("none"),
            arg("-drop"),
            arg(format!("+{}+{}", x, y)),
            arg(patch),
            arg("-outfile"),
            arg(output),
            arg(base),
        ]
    }

    pub fn finish_args(input: &Path, width: u32, height: u32, output: &Path) -> Vec<OsString> {
        vec![
            arg("-copy"),
            arg("none"),
            arg("-optimize"),
            arg("-progressive"),
            arg("-crop"),
            arg(format!("{}x{}+0+0", width, height)),
            arg("-outfile"),
            arg(output),
            arg(input),
        ]
    }
}

impl JpegTransform for JpegTran {
    fn crop(&self, input: &Path, region: TileRect, output: &Path) -> Result<(), TransformError> {
        self.run(Self::crop_args(input, region, output))
    }

    fn splice(
        &self,
        base: &Path,
        patch: &Path,
        x: u32,
        y: u32,
        output: &Path,
    ) -> Result<(), TransformError> {
        self.run(Self::splice_args(base, patch, x, y, output))
    }

    fn finish(
        &self,
        input: &Path,
        width: u32,
        height: u32,
        output: &Path,
    ) -> Result<(), TransformError> {
        self.run(Self::finish_args(input, width, height, output))
    }
}
