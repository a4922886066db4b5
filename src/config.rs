use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::job_state::FileStatePersistence;
use crate::lossless::{JpegTran, LosslessBackend};
use crate::reconstruct::Backend;

pub const DOWNLOAD_DIR_ENV: &str = "DOWNLOAD_DIR";
pub const JPEGTRAN_ENV: &str = "JPEGTRAN";
pub const JPEGTRAN_PATH_ENV: &str = "JPEGTRAN_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub download_dir: PathBuf,
    pub state_dir: PathBuf,
    pub backend: Backend,
    pub jpegtran_path: PathBuf,
    /// Build `<low>_<high>.png` spreads after the pages are saved.
    pub spreads: bool,
    /// Reprocess galleries already marked done.
    pub force: bool,
    pub done_file: String,
    pub inaccessible_file: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            state_dir: PathBuf::from("."),
            backend: Backend::Raster,
            jpegtran_path: PathBuf::from("jpegtran"),
            spreads: false,
            force: false,
            done_file: "done.txt".into(),
            inaccessible_file: "inaccessible.txt".into(),
        }
    }
}

impl EngineOptions {
    /// Applies `DOWNLOAD_DIR`, `JPEGTRAN` and `JPEGTRAN_PATH` from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    pub fn apply_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = non_empty(lookup(DOWNLOAD_DIR_ENV)) {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(flag) = non_empty(lookup(JPEGTRAN_ENV)) {
            self.backend = if flag.eq_ignore_ascii_case("true") || flag == "1" {
                Backend::Lossless
            } else {
                Backend::Raster
            };
        }
        if let Some(path) = non_empty(lookup(JPEGTRAN_PATH_ENV)) {
            self.jpegtran_path = PathBuf::from(path);
        }
        self
    }

    pub fn done_path(&self) -> PathBuf {
        self.state_dir.join(&self.done_file)
    }

    pub fn inaccessible_path(&self) -> PathBuf {
        self.state_dir.join(&self.inaccessible_file)
    }

    pub fn state_persistence(&self) -> FileStatePersistence {
        FileStatePersistence::new(self.done_path(), self.inaccessible_path())
    }

    pub fn lossless_backend(&self) -> LosslessBackend<JpegTran> {
        LosslessBackend::new(JpegTran::new(&self.jpegtran_path))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|trimmed| !trimmed.is_empty())
}

pub fn load_options(path: &Path) -> io::Result<EngineOptions> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

pub fn save_options(path: &Path, options: &EngineOptions) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(options)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(path, json)
}

pub fn default_options_path(root: &Path) -> PathBuf {
    root.join("page_reconstruct_options.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_fields_take_defaults() {
        let options: EngineOptions =
            serde_json::from_str(r#"{"backend":"lossless","spreads":true}"#).expect("parse");
        assert_eq!(options.backend, Backend::Lossless);
        assert!(options.spreads);
        assert_eq!(options.download_dir, PathBuf::from("./downloads"));
        assert_eq!(options.done_path(), PathBuf::from(".").join("done.txt"));
        assert_eq!(options.jpegtran_path, PathBuf::from("jpegtran"));
    }

    #[test]
    fn environment_overrides_apply() {
        let options = EngineOptions::default().apply_vars(vars(&[
            ("DOWNLOAD_DIR", "/data/galleries"),
            ("JPEGTRAN", "true"),
            ("JPEGTRAN_PATH", " /opt/libjpeg/bin/jpegtran "),
        ]));
        assert_eq!(options.download_dir, PathBuf::from("/data/galleries"));
        assert_eq!(options.backend, Backend::Lossless);
        assert_eq!(
            options.lossless_backend().tool().program(),
            Path::new("/opt/libjpeg/bin/jpegtran")
        );

        let options = options.apply_vars(vars(&[("JPEGTRAN", "false"), ("DOWNLOAD_DIR", "  ")]));
        assert_eq!(options.backend, Backend::Raster);
        assert_eq!(options.download_dir, PathBuf::from("/data/galleries"));
    }

    #[test]
    fn options_round_trip_through_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = default_options_path(&temp.path().join("config"));
        let options = EngineOptions {
            state_dir: temp.path().join("state"),
            force: true,
            ..EngineOptions::default()
        };

        save_options(&path, &options).expect("save");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"stateDir\""));
        assert!(raw.contains("\"inaccessibleFile\""));

        let loaded = load_options(&path).expect("load");
        assert_eq!(loaded, options);
    }

    #[test]
    fn malformed_file_is_invalid_data() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("options.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_options(&path).expect_err("malformed");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
