use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required file or directory is absent. Raised before any stage mutates state.
#[derive(Debug, Error)]
#[error("{what} not found at {}", path.display())]
pub struct MissingResource {
    pub what: &'static str,
    pub path: PathBuf,
}

/// Runtime configuration, built once at startup and passed to every component.
///
/// Every field can be overridden through an environment variable; the paths that live
/// in the data directory default relative to `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the ports tree (`PORTSDIR`).
    pub ports_dir: PathBuf,
    /// Directory holding the database, overlay and dictionary snapshots (`DATADIR`).
    pub data_dir: PathBuf,
    /// Directory for log files (`LOGSDIR`).
    pub logs_dir: PathBuf,
    /// `make` binary used by the default extractor (`MAKE`).
    pub make_bin: PathBuf,
    /// SQLite database path (`CHKCPEDB`).
    pub database: PathBuf,
    /// Dictionary snapshot file or directory of `*.json` chunks (`CPEDICTIONARY`).
    pub dictionary: PathBuf,
    /// Overlay JSON file (`OVERLAYFILE`).
    pub overlay: PathBuf,
    /// Worker count for extraction (`CHKCPE_JOBS`).
    pub jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_data_dir("data")
    }
}

impl Config {
    /// Defaults with every data path placed under `data_dir`.
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            ports_dir: PathBuf::from("/usr/ports"),
            logs_dir: PathBuf::from("logs"),
            make_bin: PathBuf::from("make"),
            database: data_dir.join("chkcpe.db"),
            dictionary: data_dir.join("nvdcpe-2.0-chunks"),
            overlay: data_dir.join("overlay.json"),
            jobs: default_jobs(),
            data_dir,
        }
    }

    /// Build from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("DATADIR") {
            Some(dir) => Self::for_data_dir(dir),
            None => Self::default(),
        };
        if let Some(v) = lookup("PORTSDIR") {
            config.ports_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOGSDIR") {
            config.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MAKE") {
            config.make_bin = PathBuf::from(v);
        }
        if let Some(v) = lookup("CHKCPEDB") {
            config.database = PathBuf::from(v);
        }
        if let Some(v) = lookup("CPEDICTIONARY") {
            config.dictionary = PathBuf::from(v);
        }
        if let Some(v) = lookup("OVERLAYFILE") {
            config.overlay = PathBuf::from(v);
        }
        if let Some(jobs) = lookup("CHKCPE_JOBS").and_then(|v| v.parse::<usize>().ok()) {
            config.jobs = jobs.max(1);
        }
        config
    }

    pub fn require_ports_dir(&self) -> Result<&Path, MissingResource> {
        require(&self.ports_dir, "ports tree", Path::is_dir)
    }

    pub fn require_dictionary(&self) -> Result<&Path, MissingResource> {
        require(&self.dictionary, "CPE dictionary", Path::exists)
    }

    pub fn require_overlay(&self) -> Result<&Path, MissingResource> {
        require(&self.overlay, "overlay file", Path::is_file)
    }
}

fn require<'a>(
    path: &'a Path,
    what: &'static str,
    check: fn(&Path) -> bool,
) -> Result<&'a Path, MissingResource> {
    if check(path) {
        Ok(path)
    } else {
        Err(MissingResource { what, path: path.to_path_buf() })
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
