use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chkcpe_core::config::Config;
use clap::Args;

pub mod commands;

/// Global options that override individual configuration values.
///
/// Anything not given here comes from the environment (`PORTSDIR`, `DATADIR`, ...) and
/// then from the built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Root of the ports tree.
    #[arg(long, global = true)]
    pub ports_dir: Option<PathBuf>,

    /// Directory holding the database, overlay and dictionary snapshots.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory for the log file.
    #[arg(long, global = true)]
    pub logs_dir: Option<PathBuf>,

    /// `make` binary used to extract port metadata.
    #[arg(long = "make", global = true)]
    pub make_bin: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long = "db", global = true)]
    pub database: Option<PathBuf>,

    /// Dictionary snapshot file, or a directory of `*.json` chunks.
    #[arg(long, global = true)]
    pub dictionary: Option<PathBuf>,

    /// Overlay JSON file.
    #[arg(long, global = true)]
    pub overlay: Option<PathBuf>,

    /// Extraction worker count.
    #[arg(long, global = true)]
    pub jobs: Option<usize>,
}

/// Build the effective configuration from the process environment plus `overrides`.
pub fn resolve_config(overrides: &ConfigOverrides) -> Config {
    resolve_config_with(|name| std::env::var(name).ok(), overrides)
}

/// Same as [`resolve_config`], with an explicit variable lookup.
///
/// `--data-dir` takes the place of `DATADIR`, so data paths not set elsewhere follow it.
pub fn resolve_config_with<F>(lookup: F, overrides: &ConfigOverrides) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let data_dir = overrides.data_dir.as_ref().map(|p| p.to_string_lossy().to_string());
    let mut config = Config::from_lookup(|name| match (name, &data_dir) {
        ("DATADIR", Some(dir)) => Some(dir.clone()),
        _ => lookup(name),
    });

    if let Some(v) = &overrides.ports_dir {
        config.ports_dir = v.clone();
    }
    if let Some(v) = &overrides.logs_dir {
        config.logs_dir = v.clone();
    }
    if let Some(v) = &overrides.make_bin {
        config.make_bin = v.clone();
    }
    if let Some(v) = &overrides.database {
        config.database = v.clone();
    }
    if let Some(v) = &overrides.dictionary {
        config.dictionary = v.clone();
    }
    if let Some(v) = &overrides.overlay {
        config.overlay = v.clone();
    }
    if let Some(v) = overrides.jobs {
        config.jobs = v.max(1);
    }
    config
}

/// Default filter directive for the given verbosity.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "chkcpe=info,chkcpe_core=info,warn",
        1 => "chkcpe=debug,chkcpe_core=debug,info",
        _ => "trace",
    }
}

/// Install the global subscriber: stderr always, plus `<logs_dir>/chkcpe.log` when the
/// directory can be created. `RUST_LOG` overrides the verbosity-derived filter.
pub fn init_tracing(logs_dir: &Path, verbose: u8) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter(verbose)))
    };
    let stderr_layer =
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false);

    let log_path = logs_dir.join("chkcpe.log");
    let file = fs::create_dir_all(logs_dir)
        .ok()
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path).ok());

    match file {
        Some(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true);
            let _ = tracing_subscriber::registry()
                .with(filter())
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            tracing::debug!(path = %log_path.display(), "Logging to file");
        }
        None => {
            let _ = tracing_subscriber::registry().with(filter()).with(stderr_layer).try_init();
        }
    }
}
