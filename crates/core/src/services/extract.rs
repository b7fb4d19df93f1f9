use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

use thiserror::Error;

use crate::config::Config;
use crate::db::PortMetadata;

/// Number of values the extractor reports per origin.
pub const METADATA_FIELDS: usize = 4;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Port directory not found: {0}")]
    MissingPort(PathBuf),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Exit { program: String, status: std::process::ExitStatus, stderr: String },

    #[error("expected {expected} lines of metadata, got {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("extractor panicked: {0}")]
    Panicked(String),
}

/// Source of per-origin metadata. Implementations must be safe to call from several
/// worker threads at once.
pub trait Extractor: Send + Sync {
    fn extract(&self, origin: &str) -> Result<PortMetadata, ExtractError>;
    fn name(&self) -> &'static str;
}

/// Asks the ports framework for `PORTNAME`, `PORTVERSION`, `MAINTAINER` and `CPE_STR`.
#[derive(Debug, Clone)]
pub struct MakeExtractor {
    pub make_bin: PathBuf,
    pub ports_dir: PathBuf,
}

impl MakeExtractor {
    pub fn new(config: &Config) -> Self {
        Self { make_bin: config.make_bin.clone(), ports_dir: config.ports_dir.clone() }
    }
}

impl Extractor for MakeExtractor {
    fn extract(&self, origin: &str) -> Result<PortMetadata, ExtractError> {
        let portdir = self.ports_dir.join(origin);
        if !portdir.is_dir() {
            return Err(ExtractError::MissingPort(portdir));
        }

        let program = self.make_bin.display().to_string();
        let output = Command::new(&self.make_bin)
            .arg("-C")
            .arg(&portdir)
            .args(["-VPORTNAME", "-VPORTVERSION", "-VMAINTAINER", "-VCPE_STR"])
            .output()
            .map_err(|e| ExtractError::Spawn { program: program.clone(), source: e })?;
        if !output.status.success() {
            return Err(ExtractError::Exit {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_metadata(&String::from_utf8_lossy(&output.stdout))
    }

    fn name(&self) -> &'static str {
        "make"
    }
}

/// Split extractor output into exactly [`METADATA_FIELDS`] lines.
pub fn parse_metadata(output: &str) -> Result<PortMetadata, ExtractError> {
    let body = output.strip_suffix('\n').unwrap_or(output);
    let lines: Vec<&str> = body.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.len() != METADATA_FIELDS {
        return Err(ExtractError::FieldCount { expected: METADATA_FIELDS, found: lines.len() });
    }
    Ok(PortMetadata {
        portname: lines[0].to_string(),
        version: lines[1].to_string(),
        maintainer: lines[2].to_string(),
        declared: lines[3].trim().to_string(),
    })
}

/// Run `extractor` over `origins` with at most `jobs` worker threads.
///
/// Results are handed to `on_result` on the calling thread as they complete, in no
/// particular order. An extraction failure is just another result; an error returned by
/// `on_result` stops the remaining work and is returned.
pub fn extract_parallel<F, E>(
    extractor: &dyn Extractor,
    origins: &[String],
    jobs: usize,
    mut on_result: F,
) -> Result<usize, E>
where
    F: FnMut(&str, Result<PortMetadata, ExtractError>) -> Result<(), E>,
{
    let jobs = jobs.clamp(1, origins.len().max(1));
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<(usize, Result<PortMetadata, ExtractError>)>();

    std::thread::scope(|s| {
        for _ in 0..jobs {
            let tx = tx.clone();
            let next = &next;
            let stop = &stop;
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(origin) = origins.get(idx) else {
                        break;
                    };
                    let result = panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(origin)))
                        .unwrap_or_else(|payload| Err(ExtractError::Panicked(panic_message(&payload))));
                    if tx.send((idx, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut handled = 0;
        for (idx, result) in rx {
            if let Err(err) = on_result(&origins[idx], result) {
                stop.store(true, Ordering::Relaxed);
                return Err(err);
            }
            handled += 1;
        }
        Ok(handled)
    })
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
