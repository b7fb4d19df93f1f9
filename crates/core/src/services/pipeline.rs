//! The four-stage reconciliation run: dictionary load, discovery, extraction and
//! reconciliation.
//!
//! Each stage leaves a `stage_runs` record. A stage only trusts the output of an earlier
//! one when that stage's most recent run succeeded, so a crash mid-way shows up as a
//! stage that has to be re-run instead of as silently partial data.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, MissingResource};
use crate::db::{CheckDb, DbError, Origin, PortStatus, Stage, StageStatus};
use crate::dictionary::{Dictionary, DictionaryError, LoadReport};
use crate::overlay::{Overlay, OverlayError};
use crate::services::extract::{extract_parallel, Extractor};
use crate::services::reconcile::classify;

/// Top-level directories of a ports tree that hold framework files rather than ports.
pub const EXCLUDED_DIRS: &[&str] = &["Mk", "Templates", "Tools", "distfiles", "packages", "CVS"];

/// Ports inserted per discovery sub-transaction.
pub const DISCOVERY_COMMIT_EVERY: usize = 10_000;

const PROGRESS_EVERY: usize = 1_000;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Missing(#[from] MissingResource),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to read ports tree at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("The {required} stage has not completed; run it before {stage}")]
    StageIncomplete { required: Stage, stage: Stage },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub attempted: usize,
    pub scanned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub classified: usize,
    pub counts: Vec<(PortStatus, usize)>,
}

impl ReconcileReport {
    fn record(&mut self, status: PortStatus) {
        self.classified += 1;
        match self.counts.iter_mut().find(|(s, _)| *s == status) {
            Some((_, n)) => *n += 1,
            None => {
                self.counts.push((status, 1));
                self.counts.sort();
            }
        }
    }

    pub fn count(&self, status: PortStatus) -> usize {
        self.counts.iter().find(|(s, _)| *s == status).map(|(_, n)| *n).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub dictionary: Option<LoadReportSummary>,
    pub discovered: usize,
    pub scans: Vec<ScanReport>,
    pub reconcile: ReconcileReport,
}

/// Serializable projection of [`LoadReport`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReportSummary {
    pub files: usize,
    pub imported: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub digest: String,
}

impl From<LoadReport> for LoadReportSummary {
    fn from(r: LoadReport) -> Self {
        Self {
            files: r.files,
            imported: r.imported,
            ignored: r.ignored,
            malformed: r.malformed,
            digest: r.digest,
        }
    }
}

/// Enumerate `category/portdir` origins two levels below `root`, sorted.
///
/// Hidden entries and [`EXCLUDED_DIRS`] are skipped at the top level; hidden entries are
/// skipped inside categories too.
pub fn discover_origins(root: &Path) -> PipelineResult<Vec<Origin>> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PipelineError::Io { path, source }
    };

    let mut origins = Vec::new();
    for category in fs::read_dir(root).map_err(io_err(root))? {
        let category = category.map_err(io_err(root))?;
        let Some(cat_name) = category.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if cat_name.starts_with('.') || EXCLUDED_DIRS.contains(&cat_name.as_str()) {
            continue;
        }
        let cat_path = category.path();
        if !cat_path.is_dir() {
            continue;
        }

        for port in fs::read_dir(&cat_path).map_err(io_err(&cat_path))? {
            let port = port.map_err(io_err(&cat_path))?;
            let Some(port_name) = port.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if port_name.starts_with('.') || !port.path().is_dir() {
                continue;
            }
            origins.push(Origin::new(cat_name.clone(), port_name));
        }
    }
    origins.sort();
    Ok(origins)
}

/// Runs the stages against one store with one extractor.
pub struct Pipeline<'a> {
    config: &'a Config,
    db: &'a CheckDb,
    extractor: &'a dyn Extractor,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, db: &'a CheckDb, extractor: &'a dyn Extractor) -> Self {
        Self { config, db, extractor }
    }

    /// Check every external resource a full run needs.
    pub fn check_resources(&self) -> PipelineResult<()> {
        self.config.require_dictionary()?;
        self.config.require_ports_dir()?;
        self.config.require_overlay()?;
        Ok(())
    }

    pub fn load_dictionary(&self) -> PipelineResult<LoadReport> {
        let source = self.config.require_dictionary()?;
        Ok(Dictionary::new(self.db).load(source)?)
    }

    /// Replace the port set with the origins found in the ports tree, all `New`.
    pub fn discover(&self) -> PipelineResult<usize> {
        let root = self.config.require_ports_dir()?;
        let origins = discover_origins(root)?;

        let run_id = self.db.begin_stage(Stage::Discovery)?;
        match self.store_origins(&origins) {
            Ok(()) => {
                self.db.finish_stage(run_id, StageStatus::Succeeded, origins.len() as i64, None)?;
                info!(ports = origins.len(), root = %root.display(), "Discovered ports");
                Ok(origins.len())
            }
            Err(err) => {
                let _ = self.db.finish_stage(run_id, StageStatus::Failed, 0, Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    fn store_origins(&self, origins: &[Origin]) -> Result<(), DbError> {
        let mut tx = self.db.transaction()?;
        self.db.clear_ports()?;
        for (idx, origin) in origins.iter().enumerate() {
            self.db.insert_new_port(origin)?;
            if (idx + 1) % DISCOVERY_COMMIT_EVERY == 0 {
                tx.commit()?;
                tx = self.db.transaction()?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Extract metadata for every port still `New`.
    ///
    /// Origins whose extraction fails stay `New` and are picked up by the next scan.
    pub fn scan(&self) -> PipelineResult<ScanReport> {
        self.require_stage(Stage::Discovery, Stage::Extraction)?;
        let origins = self.db.list_origins(Some(PortStatus::New), None)?;
        let mut report = ScanReport { attempted: origins.len(), ..ScanReport::default() };
        info!(ports = origins.len(), jobs = self.config.jobs, extractor = self.extractor.name(), "Scanning ports");

        let run_id = self.db.begin_stage(Stage::Extraction)?;
        let outcome = extract_parallel(self.extractor, &origins, self.config.jobs, |origin, result| {
            match result {
                Ok(metadata) => {
                    self.db.record_scan(origin, &metadata)?;
                    report.scanned += 1;
                    if report.scanned % PROGRESS_EVERY == 0 {
                        info!(scanned = report.scanned, total = report.attempted, "Scan progress");
                    }
                }
                Err(err) => {
                    warn!(origin, error = %err, "Failed to extract port metadata");
                    report.failed += 1;
                }
            }
            Ok::<(), DbError>(())
        });

        match outcome {
            Ok(_) => {
                let detail = format!("{} failed", report.failed);
                self.db.finish_stage(run_id, StageStatus::Succeeded, report.scanned as i64, Some(&detail))?;
                info!(scanned = report.scanned, failed = report.failed, "Scan finished");
                Ok(report)
            }
            Err(err) => {
                let _ = self.db.finish_stage(run_id, StageStatus::Failed, report.scanned as i64, Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Classify every port that has been scanned, using the overlay file from the config.
    pub fn reconcile(&self) -> PipelineResult<ReconcileReport> {
        let overlay = Overlay::load(self.config.require_overlay()?)?;
        self.reconcile_with(&overlay)
    }

    /// Classify every port that has been scanned.
    ///
    /// Ports that already carry a terminal status are classified again from their stored
    /// metadata, so curation decisions recorded since the last run take effect.
    pub fn reconcile_with(&self, overlay: &Overlay) -> PipelineResult<ReconcileReport> {
        let dictionary = Dictionary::new(self.db);
        if !dictionary.is_ready()? {
            return Err(PipelineError::StageIncomplete {
                required: Stage::Dictionary,
                stage: Stage::Reconciliation,
            });
        }
        self.require_stage(Stage::Discovery, Stage::Reconciliation)?;

        let run_id = self.db.begin_stage(Stage::Reconciliation)?;
        let mut report = ReconcileReport::default();
        let result = (|| -> Result<(), DbError> {
            for mut port in self.db.list_ports(None, None)? {
                if port.status == PortStatus::New {
                    continue;
                }
                classify(&port, &dictionary, overlay)?.apply(&mut port);
                self.db.save_classification(&port)?;
                report.record(port.status);
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.db.finish_stage(run_id, StageStatus::Succeeded, report.classified as i64, None)?;
                info!(classified = report.classified, "Reconciliation finished");
                Ok(report)
            }
            Err(err) => {
                let _ = self.db.finish_stage(run_id, StageStatus::Failed, report.classified as i64, Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Load the dictionary, discover, scan twice, then reconcile.
    ///
    /// All resources are checked before the first stage touches the store.
    pub fn run(&self) -> PipelineResult<RunReport> {
        self.check_resources()?;
        let overlay = Overlay::load(&self.config.overlay)?;

        let mut report = RunReport::default();
        report.dictionary = Some(self.load_dictionary()?.into());
        report.discovered = self.discover()?;
        for pass in 1..=2 {
            let scan = self.scan()?;
            info!(pass, scanned = scan.scanned, failed = scan.failed, "Extraction pass complete");
            report.scans.push(scan);
        }
        report.reconcile = self.reconcile_with(&overlay)?;
        Ok(report)
    }

    fn require_stage(&self, required: Stage, stage: Stage) -> PipelineResult<()> {
        if self.db.stage_succeeded(required)? {
            Ok(())
        } else {
            Err(PipelineError::StageIncomplete { required, stage })
        }
    }
}
