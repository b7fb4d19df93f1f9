//! Authoritative CPE dictionary: bulk loading from NVD snapshots and lookups.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MissingResource;
use crate::cpe::{Identifier, ParseError, ProductKey};
use crate::db::{CheckDb, DbError, DbResult, DictionaryEntry, Stage, StageStatus};

/// Entries imported per sub-transaction.
pub const COMMIT_EVERY: usize = 10_000;

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error(transparent)]
    Missing(#[from] MissingResource),

    #[error("Failed to read snapshot {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {} is not a CPE 2.0 feed: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Summary of a completed load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    /// Application entries written to the store.
    pub imported: usize,
    /// Entries for other parts (operating systems, hardware).
    pub ignored: usize,
    /// Entries dropped because they could not be read.
    pub malformed: usize,
    /// SHA-256 over the snapshot files, in load order.
    pub digest: String,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    products: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ProductItem {
    cpe: CpeItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpeItem {
    cpe_name: String,
    #[serde(default)]
    deprecated: bool,
    #[serde(default)]
    deprecated_by: Vec<CpeRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CpeRef {
    cpe_name: String,
}

enum Outcome {
    Imported,
    Ignored,
    Malformed,
}

/// Dictionary view over the `products` table.
pub struct Dictionary<'a> {
    db: &'a CheckDb,
}

impl<'a> Dictionary<'a> {
    pub fn new(db: &'a CheckDb) -> Self {
        Self { db }
    }

    /// Resolve `source` to the snapshot files it names: the file itself, or every
    /// `*.json` file in the directory sorted by name.
    pub fn snapshot_files(source: &Path) -> Result<Vec<PathBuf>, DictionaryError> {
        if source.is_file() {
            return Ok(vec![source.to_path_buf()]);
        }
        if !source.is_dir() {
            return Err(MissingResource { what: "CPE dictionary", path: source.to_path_buf() }
                .into());
        }

        let entries = fs::read_dir(source)
            .map_err(|e| DictionaryError::Io { path: source.to_path_buf(), source: e })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| DictionaryError::Io { path: source.to_path_buf(), source: e })?;
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(MissingResource {
                what: "CPE dictionary snapshot (*.json)",
                path: source.to_path_buf(),
            }
            .into());
        }
        Ok(files)
    }

    /// Clear and rebuild the dictionary from `source`.
    ///
    /// The rebuild is committed in chunks of [`COMMIT_EVERY`] entries. Until the stage
    /// run is marked succeeded the dictionary counts as not loaded, so an interrupted load
    /// has to be redone.
    pub fn load(&self, source: &Path) -> Result<LoadReport, DictionaryError> {
        let files = Self::snapshot_files(source)?;

        let run_id = self.db.begin_stage(Stage::Dictionary)?;
        match self.load_files(&files) {
            Ok(report) => {
                self.db.finish_stage(
                    run_id,
                    StageStatus::Succeeded,
                    report.imported as i64,
                    Some(&report.digest),
                )?;
                info!(
                    files = report.files,
                    imported = report.imported,
                    ignored = report.ignored,
                    malformed = report.malformed,
                    "CPE dictionary loaded"
                );
                Ok(report)
            }
            Err(err) => {
                let _ = self.db.finish_stage(run_id, StageStatus::Failed, 0, Some(&err.to_string()));
                Err(err)
            }
        }
    }

    fn load_files(&self, files: &[PathBuf]) -> Result<LoadReport, DictionaryError> {
        let mut report = LoadReport { files: files.len(), ..LoadReport::default() };
        let mut hasher = Sha256::new();

        let mut tx = self.db.transaction()?;
        self.db.clear_dictionary()?;

        for path in files {
            info!(path = %path.display(), "Reading CPE snapshot");
            let body = fs::read(path)
                .map_err(|e| DictionaryError::Io { path: path.clone(), source: e })?;
            hasher.update(&body);
            let snapshot: Snapshot = serde_json::from_slice(&body)
                .map_err(|e| DictionaryError::Json { path: path.clone(), source: e })?;
            drop(body);

            for item in snapshot.products {
                match self.import(item)? {
                    Outcome::Imported => {
                        report.imported += 1;
                        if report.imported % COMMIT_EVERY == 0 {
                            tx.commit().map_err(DbError::from)?;
                            tx = self.db.transaction()?;
                            info!(imported = report.imported, "Added CPE entries");
                        }
                    }
                    Outcome::Ignored => report.ignored += 1,
                    Outcome::Malformed => report.malformed += 1,
                }
            }
        }

        tx.commit().map_err(DbError::from)?;
        report.digest = format!("{:x}", hasher.finalize());
        Ok(report)
    }

    fn import(&self, item: serde_json::Value) -> DbResult<Outcome> {
        let item: ProductItem = match serde_json::from_value(item) {
            Ok(item) => item,
            Err(err) => {
                warn!(error = %err, "Skipping unreadable dictionary entry");
                return Ok(Outcome::Malformed);
            }
        };
        let cpe = item.cpe;

        let mut identifier = match Identifier::parse(&cpe.cpe_name) {
            Ok(identifier) => identifier,
            Err(ParseError::NotApplication(_)) => return Ok(Outcome::Ignored),
            Err(err) => {
                warn!(cpe = %cpe.cpe_name, error = %err, "Could not process CPE entry");
                return Ok(Outcome::Malformed);
            }
        };

        if cpe.deprecated {
            match cpe.deprecated_by.first().map(|r| Identifier::parse(&r.cpe_name)) {
                Some(Ok(successor)) => {
                    if let Err(err) = identifier.set_successor(&successor) {
                        debug!(cpe = %cpe.cpe_name, "{err}; keeping entry live");
                    }
                }
                Some(Err(err)) => {
                    warn!(cpe = %cpe.cpe_name, error = %err, "Ignoring unreadable successor");
                }
                None => debug!(cpe = %cpe.cpe_name, "Deprecated entry names no successor"),
            }
        }

        self.db.upsert_product(identifier.key(), identifier.successor())?;
        Ok(Outcome::Imported)
    }

    /// Whether the last load completed.
    pub fn is_ready(&self) -> DbResult<bool> {
        self.db.stage_succeeded(Stage::Dictionary)
    }

    /// Exact, case-insensitive lookup. Deprecated entries carry their successor.
    pub fn find_exact(&self, vendor: &str, product: &str) -> DbResult<Option<Identifier>> {
        Ok(self.db.find_product(vendor, product)?.map(|entry| entry.to_identifier()))
    }

    pub fn lookup(&self, key: &ProductKey) -> DbResult<Option<DictionaryEntry>> {
        self.db.find_product(key.vendor(), key.product())
    }

    /// Live entries whose product name contains `name`, one per identity, ordered by
    /// vendor then product.
    pub fn find_candidates_by_product_name(&self, name: &str) -> DbResult<Vec<Identifier>> {
        if name.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .db
            .search_products(name)?
            .iter()
            .map(DictionaryEntry::to_identifier)
            .collect())
    }
}
