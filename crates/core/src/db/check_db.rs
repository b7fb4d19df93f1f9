use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use thiserror::Error;

use crate::cpe::ProductKey;
use crate::db::{
    DictionaryEntry, MatchSource, Origin, PortMetadata, PortRecord, PortStatus, Stage,
    StageRunRecord, StageStatus,
};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

/// Convenience result type for DB operations.
pub type DbResult<T> = Result<T, DbError>;

const PORT_COLUMNS: &str = "origin, category, portdir, portname, version, maintainer, cpe_str, \
     resolved, successor_vendor, successor_product, match_source, status";

/// SQLite-backed dictionary and classification store.
///
/// This is a thin wrapper around `rusqlite::Connection` that is responsible for:
/// - Opening/creating the DB file.
/// - Applying schema migrations.
/// - Small, testable helpers for the dictionary, port and stage tables.
#[derive(Debug)]
pub struct CheckDb {
    conn: Connection,
}

impl CheckDb {
    /// Open (or create) the database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    /// For most code, prefer higher-level helpers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a transaction; helpers called while it is open run inside it.
    pub fn transaction(&self) -> DbResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // ---- dictionary -------------------------------------------------------------------

    pub fn clear_dictionary(&self) -> DbResult<()> {
        self.conn.execute("DELETE FROM products", [])?;
        Ok(())
    }

    /// Insert one dictionary entry, merging with an existing row for the same identity.
    ///
    /// A row stays deprecated only while every entry merged into it is deprecated; the
    /// first successor seen wins.
    pub fn upsert_product(
        &self,
        key: &ProductKey,
        successor: Option<&ProductKey>,
    ) -> DbResult<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO products (vendor, product, successor_vendor, successor_product)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(vendor, product) DO UPDATE SET
                successor_vendor = CASE
                    WHEN products.successor_vendor IS NULL OR excluded.successor_vendor IS NULL
                    THEN NULL ELSE products.successor_vendor END,
                successor_product = CASE
                    WHEN products.successor_vendor IS NULL OR excluded.successor_vendor IS NULL
                    THEN NULL ELSE products.successor_product END
            "#,
        )?;
        stmt.execute(params![
            key.vendor(),
            key.product(),
            successor.map(|s| s.vendor()),
            successor.map(|s| s.product()),
        ])?;
        Ok(())
    }

    /// Exact, case-insensitive lookup.
    pub fn find_product(&self, vendor: &str, product: &str) -> DbResult<Option<DictionaryEntry>> {
        let entry = self
            .conn
            .query_row(
                r#"
                SELECT vendor, product, successor_vendor, successor_product
                FROM products
                WHERE vendor = ?1 AND product = ?2
                "#,
                params![vendor, product],
                map_product,
            )
            .optional()?;
        Ok(entry)
    }

    /// Live (non-deprecated) entries whose product contains `name`, ordered by vendor
    /// then product.
    pub fn search_products(&self, name: &str) -> DbResult<Vec<DictionaryEntry>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT vendor, product, successor_vendor, successor_product
            FROM products
            WHERE instr(lower(product), lower(?1)) > 0
              AND successor_vendor IS NULL
            ORDER BY vendor, product
            "#,
        )?;
        let rows = stmt.query_map(params![name], map_product)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn product_count(&self) -> DbResult<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?)
    }

    // ---- ports ------------------------------------------------------------------------

    /// Drop every port and its candidates.
    pub fn clear_ports(&self) -> DbResult<()> {
        self.conn.execute("DELETE FROM candidates", [])?;
        self.conn.execute("DELETE FROM ports", [])?;
        Ok(())
    }

    pub fn insert_new_port(&self, origin: &Origin) -> DbResult<()> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO ports (origin, category, portdir, status)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )?;
        stmt.execute(params![
            origin.to_string(),
            origin.category,
            origin.portdir,
            PortStatus::New.as_str()
        ])?;
        Ok(())
    }

    /// Origins, optionally filtered by status and/or category, in sorted order.
    pub fn list_origins(
        &self,
        status: Option<PortStatus>,
        category: Option<&str>,
    ) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT origin FROM ports
            WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR category = ?2)
            ORDER BY origin
            "#,
        )?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str()), category], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Store extraction output and move the port to `Scanned`.
    ///
    /// Returns the number of rows affected (0 when the origin is unknown).
    pub fn record_scan(&self, origin: &str, metadata: &PortMetadata) -> DbResult<usize> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            UPDATE ports
            SET portname = ?1, version = ?2, maintainer = ?3, cpe_str = ?4, status = ?5
            WHERE origin = ?6
            "#,
        )?;
        let affected = stmt.execute(params![
            metadata.portname,
            metadata.version,
            metadata.maintainer,
            metadata.declared,
            PortStatus::Scanned.as_str(),
            origin
        ])?;
        Ok(affected)
    }

    pub fn load_port(&self, origin: &str) -> DbResult<Option<PortRecord>> {
        let sql = format!("SELECT {PORT_COLUMNS} FROM ports WHERE origin = ?1");
        let port = self.conn.query_row(&sql, params![origin], map_port).optional()?;
        let Some(mut port) = port else {
            return Ok(None);
        };
        port.candidates = self.load_candidates(origin)?;
        Ok(Some(port))
    }

    /// Full records, optionally filtered, in origin order.
    pub fn list_ports(
        &self,
        status: Option<PortStatus>,
        category: Option<&str>,
    ) -> DbResult<Vec<PortRecord>> {
        let sql = format!(
            "SELECT {PORT_COLUMNS} FROM ports \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR category = ?2) \
             ORDER BY origin"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str()), category], map_port)?;
        let mut ports = Vec::new();
        for row in rows {
            ports.push(row?);
        }

        let mut candidates: HashMap<String, Vec<ProductKey>> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT origin, candidate FROM candidates
                ORDER BY origin, position
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, parse_key(row, 1)?))
            })?;
            for row in rows {
                let (origin, key) = row?;
                candidates.entry(origin).or_default().push(key);
            }
        }

        for port in &mut ports {
            if let Some(list) = candidates.remove(&port.origin) {
                port.candidates = list;
            }
        }
        Ok(ports)
    }

    fn load_candidates(&self, origin: &str) -> DbResult<Vec<ProductKey>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT candidate FROM candidates
            WHERE origin = ?1
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map(params![origin], |row| parse_key(row, 0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Persist status, resolution and the candidate set of one port atomically,
    /// replacing any previous candidates.
    pub fn save_classification(&self, port: &PortRecord) -> DbResult<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            UPDATE ports
            SET status = ?1, resolved = ?2, successor_vendor = ?3, successor_product = ?4,
                match_source = ?5
            WHERE origin = ?6
            "#,
            params![
                port.status.as_str(),
                port.resolved,
                port.successor.as_ref().map(|s| s.vendor()),
                port.successor.as_ref().map(|s| s.product()),
                port.match_source.map(|m| m.as_str()),
                port.origin
            ],
        )?;

        tx.execute("DELETE FROM candidates WHERE origin = ?1", params![port.origin])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO candidates (origin, position, candidate)
                VALUES (?1, ?2, ?3)
                "#,
            )?;
            for (idx, candidate) in port.candidates.iter().enumerate() {
                stmt.execute(params![port.origin, idx as i64, candidate.to_string()])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Number of ports per status; statuses with no ports are omitted.
    pub fn status_counts(&self) -> DbResult<Vec<(PortStatus, i64)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT status, COUNT(*) FROM ports
            GROUP BY status
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((parse_status(row, 0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.sort();
        Ok(out)
    }

    // ---- stage bookkeeping ------------------------------------------------------------

    /// Record the start of a stage and return the run id.
    pub fn begin_stage(&self, stage: Stage) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO stage_runs (stage, status, started_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![stage.as_str(), StageStatus::Running.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close a stage run.
    pub fn finish_stage(
        &self,
        id: i64,
        status: StageStatus,
        items: i64,
        detail: Option<&str>,
    ) -> DbResult<()> {
        self.conn.execute(
            r#"
            UPDATE stage_runs
            SET status = ?1, finished_at = ?2, items = ?3, detail = ?4
            WHERE id = ?5
            "#,
            params![status.as_str(), Utc::now().to_rfc3339(), items, detail, id],
        )?;
        Ok(())
    }

    pub fn latest_stage_run(&self, stage: Stage) -> DbResult<Option<StageRunRecord>> {
        let run = self
            .conn
            .query_row(
                r#"
                SELECT id, stage, status, started_at, finished_at, items, detail
                FROM stage_runs
                WHERE stage = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![stage.as_str()],
                map_stage_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Whether the most recent run of `stage` completed.
    pub fn stage_succeeded(&self, stage: Stage) -> DbResult<bool> {
        Ok(self
            .latest_stage_run(stage)?
            .is_some_and(|run| run.status == StageStatus::Succeeded))
    }

    pub fn list_stage_runs(&self) -> DbResult<Vec<StageRunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, stage, status, started_at, finished_at, items, detail
            FROM stage_runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], map_stage_run)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn map_product(row: &Row<'_>) -> rusqlite::Result<DictionaryEntry> {
    let key = ProductKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
    let successor = match (row.get::<_, Option<String>>(2)?, row.get::<_, Option<String>>(3)?) {
        (Some(vendor), Some(product)) => Some(ProductKey::new(vendor, product)),
        _ => None,
    };
    Ok(DictionaryEntry { key, successor })
}

fn map_port(row: &Row<'_>) -> rusqlite::Result<PortRecord> {
    let successor = match (row.get::<_, Option<String>>(8)?, row.get::<_, Option<String>>(9)?) {
        (Some(vendor), Some(product)) => Some(ProductKey::new(vendor, product)),
        _ => None,
    };
    Ok(PortRecord {
        origin: row.get(0)?,
        category: row.get(1)?,
        portdir: row.get(2)?,
        portname: row.get(3)?,
        version: row.get(4)?,
        maintainer: row.get(5)?,
        declared: row.get(6)?,
        resolved: row.get(7)?,
        successor,
        match_source: row.get::<_, Option<String>>(10)?.as_deref().and_then(MatchSource::parse),
        status: parse_status(row, 11)?,
        candidates: Vec::new(),
    })
}

fn map_stage_run(row: &Row<'_>) -> rusqlite::Result<StageRunRecord> {
    let stage: String = row.get(1)?;
    let status: String = row.get(2)?;
    Ok(StageRunRecord {
        id: row.get(0)?,
        stage: Stage::parse(&stage).ok_or_else(|| conversion_error(1, format!("stage '{stage}'")))?,
        status: StageStatus::parse(&status)
            .ok_or_else(|| conversion_error(2, format!("stage status '{status}'")))?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        items: row.get(5)?,
        detail: row.get(6)?,
    })
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<PortStatus> {
    let raw: String = row.get(idx)?;
    raw.parse::<PortStatus>().map_err(|e| conversion_error(idx, e))
}

fn parse_key(row: &Row<'_>, idx: usize) -> rusqlite::Result<ProductKey> {
    let raw: String = row.get(idx)?;
    raw.parse::<ProductKey>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: products, ports, candidates, stage_runs
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS products (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                vendor            TEXT NOT NULL COLLATE NOCASE,
                product           TEXT NOT NULL COLLATE NOCASE,
                successor_vendor  TEXT,
                successor_product TEXT,
                UNIQUE(vendor, product)
            );

            CREATE TABLE IF NOT EXISTS ports (
                origin            TEXT PRIMARY KEY,
                category          TEXT NOT NULL,
                portdir           TEXT NOT NULL,
                portname          TEXT NOT NULL DEFAULT '',
                version           TEXT NOT NULL DEFAULT '',
                maintainer        TEXT NOT NULL DEFAULT '',
                cpe_str           TEXT NOT NULL DEFAULT '',
                resolved          TEXT,
                successor_vendor  TEXT,
                successor_product TEXT,
                match_source      TEXT,
                status            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS ports_status ON ports(status);

            CREATE TABLE IF NOT EXISTS candidates (
                origin    TEXT NOT NULL REFERENCES ports(origin) ON DELETE CASCADE,
                position  INTEGER NOT NULL,
                candidate TEXT NOT NULL,
                PRIMARY KEY(origin, position)
            );

            CREATE TABLE IF NOT EXISTS stage_runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                stage       TEXT NOT NULL,
                status      TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT,
                items       INTEGER NOT NULL DEFAULT 0,
                detail      TEXT
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
