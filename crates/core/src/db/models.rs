use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cpe::{Identifier, ProductKey};

/// Classification state of a port.
///
/// `New` and `Scanned` only exist while a pipeline run is in progress; the other six are
/// terminal for a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    New,
    Scanned,
    Valid,
    Invalid,
    Deprecated,
    CheckNeeded,
    ReadyToCommit,
    Unknown,
}

impl PortStatus {
    /// Terminal statuses, in report order.
    pub const TERMINAL: [PortStatus; 6] = [
        PortStatus::Valid,
        PortStatus::Invalid,
        PortStatus::Deprecated,
        PortStatus::CheckNeeded,
        PortStatus::ReadyToCommit,
        PortStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PortStatus::New => "new",
            PortStatus::Scanned => "scanned",
            PortStatus::Valid => "valid",
            PortStatus::Invalid => "invalid",
            PortStatus::Deprecated => "deprecated",
            PortStatus::CheckNeeded => "checkneeded",
            PortStatus::ReadyToCommit => "readytocommit",
            PortStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PortStatus::New | PortStatus::Scanned)
    }
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_lowercase().as_str() {
            "new" => PortStatus::New,
            "scanned" => PortStatus::Scanned,
            "valid" => PortStatus::Valid,
            "invalid" => PortStatus::Invalid,
            "deprecated" => PortStatus::Deprecated,
            "checkneeded" => PortStatus::CheckNeeded,
            "readytocommit" => PortStatus::ReadyToCommit,
            "unknown" => PortStatus::Unknown,
            other => return Err(format!("unknown port status '{other}'")),
        };
        Ok(status)
    }
}

/// How a port's identifier was resolved during reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    /// Declared identifier found in the dictionary.
    Dictionary,
    /// Overlay `custommatch` stood in for an unknown declared identifier.
    Custom,
    /// Overlay `confirmedmatch` supplied the identifier.
    Confirmed,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Dictionary => "dictionary",
            MatchSource::Custom => "custom",
            MatchSource::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dictionary" => Some(MatchSource::Dictionary),
            "custom" => Some(MatchSource::Custom),
            "confirmed" => Some(MatchSource::Confirmed),
            _ => None,
        }
    }
}

/// Metadata returned by the extractor for one origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMetadata {
    pub portname: String,
    pub version: String,
    pub maintainer: String,
    /// Raw `CPE_STR`; empty when the port declares none.
    pub declared: String,
}

/// One row of the classification store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub origin: String,
    pub category: String,
    pub portdir: String,
    pub portname: String,
    pub version: String,
    pub maintainer: String,
    pub declared: String,
    /// Bound text of the identifier the port resolved to.
    pub resolved: Option<String>,
    /// Successor of a deprecated resolution, kept for reporting.
    pub successor: Option<ProductKey>,
    pub match_source: Option<MatchSource>,
    pub status: PortStatus,
    pub candidates: Vec<ProductKey>,
}

/// `category/portdir` key of a port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Origin {
    pub category: String,
    pub portdir: String,
}

impl Origin {
    pub fn new(category: impl Into<String>, portdir: impl Into<String>) -> Self {
        Self { category: category.into(), portdir: portdir.into() }
    }

    /// Split `category/portdir`; `None` unless both halves are non-empty.
    pub fn parse(origin: &str) -> Option<Self> {
        let (category, portdir) = origin.split_once('/')?;
        if category.is_empty() || portdir.is_empty() || portdir.contains('/') {
            return None;
        }
        Some(Self::new(category, portdir))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.portdir)
    }
}

/// One `(vendor, product)` of the dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: ProductKey,
    pub successor: Option<ProductKey>,
}

impl DictionaryEntry {
    pub fn is_deprecated(&self) -> bool {
        self.successor.is_some()
    }

    pub fn to_identifier(&self) -> Identifier {
        let mut identifier = Identifier::from_key(self.key.clone());
        if let Some(successor) = &self.successor {
            // Stored entries never reference themselves; a failure here leaves it live.
            let _ = identifier.set_successor_key(successor.clone());
        }
        identifier
    }
}

/// Pipeline stages that leave a bookkeeping record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Dictionary,
    Discovery,
    Extraction,
    Reconciliation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dictionary => "dictionary",
            Stage::Discovery => "discovery",
            Stage::Extraction => "extraction",
            Stage::Reconciliation => "reconciliation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "dictionary" => Some(Stage::Dictionary),
            "discovery" => Some(Stage::Discovery),
            "extraction" => Some(Stage::Extraction),
            "reconciliation" => Some(Stage::Reconciliation),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allowed status values for stage runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(StageStatus::Running),
            "succeeded" => Some(StageStatus::Succeeded),
            "failed" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

/// Bookkeeping record for one stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRunRecord {
    pub id: i64,
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub items: i64,
    pub detail: Option<String>,
}
