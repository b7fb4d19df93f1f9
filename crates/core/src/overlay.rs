//! Durable, curator-owned overrides keyed by origin.
//!
//! The overlay is a single JSON object:
//!
//! ```json
//! {
//!   "x11/mystery": {
//!     "confirmedmatch": "vendorA:mystery",
//!     "nomatch": ["vendorB:mystery"],
//!     "priority": 1
//!   }
//! }
//! ```
//!
//! It is read and replaced whole. Only one process may write it at a time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::MissingResource;
use crate::cpe::Identifier;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error(transparent)]
    Missing(#[from] MissingResource),

    #[error("Failed to access overlay {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Overlay {} is not valid JSON: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Overrides recorded for one origin. Fields serialize in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    /// Curator-approved identifier for a port that declares none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmedmatch: Option<String>,
    /// Trusted identifier for a port whose declared one is missing from the dictionary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custommatch: Option<String>,
    /// Rejected candidates; only ever appended to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nomatch: Vec<String>,
    /// Review rank; lower values are reviewed first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

impl OverlayEntry {
    pub fn is_empty(&self) -> bool {
        self.confirmedmatch.is_none()
            && self.custommatch.is_none()
            && self.nomatch.is_empty()
            && self.priority.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKey {
    ConfirmedMatch,
    NoMatch,
    CustomMatch,
    Priority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayValue {
    ConfirmedMatch(String),
    NoMatch(Vec<String>),
    CustomMatch(String),
    Priority(i64),
}

/// What the classification store knows about an overlay origin, for garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPresence {
    /// No such port any more.
    Missing,
    /// Port is `Valid` through its own declared identifier found in the dictionary.
    DictionaryMatched,
    /// Anything else.
    Other,
}

/// Counts from a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub fields_removed: usize,
    pub origins_removed: usize,
}

#[derive(Debug, Clone)]
pub struct Overlay {
    path: PathBuf,
    data: BTreeMap<String, OverlayEntry>,
}

impl Overlay {
    /// Read the overlay at `path`; a missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let mut overlay = Self::empty(path);
        overlay.reload()?;
        Ok(overlay)
    }

    /// An in-memory overlay that will be written to `path` on save.
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), data: BTreeMap::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory state with the file contents.
    pub fn reload(&mut self) -> Result<(), OverlayError> {
        if !self.path.is_file() {
            return Err(MissingResource { what: "overlay file", path: self.path.clone() }.into());
        }
        let body = fs::read_to_string(&self.path)
            .map_err(|e| OverlayError::Io { path: self.path.clone(), source: e })?;
        let body = body.trim();
        // An empty overlay may have been written as `[]`.
        self.data = if body.is_empty() || is_empty_array(body) {
            BTreeMap::new()
        } else {
            serde_json::from_str(body)
                .map_err(|e| OverlayError::Json { path: self.path.clone(), source: e })?
        };
        Ok(())
    }

    /// Write the whole overlay, pretty-printed with sorted keys.
    ///
    /// The file is replaced through a sibling temporary file so readers never see a
    /// partial write.
    pub fn save(&self) -> Result<(), OverlayError> {
        let mut body = serde_json::to_string_pretty(&self.data)
            .map_err(|e| OverlayError::Json { path: self.path.clone(), source: e })?;
        body.push('\n');

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, body).map_err(|e| OverlayError::Io { path: tmp.clone(), source: e })?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| OverlayError::Io { path: self.path.clone(), source: e })?;
        debug!(path = %self.path.display(), origins = self.data.len(), "Overlay saved");
        Ok(())
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, origin: &str) -> Option<&OverlayEntry> {
        self.data.get(origin)
    }

    pub fn exists(&self, origin: &str, key: OverlayKey) -> bool {
        let Some(entry) = self.data.get(origin) else {
            return false;
        };
        match key {
            OverlayKey::ConfirmedMatch => entry.confirmedmatch.is_some(),
            OverlayKey::NoMatch => !entry.nomatch.is_empty(),
            OverlayKey::CustomMatch => entry.custommatch.is_some(),
            OverlayKey::Priority => entry.priority.is_some(),
        }
    }

    pub fn set(&mut self, origin: &str, value: OverlayValue) {
        let entry = self.data.entry(origin.to_string()).or_default();
        match value {
            OverlayValue::ConfirmedMatch(v) => entry.confirmedmatch = Some(v),
            OverlayValue::NoMatch(v) => entry.nomatch = v,
            OverlayValue::CustomMatch(v) => entry.custommatch = Some(v),
            OverlayValue::Priority(v) => entry.priority = Some(v),
        }
    }

    /// Clear one field, or the whole origin when `key` is `None`.
    pub fn unset(&mut self, origin: &str, key: Option<OverlayKey>) {
        let Some(key) = key else {
            self.data.remove(origin);
            return;
        };
        if let Some(entry) = self.data.get_mut(origin) {
            match key {
                OverlayKey::ConfirmedMatch => entry.confirmedmatch = None,
                OverlayKey::NoMatch => entry.nomatch.clear(),
                OverlayKey::CustomMatch => entry.custommatch = None,
                OverlayKey::Priority => entry.priority = None,
            }
        }
    }

    pub fn confirmed_match(&self, origin: &str) -> Option<&str> {
        self.data.get(origin).and_then(|e| e.confirmedmatch.as_deref())
    }

    pub fn custom_match(&self, origin: &str) -> Option<&str> {
        self.data.get(origin).and_then(|e| e.custommatch.as_deref())
    }

    pub fn no_matches(&self, origin: &str) -> &[String] {
        self.data.get(origin).map(|e| e.nomatch.as_slice()).unwrap_or(&[])
    }

    pub fn priority(&self, origin: &str) -> Option<i64> {
        self.data.get(origin).and_then(|e| e.priority)
    }

    /// Append `identifier` to the origin's `nomatch` list unless an entry with the same
    /// identity is already there. Returns whether the list changed.
    pub fn add_no_match(&mut self, origin: &str, identifier: &Identifier) -> bool {
        let already = self.no_matches(origin).iter().any(|existing| {
            match Identifier::parse(existing) {
                Ok(parsed) => parsed.compare(identifier).is_eq(),
                Err(_) => *existing == identifier.key().to_string(),
            }
        });
        if already {
            return false;
        }
        self.data
            .entry(origin.to_string())
            .or_default()
            .nomatch
            .push(identifier.key().to_string());
        true
    }

    /// Drop `confirmedmatch`/`nomatch` for origins whose port is gone or already matched
    /// through the dictionary, then drop origins left with no fields.
    ///
    /// `priority` and `custommatch` are never removed here.
    pub fn garbage_collect<F>(&mut self, presence: F) -> GcReport
    where
        F: Fn(&str) -> PortPresence,
    {
        let mut report = GcReport::default();
        for (origin, entry) in self.data.iter_mut() {
            if presence(origin) == PortPresence::Other {
                continue;
            }
            if entry.confirmedmatch.take().is_some() {
                report.fields_removed += 1;
            }
            if !entry.nomatch.is_empty() {
                entry.nomatch.clear();
                report.fields_removed += 1;
            }
        }

        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_empty());
        report.origins_removed = before - self.data.len();
        report
    }
}

fn is_empty_array(body: &str) -> bool {
    serde_json::from_str::<Vec<serde_json::Value>>(body).is_ok_and(|items| items.is_empty())
}
