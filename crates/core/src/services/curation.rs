//! Curator decisions on individual ports.
//!
//! Every action writes the overlay before the store. A crash between the two leaves the
//! overlay ahead, and the next reconciliation brings the store back in line.

use std::collections::HashMap;

use thiserror::Error;
use tracing::info;

use crate::cpe::{Identifier, ParseError};
use crate::db::{CheckDb, DbError, DbResult, MatchSource, PortRecord, PortStatus, Stage};
use crate::overlay::{GcReport, Overlay, OverlayError, OverlayKey, OverlayValue, PortPresence};

#[derive(Debug, Error)]
pub enum CurationError {
    #[error("Unknown port origin: {0}")]
    UnknownOrigin(String),

    #[error("Invalid CPE '{text}': {source}")]
    Parse {
        text: String,
        #[source]
        source: ParseError,
    },

    #[error("The {required} stage has not completed; run it before collecting overlay garbage")]
    StageIncomplete { required: Stage },

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type CurationResult<T> = Result<T, CurationError>;

/// Applies curator decisions to one overlay and one store.
pub struct Curator<'a> {
    db: &'a CheckDb,
    overlay: &'a mut Overlay,
}

impl<'a> Curator<'a> {
    pub fn new(db: &'a CheckDb, overlay: &'a mut Overlay) -> Self {
        Self { db, overlay }
    }

    /// Confirm `text` as the identifier of `origin` and mark the port ready to commit.
    pub fn record_match(&mut self, origin: &str, text: &str) -> CurationResult<PortRecord> {
        let mut port = self.port(origin)?;
        let identifier = parse(text)?;

        self.overlay.set(origin, OverlayValue::ConfirmedMatch(identifier.key().to_string()));
        self.overlay.unset(origin, Some(OverlayKey::NoMatch));
        self.overlay.save()?;

        port.status = PortStatus::ReadyToCommit;
        port.resolved = Some(identifier.bind());
        port.successor = None;
        port.match_source = Some(MatchSource::Confirmed);
        port.candidates = vec![identifier.key().clone()];
        self.db.save_classification(&port)?;

        info!(origin, cpe = %identifier.key(), "Recorded confirmed match");
        Ok(port)
    }

    /// Reject `text` for `origin`. The port drops to `Unknown` once no candidates remain.
    pub fn record_no_match(&mut self, origin: &str, text: &str) -> CurationResult<PortRecord> {
        let mut port = self.port(origin)?;
        let identifier = parse(text)?;

        self.overlay.add_no_match(origin, &identifier);
        let confirmed_is_rejected = self
            .overlay
            .confirmed_match(origin)
            .and_then(|c| Identifier::parse(c).ok())
            .is_some_and(|c| c.compare(&identifier).is_eq());
        if confirmed_is_rejected {
            self.overlay.unset(origin, Some(OverlayKey::ConfirmedMatch));
        }
        self.overlay.save()?;

        port.candidates.retain(|candidate| candidate != identifier.key());
        if port.candidates.is_empty() {
            port.status = PortStatus::Unknown;
            port.resolved = None;
            port.successor = None;
            port.match_source = None;
        }
        self.db.save_classification(&port)?;

        info!(origin, cpe = %identifier.key(), remaining = port.candidates.len(), "Recorded rejected candidate");
        Ok(port)
    }

    /// Drop stale `confirmedmatch`/`nomatch` entries and save the overlay.
    pub fn collect_garbage(&mut self) -> CurationResult<GcReport> {
        collect_overlay_garbage(self.db, self.overlay)
    }

    fn port(&self, origin: &str) -> CurationResult<PortRecord> {
        self.db
            .load_port(origin)?
            .ok_or_else(|| CurationError::UnknownOrigin(origin.to_string()))
    }
}

fn parse(text: &str) -> CurationResult<Identifier> {
    Identifier::parse(text.trim())
        .map_err(|source| CurationError::Parse { text: text.to_string(), source })
}

/// Garbage-collect `overlay` against the ports in `db`, then save it.
///
/// Refuses to run unless the latest discovery succeeded, since an empty or half-rebuilt
/// port table would make every origin look removed.
pub fn collect_overlay_garbage(db: &CheckDb, overlay: &mut Overlay) -> CurationResult<GcReport> {
    if !db.stage_succeeded(Stage::Discovery)? {
        return Err(CurationError::StageIncomplete { required: Stage::Discovery });
    }

    let mut presence = HashMap::new();
    for origin in overlay.origins() {
        let state = match db.load_port(origin)? {
            None => PortPresence::Missing,
            Some(port)
                if port.status == PortStatus::Valid
                    && port.match_source == Some(MatchSource::Dictionary) =>
            {
                PortPresence::DictionaryMatched
            }
            Some(_) => PortPresence::Other,
        };
        presence.insert(origin.to_string(), state);
    }

    let report = overlay
        .garbage_collect(|origin| presence.get(origin).copied().unwrap_or(PortPresence::Other));
    overlay.save()?;
    info!(
        fields_removed = report.fields_removed,
        origins_removed = report.origins_removed,
        "Overlay garbage collected"
    );
    Ok(report)
}

/// `CheckNeeded` ports, lowest overlay priority first, unprioritised ports last, ties by
/// origin.
pub fn review_queue(db: &CheckDb, overlay: &Overlay) -> DbResult<Vec<PortRecord>> {
    let mut ports = db.list_ports(Some(PortStatus::CheckNeeded), None)?;
    ports.sort_by(|a, b| {
        let pa = overlay.priority(&a.origin);
        let pb = overlay.priority(&b.origin);
        pa.is_none()
            .cmp(&pb.is_none())
            .then_with(|| pa.cmp(&pb))
            .then_with(|| a.origin.cmp(&b.origin))
    });
    Ok(ports)
}

pub fn next_for_review(db: &CheckDb, overlay: &Overlay) -> DbResult<Option<PortRecord>> {
    Ok(review_queue(db, overlay)?.into_iter().next())
}
