//! Classification of scanned ports against the dictionary and the overlay.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cpe::{Identifier, ProductKey};
use crate::db::{DbResult, MatchSource, PortRecord, PortStatus};
use crate::dictionary::Dictionary;
use crate::overlay::Overlay;

/// Outcome of classifying one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: PortStatus,
    pub resolved: Option<String>,
    pub successor: Option<ProductKey>,
    pub match_source: Option<MatchSource>,
    pub candidates: Vec<ProductKey>,
}

impl Classification {
    fn status(status: PortStatus) -> Self {
        Self { status, resolved: None, successor: None, match_source: None, candidates: Vec::new() }
    }

    /// Copy the outcome onto `port`.
    pub fn apply(self, port: &mut PortRecord) {
        port.status = self.status;
        port.resolved = self.resolved;
        port.successor = self.successor;
        port.match_source = self.match_source;
        port.candidates = self.candidates;
    }
}

/// Decide the terminal status of a scanned port.
///
/// Ports that declare an identifier are checked against the dictionary, falling back to
/// the overlay's `custommatch`. Ports that declare none take the overlay's
/// `confirmedmatch`, or else get candidates from a product-name search minus anything the
/// curator rejected.
pub fn classify(
    port: &PortRecord,
    dictionary: &Dictionary<'_>,
    overlay: &Overlay,
) -> DbResult<Classification> {
    let declared = port.declared.trim();
    if !declared.is_empty() {
        match Identifier::parse(declared) {
            Ok(identifier) => return classify_declared(port, &identifier, dictionary, overlay),
            Err(err) => {
                warn!(origin = %port.origin, cpe = %declared, error = %err, "Unreadable CPE_STR; treating port as undeclared");
            }
        }
    }
    classify_undeclared(port, dictionary, overlay)
}

fn classify_declared(
    port: &PortRecord,
    identifier: &Identifier,
    dictionary: &Dictionary<'_>,
    overlay: &Overlay,
) -> DbResult<Classification> {
    if let Some(found) = dictionary.find_exact(identifier.vendor(), identifier.product())? {
        let mut outcome = Classification::status(PortStatus::Valid);
        outcome.resolved = Some(identifier.bind());
        outcome.match_source = Some(MatchSource::Dictionary);
        if let Some(successor) = found.successor() {
            debug!(origin = %port.origin, successor = %successor, "Declared CPE is deprecated");
            outcome.status = PortStatus::Deprecated;
            outcome.successor = Some(successor.clone());
        }
        return Ok(outcome);
    }

    if let Some(custom) = overlay.custom_match(&port.origin) {
        match Identifier::parse(custom) {
            Ok(custom) => {
                let mut outcome = Classification::status(PortStatus::Valid);
                outcome.resolved = Some(custom.bind());
                outcome.match_source = Some(MatchSource::Custom);
                return Ok(outcome);
            }
            Err(err) => {
                warn!(origin = %port.origin, custommatch = %custom, error = %err, "Ignoring unreadable custommatch");
            }
        }
    }

    debug!(origin = %port.origin, vendor = %identifier.vendor(), product = %identifier.product(), "Declared CPE not in dictionary");
    Ok(Classification::status(PortStatus::Invalid))
}

fn classify_undeclared(
    port: &PortRecord,
    dictionary: &Dictionary<'_>,
    overlay: &Overlay,
) -> DbResult<Classification> {
    if let Some(confirmed) = overlay.confirmed_match(&port.origin) {
        match Identifier::parse(confirmed) {
            Ok(confirmed) => {
                let successor = dictionary.lookup(confirmed.key())?.and_then(|e| e.successor);
                let mut outcome = Classification::status(if successor.is_some() {
                    PortStatus::Deprecated
                } else {
                    PortStatus::ReadyToCommit
                });
                outcome.resolved = Some(confirmed.bind());
                outcome.successor = successor;
                outcome.match_source = Some(MatchSource::Confirmed);
                outcome.candidates = vec![confirmed.key().clone()];
                return Ok(outcome);
            }
            Err(err) => {
                warn!(origin = %port.origin, confirmedmatch = %confirmed, error = %err, "Ignoring unreadable confirmedmatch");
            }
        }
    }

    let mut rejected = Vec::new();
    for text in overlay.no_matches(&port.origin) {
        match Identifier::parse(text) {
            Ok(identifier) => rejected.push(identifier),
            Err(err) => warn!(origin = %port.origin, nomatch = %text, error = %err, "Ignoring unreadable nomatch entry"),
        }
    }

    let name = if port.portname.is_empty() { &port.portdir } else { &port.portname };
    let candidates: Vec<ProductKey> = dictionary
        .find_candidates_by_product_name(name)?
        .into_iter()
        .filter(|candidate| !rejected.iter().any(|r| r.compare(candidate).is_eq()))
        .map(|candidate| candidate.key().clone())
        .collect();

    let mut outcome = Classification::status(if candidates.is_empty() {
        PortStatus::Unknown
    } else {
        PortStatus::CheckNeeded
    });
    outcome.candidates = candidates;
    Ok(outcome)
}
