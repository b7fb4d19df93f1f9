use chkcpe_core::cpe::ProductKey;
use chkcpe_core::db::{CheckDb, MatchSource, Origin, PortStatus, Stage, StageStatus};
use chkcpe_core::overlay::{GcReport, Overlay, OverlayValue};
use chkcpe_core::services::{
    collect_overlay_garbage, next_for_review, review_queue, CurationError, Curator,
};
use tempfile::{tempdir, TempDir};

/// Store after a successful discovery of `ports`, each forced to the given status.
fn store_with(ports: &[(&str, PortStatus)]) -> CheckDb {
    let db = CheckDb::open_in_memory().unwrap();
    let run = db.begin_stage(Stage::Discovery).unwrap();
    db.finish_stage(run, StageStatus::Succeeded, ports.len() as i64, None).unwrap();
    for (origin, status) in ports {
        db.insert_new_port(&Origin::parse(origin).unwrap()).unwrap();
        let mut port = db.load_port(origin).unwrap().unwrap();
        port.status = *status;
        if *status == PortStatus::CheckNeeded {
            port.candidates = vec![ProductKey::new("acme", port.portdir.clone())];
        }
        db.save_classification(&port).unwrap();
    }
    db
}

fn overlay() -> (TempDir, Overlay) {
    let tmp = tempdir().unwrap();
    let overlay = Overlay::empty(tmp.path().join("overlay.json"));
    overlay.save().unwrap();
    (tmp, overlay)
}

#[test]
fn actions_on_unknown_origin_fail_without_touching_overlay() {
    let db = store_with(&[]);
    let (_tmp, mut overlay) = overlay();

    let err = Curator::new(&db, &mut overlay).record_match("www/ghost", "acme:ghost").unwrap_err();
    assert!(matches!(err, CurationError::UnknownOrigin(ref o) if o == "www/ghost"));
    assert_eq!(err.to_string(), "Unknown port origin: www/ghost");

    let err = Curator::new(&db, &mut overlay).record_no_match("www/ghost", "acme:ghost").unwrap_err();
    assert!(matches!(err, CurationError::UnknownOrigin(_)));
    assert!(overlay.is_empty());
}

#[test]
fn unparseable_identifier_is_rejected() {
    let db = store_with(&[("x11/mystery", PortStatus::CheckNeeded)]);
    let (_tmp, mut overlay) = overlay();

    let err = Curator::new(&db, &mut overlay).record_match("x11/mystery", "cpe:2.3:o:acme").unwrap_err();
    assert!(matches!(err, CurationError::Parse { .. }), "unexpected error: {err}");
    assert_eq!(db.load_port("x11/mystery").unwrap().unwrap().status, PortStatus::CheckNeeded);
    assert!(overlay.confirmed_match("x11/mystery").is_none());
}

#[test]
fn record_match_stores_uri_form_and_clears_rejections() {
    let db = store_with(&[("x11/mystery", PortStatus::CheckNeeded)]);
    let (_tmp, mut overlay) = overlay();
    overlay.set("x11/mystery", OverlayValue::NoMatch(vec!["other:mystery".into()]));

    let port = Curator::new(&db, &mut overlay)
        .record_match("x11/mystery", "cpe:/a:acme:mystery:2.0")
        .unwrap();
    assert_eq!(port.match_source, Some(MatchSource::Confirmed));
    assert_eq!(port.resolved.as_deref(), Some("cpe:/a:acme:mystery:2.0"));
    assert_eq!(overlay.confirmed_match("x11/mystery"), Some("acme:mystery"));
    assert!(overlay.no_matches("x11/mystery").is_empty());

    let stored = db.load_port("x11/mystery").unwrap().unwrap();
    assert_eq!(stored.status, PortStatus::ReadyToCommit);
}

#[test]
fn rejecting_the_confirmed_match_withdraws_it() {
    let db = store_with(&[("x11/mystery", PortStatus::CheckNeeded)]);
    let (_tmp, mut overlay) = overlay();

    Curator::new(&db, &mut overlay).record_match("x11/mystery", "acme:mystery").unwrap();
    let port = Curator::new(&db, &mut overlay).record_no_match("x11/mystery", "ACME:Mystery").unwrap();

    assert!(overlay.confirmed_match("x11/mystery").is_none());
    assert_eq!(overlay.no_matches("x11/mystery"), ["ACME:Mystery".to_string()]);
    assert_eq!(port.status, PortStatus::Unknown);
    assert!(port.match_source.is_none());
    assert!(port.resolved.is_none());

    let reloaded = Overlay::load(overlay.path()).unwrap();
    assert_eq!(reloaded.no_matches("x11/mystery").len(), 1);
}

#[test]
fn review_queue_orders_by_priority_then_origin() {
    let db = store_with(&[
        ("www/zeta", PortStatus::CheckNeeded),
        ("www/alpha", PortStatus::CheckNeeded),
        ("devel/urgent", PortStatus::CheckNeeded),
        ("devel/later", PortStatus::CheckNeeded),
        ("www/done", PortStatus::Valid),
    ]);
    let (_tmp, mut overlay) = overlay();
    overlay.set("devel/later", OverlayValue::Priority(5));
    overlay.set("devel/urgent", OverlayValue::Priority(1));
    overlay.set("www/done", OverlayValue::Priority(0));

    let queue: Vec<String> =
        review_queue(&db, &overlay).unwrap().into_iter().map(|p| p.origin).collect();
    assert_eq!(queue, vec!["devel/urgent", "devel/later", "www/alpha", "www/zeta"]);

    let next = next_for_review(&db, &overlay).unwrap().unwrap();
    assert_eq!(next.origin, "devel/urgent");
}

#[test]
fn empty_review_queue_has_no_next() {
    let db = store_with(&[("www/nginx", PortStatus::Valid)]);
    let (_tmp, overlay) = overlay();
    assert!(next_for_review(&db, &overlay).unwrap().is_none());
}

#[test]
fn garbage_collection_uses_store_state_and_saves() {
    let db = store_with(&[("www/nginx", PortStatus::Valid), ("x11/mystery", PortStatus::CheckNeeded)]);
    let mut nginx = db.load_port("www/nginx").unwrap().unwrap();
    nginx.match_source = Some(MatchSource::Dictionary);
    db.save_classification(&nginx).unwrap();

    let (_tmp, mut overlay) = overlay();
    overlay.set("www/nginx", OverlayValue::NoMatch(vec!["f5:nginx".into()]));
    overlay.set("www/nginx", OverlayValue::Priority(2));
    overlay.set("x11/mystery", OverlayValue::NoMatch(vec!["vendorB:mystery".into()]));
    overlay.set("www/removed", OverlayValue::ConfirmedMatch("acme:removed".into()));

    let report = collect_overlay_garbage(&db, &mut overlay).unwrap();
    assert_eq!(report, GcReport { fields_removed: 2, origins_removed: 1 });

    let reloaded = Overlay::load(overlay.path()).unwrap();
    assert!(reloaded.no_matches("www/nginx").is_empty());
    assert_eq!(reloaded.priority("www/nginx"), Some(2));
    assert_eq!(reloaded.no_matches("x11/mystery"), ["vendorB:mystery".to_string()]);
    assert!(reloaded.get("www/removed").is_none());
}

#[test]
fn garbage_collection_refuses_interrupted_discovery() {
    let db = store_with(&[("x11/mystery", PortStatus::CheckNeeded)]);
    let (_tmp, mut overlay) = overlay();
    overlay.set("x11/mystery", OverlayValue::ConfirmedMatch("vendorA:mystery".into()));
    overlay.set("x11/mystery", OverlayValue::NoMatch(vec!["vendorB:mystery".into()]));
    overlay.save().unwrap();

    // A rebuild that cleared the port table and never finished.
    db.begin_stage(Stage::Discovery).unwrap();
    db.clear_ports().unwrap();

    let err = collect_overlay_garbage(&db, &mut overlay).unwrap_err();
    assert!(
        matches!(err, CurationError::StageIncomplete { required: Stage::Discovery }),
        "unexpected error: {err}"
    );
    assert_eq!(overlay.confirmed_match("x11/mystery"), Some("vendorA:mystery"));

    let reloaded = Overlay::load(overlay.path()).unwrap();
    assert_eq!(reloaded.confirmed_match("x11/mystery"), Some("vendorA:mystery"));
    assert_eq!(reloaded.no_matches("x11/mystery"), ["vendorB:mystery".to_string()]);
}

#[test]
fn garbage_collection_refuses_fresh_store() {
    let db = CheckDb::open_in_memory().unwrap();
    let (_tmp, mut overlay) = overlay();
    overlay.set("www/nginx", OverlayValue::NoMatch(vec!["f5:nginx".into()]));

    assert!(matches!(
        Curator::new(&db, &mut overlay).collect_garbage(),
        Err(CurationError::StageIncomplete { .. })
    ));
    assert_eq!(overlay.no_matches("www/nginx").len(), 1);
}
