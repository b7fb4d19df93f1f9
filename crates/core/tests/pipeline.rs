use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chkcpe_core::config::Config;
use chkcpe_core::cpe::ProductKey;
use chkcpe_core::db::{CheckDb, PortMetadata, PortStatus, Stage, StageStatus};
use chkcpe_core::services::pipeline::DISCOVERY_COMMIT_EVERY;
use chkcpe_core::services::{
    discover_origins, ExtractError, Extractor, Pipeline, PipelineError,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

/// Serves canned metadata; origins in `flaky` fail on their first attempt only.
struct FakeExtractor {
    ports: HashMap<String, PortMetadata>,
    flaky: Mutex<HashSet<String>>,
}

impl FakeExtractor {
    fn new(ports: &[(&str, &str, &str)]) -> Self {
        let ports = ports
            .iter()
            .map(|(origin, portname, declared)| {
                (
                    origin.to_string(),
                    PortMetadata {
                        portname: portname.to_string(),
                        version: "1.0".into(),
                        maintainer: "ports@example.org".into(),
                        declared: declared.to_string(),
                    },
                )
            })
            .collect();
        Self { ports, flaky: Mutex::new(HashSet::new()) }
    }

    fn flaky(self, origin: &str) -> Self {
        self.flaky.lock().unwrap().insert(origin.to_string());
        self
    }
}

impl Extractor for FakeExtractor {
    fn extract(&self, origin: &str) -> Result<PortMetadata, ExtractError> {
        if self.flaky.lock().unwrap().remove(origin) {
            return Err(ExtractError::FieldCount { expected: 4, found: 2 });
        }
        self.ports.get(origin).cloned().ok_or_else(|| ExtractError::MissingPort(origin.into()))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn mkdirs(root: &Path, dirs: &[&str]) {
    for dir in dirs {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
}

fn setup() -> (TempDir, Config) {
    let tmp = tempdir().unwrap();
    let mut config = Config::for_data_dir(tmp.path().join("data"));
    config.ports_dir = tmp.path().join("ports");
    config.dictionary = tmp.path().join("data/nvdcpe.json");
    config.jobs = 3;
    fs::create_dir_all(&config.data_dir).unwrap();

    mkdirs(
        &config.ports_dir,
        &[
            "www/nginx",
            "devel/foobar-oldlib",
            "x11/mystery",
            "x11/.hidden",
            "Mk/Uses",
            "Templates/foo",
            "Tools/scripts",
            "distfiles/cache",
            ".git/objects",
        ],
    );
    fs::write(config.ports_dir.join("Makefile"), "SUBDIR += www\n").unwrap();
    fs::write(config.ports_dir.join("www/Makefile"), "SUBDIR += nginx\n").unwrap();

    let products = json!({
        "products": [
            { "cpe": { "cpeName": "cpe:2.3:a:nginx:nginx:1.25.0:*:*:*:*:*:*:*" } },
            { "cpe": {
                "cpeName": "cpe:2.3:a:devel:oldlib:1.0:*:*:*:*:*:*:*",
                "deprecated": true,
                "deprecatedBy": [{ "cpeName": "cpe:2.3:a:devel:newlib:1.0:*:*:*:*:*:*:*" }]
            } },
            { "cpe": { "cpeName": "cpe:2.3:a:vendorA:mystery:1.0:*:*:*:*:*:*:*" } },
            { "cpe": { "cpeName": "cpe:2.3:a:vendorB:mystery:1.0:*:*:*:*:*:*:*" } }
        ]
    });
    fs::write(&config.dictionary, products.to_string()).unwrap();
    fs::write(&config.overlay, "{}\n").unwrap();
    (tmp, config)
}

fn extractor() -> FakeExtractor {
    FakeExtractor::new(&[
        ("www/nginx", "nginx", "cpe:2.3:a:nginx:nginx:1.25.0:*:*:*:*:*:*:*"),
        ("devel/foobar-oldlib", "foobar-oldlib", "cpe:2.3:a:devel:oldlib:1.0:*:*:*:*:*:*:*"),
        ("x11/mystery", "mystery", ""),
    ])
}

#[test]
fn discovery_skips_infrastructure_and_hidden_directories() {
    let (_tmp, config) = setup();
    let origins: Vec<String> =
        discover_origins(&config.ports_dir).unwrap().iter().map(|o| o.to_string()).collect();
    assert_eq!(origins, vec!["devel/foobar-oldlib", "www/nginx", "x11/mystery"]);
}

#[test]
fn full_run_classifies_every_port() {
    let (_tmp, config) = setup();
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = extractor().flaky("x11/mystery");

    let report = Pipeline::new(&config, &db, &extractor).run().expect("pipeline run");

    let dictionary = report.dictionary.expect("dictionary report");
    assert_eq!(dictionary.imported, 4);
    assert_eq!(report.discovered, 3);
    assert_eq!(report.scans.len(), 2);
    assert_eq!((report.scans[0].scanned, report.scans[0].failed), (2, 1));
    assert_eq!((report.scans[1].attempted, report.scans[1].scanned), (1, 1));
    assert_eq!(report.reconcile.classified, 3);
    assert_eq!(report.reconcile.count(PortStatus::Valid), 1);

    assert_eq!(db.load_port("www/nginx").unwrap().unwrap().status, PortStatus::Valid);
    let oldlib = db.load_port("devel/foobar-oldlib").unwrap().unwrap();
    assert_eq!(oldlib.status, PortStatus::Deprecated);
    assert_eq!(oldlib.successor, Some(ProductKey::new("devel", "newlib")));
    let mystery = db.load_port("x11/mystery").unwrap().unwrap();
    assert_eq!(mystery.status, PortStatus::CheckNeeded);
    assert_eq!(mystery.candidates.len(), 2);

    let stages: Vec<(Stage, StageStatus)> =
        db.list_stage_runs().unwrap().iter().map(|r| (r.stage, r.status)).collect();
    assert_eq!(
        stages,
        vec![
            (Stage::Dictionary, StageStatus::Succeeded),
            (Stage::Discovery, StageStatus::Succeeded),
            (Stage::Extraction, StageStatus::Succeeded),
            (Stage::Extraction, StageStatus::Succeeded),
            (Stage::Reconciliation, StageStatus::Succeeded),
        ]
    );
}

#[test]
fn failed_extraction_leaves_port_new() {
    let (_tmp, config) = setup();
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = FakeExtractor::new(&[("www/nginx", "nginx", "")]);
    let pipeline = Pipeline::new(&config, &db, &extractor);

    pipeline.discover().unwrap();
    let scan = pipeline.scan().unwrap();
    assert_eq!((scan.attempted, scan.scanned, scan.failed), (3, 1, 2));
    assert_eq!(
        db.list_origins(Some(PortStatus::New), None).unwrap(),
        vec!["devel/foobar-oldlib", "x11/mystery"]
    );

    pipeline.load_dictionary().unwrap();
    let report = pipeline.reconcile().unwrap();
    assert_eq!(report.classified, 1, "ports still New are not classified");
}

#[test]
fn rediscovery_rebuilds_the_port_set() {
    let (_tmp, config) = setup();
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = extractor();
    let pipeline = Pipeline::new(&config, &db, &extractor);

    pipeline.discover().unwrap();
    pipeline.scan().unwrap();
    fs::remove_dir_all(config.ports_dir.join("x11/mystery")).unwrap();
    fs::create_dir_all(config.ports_dir.join("net/curl")).unwrap();

    assert_eq!(pipeline.discover().unwrap(), 3);
    let ports = db.list_ports(None, None).unwrap();
    let origins: Vec<&str> = ports.iter().map(|p| p.origin.as_str()).collect();
    assert_eq!(origins, vec!["devel/foobar-oldlib", "net/curl", "www/nginx"]);
    assert!(ports.iter().all(|p| p.status == PortStatus::New));
}

#[test]
fn scan_requires_completed_discovery() {
    let (_tmp, config) = setup();
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = extractor();
    let pipeline = Pipeline::new(&config, &db, &extractor);

    let err = pipeline.scan().unwrap_err();
    assert!(matches!(
        err,
        PipelineError::StageIncomplete { required: Stage::Discovery, stage: Stage::Extraction }
    ));

    // An interrupted discovery is just as unusable as none.
    let run = db.begin_stage(Stage::Discovery).unwrap();
    db.finish_stage(run, StageStatus::Failed, 0, Some("killed")).unwrap();
    assert!(matches!(pipeline.scan(), Err(PipelineError::StageIncomplete { .. })));
}

#[test]
fn missing_resources_fail_before_any_stage_runs() {
    let (_tmp, mut config) = setup();
    fs::remove_file(&config.overlay).unwrap();
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = extractor();

    let err = Pipeline::new(&config, &db, &extractor).run().unwrap_err();
    assert!(matches!(err, PipelineError::Missing(_)), "unexpected error: {err}");
    assert!(db.list_stage_runs().unwrap().is_empty());

    config.ports_dir = config.ports_dir.join("does-not-exist");
    let err = Pipeline::new(&config, &db, &extractor).discover().unwrap_err();
    assert!(err.to_string().contains("ports tree not found"), "unexpected error: {err}");
}

#[test]
fn discovery_spanning_several_commit_chunks_is_complete() {
    let (_tmp, config) = setup();
    let bulk = config.ports_dir.join("bulk");
    for i in 0..DISCOVERY_COMMIT_EVERY + 2 {
        fs::create_dir_all(bulk.join(format!("port{i:05}"))).unwrap();
    }
    let db = CheckDb::open(&config.database).unwrap();
    let extractor = extractor();

    let discovered = Pipeline::new(&config, &db, &extractor).discover().unwrap();
    assert_eq!(discovered, DISCOVERY_COMMIT_EVERY + 5);
    drop(db);

    let db = CheckDb::open(&config.database).unwrap();
    assert_eq!(db.list_origins(None, Some("bulk")).unwrap().len(), DISCOVERY_COMMIT_EVERY + 2);
    assert_eq!(db.list_origins(Some(PortStatus::New), None).unwrap().len(), discovered);
    assert!(db.stage_succeeded(Stage::Discovery).unwrap());
}
