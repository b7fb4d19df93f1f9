use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::{tempdir, TempDir};

/// Scratch data dir, ports tree and dictionary, plus the global flags pointing at them.
struct Sandbox {
    tmp: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = tempdir().expect("tempdir");
        for port in ["www/nginx", "x11/mystery", "Mk/Uses"] {
            fs::create_dir_all(tmp.path().join("ports").join(port)).expect("create port dir");
        }
        let dictionary = serde_json::json!({
            "products": [
                { "cpe": { "cpeName": "cpe:2.3:a:nginx:nginx:1.25.0:*:*:*:*:*:*:*" } },
                { "cpe": { "cpeName": "cpe:2.3:a:vendorA:mystery:1.0:*:*:*:*:*:*:*" } },
                { "cpe": { "cpeName": "cpe:2.3:a:vendorB:mystery:1.0:*:*:*:*:*:*:*" } },
                { "cpe": { "cpeName": "cpe:2.3:o:vendorA:mysteryos:1.0:*:*:*:*:*:*:*" } }
            ]
        });
        fs::write(tmp.path().join("dictionary.json"), dictionary.to_string()).expect("dictionary");
        Self { tmp }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.tmp.path().join(rel)
    }

    fn cmd(&self) -> Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chkcpe");
        cmd.env_remove("RUST_LOG")
            .arg("--data-dir")
            .arg(self.path("data"))
            .arg("--logs-dir")
            .arg(self.path("logs"))
            .arg("--ports-dir")
            .arg(self.path("ports"))
            .arg("--dictionary")
            .arg(self.path("dictionary.json"))
            .arg("--make")
            .arg(self.path("fake-make"))
            .arg("--jobs")
            .arg("2");
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).arg("--json").output().expect("run chkcpe");
        assert!(
            output.status.success(),
            "chkcpe {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
    }

    /// A stand-in for `make -C <portdir> -V...` that answers per port directory name.
    #[cfg(unix)]
    fn install_fake_make(&self) {
        use std::os::unix::fs::PermissionsExt;

        let script = r#"#!/bin/sh
case "$(basename "$2")" in
  nginx) printf 'nginx\n1.25.3\nweb@example.org\ncpe:2.3:a:nginx:nginx:1.25.3:*:*:*:*:*:*:*\n' ;;
  mystery) printf 'mystery\n0.1\nports@example.org\n\n' ;;
  *) echo "unknown port" >&2; exit 1 ;;
esac
"#;
        let path = self.path("fake-make");
        fs::write(&path, script).expect("write fake make");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake make");
    }
}

fn status_count(summary: &Value, status: &str) -> i64 {
    summary["counts"]
        .as_array()
        .expect("counts array")
        .iter()
        .find(|c| c["status"] == status)
        .and_then(|c| c["count"].as_i64())
        .unwrap_or(0)
}

#[test]
fn help_lists_subcommands() {
    assert_cmd::cargo::cargo_bin_cmd!("chkcpe")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reconcile").and(predicate::str::contains("nomatch")));
}

#[test]
fn init_creates_database_and_overlay_once() {
    let sandbox = Sandbox::new();

    sandbox
        .cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("(created)"));
    assert!(sandbox.path("data/chkcpe.db").is_file());
    assert!(sandbox.path("data/overlay.json").is_file());
    assert!(sandbox.path("logs/chkcpe.log").is_file());

    fs::write(sandbox.path("data/overlay.json"), "{\"www/nginx\": {\"priority\": 1}}\n").unwrap();
    sandbox
        .cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("(created)").not());
    let overlay = fs::read_to_string(sandbox.path("data/overlay.json")).unwrap();
    assert!(overlay.contains("priority"), "existing overlay must survive init");
}

#[test]
fn config_json_reflects_overrides() {
    let sandbox = Sandbox::new();
    let config = sandbox.json(&["config"]);
    assert_eq!(config["jobs"], 2);
    assert_eq!(
        Path::new(config["database"].as_str().unwrap()),
        sandbox.path("data").join("chkcpe.db")
    );
}

#[test]
fn run_fails_before_init_because_overlay_is_missing() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlay file not found"));
}

#[test]
fn scan_before_discovery_is_refused() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("init").assert().success();
    sandbox
        .cmd()
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("has not completed"));
}

#[test]
fn gc_before_discovery_keeps_the_overlay() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("init").assert().success();
    let curated = "{\"x11/mystery\": {\"confirmedmatch\": \"vendorA:mystery\"}}\n";
    fs::write(sandbox.path("data/overlay.json"), curated).unwrap();

    sandbox
        .cmd()
        .arg("gc")
        .assert()
        .failure()
        .stderr(predicate::str::contains("discovery stage has not completed"));
    assert_eq!(fs::read_to_string(sandbox.path("data/overlay.json")).unwrap(), curated);
}

#[test]
fn show_unknown_origin_fails() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("init").assert().success();
    sandbox
        .cmd()
        .args(["show", "www/ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown port origin: www/ghost"));
}

#[test]
fn list_rejects_unknown_status() {
    let sandbox = Sandbox::new();
    sandbox.cmd().arg("init").assert().success();
    sandbox
        .cmd()
        .args(["list", "--status", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid status 'bogus'"));
}

#[cfg(unix)]
#[test]
fn full_run_then_curation() {
    let sandbox = Sandbox::new();
    sandbox.install_fake_make();
    sandbox.cmd().arg("init").assert().success();

    let report = sandbox.json(&["run"]);
    assert_eq!(report["dictionary"]["imported"], 3);
    assert_eq!(report["dictionary"]["ignored"], 1);
    assert_eq!(report["discovered"], 2);
    assert_eq!(report["reconcile"]["classified"], 2);

    let summary = sandbox.json(&["summary"]);
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["dictionary_entries"], 3);
    assert_eq!(status_count(&summary, "valid"), 1);
    assert_eq!(status_count(&summary, "checkneeded"), 1);

    sandbox
        .cmd()
        .args(["list", "--status", "checkneeded"])
        .assert()
        .success()
        .stdout(predicate::str::contains("x11/mystery").and(predicate::str::contains("www/nginx").not()));

    let next = sandbox.json(&["next"]);
    assert_eq!(next["origin"], "x11/mystery");
    assert_eq!(next["candidates"].as_array().unwrap().len(), 2);

    sandbox
        .cmd()
        .args(["nomatch", "--origin", "x11/mystery", "--cpe", "vendorB:mystery"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 candidate(s) left"));
    sandbox
        .cmd()
        .args(["match", "--origin", "x11/mystery", "--cpe", "cpe:2.3:a:vendorA:mystery:*:*:*:*:*:*:*:*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("readytocommit"));

    let overlay: Value =
        serde_json::from_str(&fs::read_to_string(sandbox.path("data/overlay.json")).unwrap()).unwrap();
    assert_eq!(overlay["x11/mystery"]["confirmedmatch"], "vendorA:mystery");
    assert!(overlay["x11/mystery"].get("nomatch").is_none(), "confirming clears rejections");

    // Curation survives a fresh reconciliation.
    sandbox.cmd().arg("reconcile").assert().success();
    let shown = sandbox.json(&["show", "x11/mystery"]);
    assert_eq!(shown["status"], "readytocommit");
    assert_eq!(shown["match_source"], "confirmed");

    sandbox
        .cmd()
        .arg("next")
        .assert()
        .success()
        .stdout(predicate::str::contains("No ports awaiting review."));

    let stages = sandbox.json(&["stages"]);
    assert_eq!(stages.as_array().unwrap().len(), 6);
    assert_eq!(stages[5]["stage"], "reconciliation");

    let gc = sandbox.json(&["gc"]);
    assert_eq!(gc["fields_removed"], 0);
}
