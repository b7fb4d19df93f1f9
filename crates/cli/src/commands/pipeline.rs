use anyhow::{Context, Result};
use chkcpe_core::config::Config;
use chkcpe_core::services::{
    LoadReportSummary, MakeExtractor, Pipeline, ReconcileReport, ScanReport,
};

use crate::commands::{open_store, print_json};

/// Full pipeline run with the `make`-based extractor.
pub fn run_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let extractor = MakeExtractor::new(config);
    let report = Pipeline::new(config, &ctx.db, &extractor).run().context("Pipeline run failed")?;

    if json {
        return print_json(&report);
    }
    if let Some(dictionary) = &report.dictionary {
        print_load_report(dictionary);
    }
    println!("Discovered {} ports", report.discovered);
    for (pass, scan) in report.scans.iter().enumerate() {
        print!("Pass {}: ", pass + 1);
        print_scan_report(scan);
    }
    print_reconcile_report(&report.reconcile);
    Ok(())
}

pub fn load_dictionary_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let extractor = MakeExtractor::new(config);
    let report = Pipeline::new(config, &ctx.db, &extractor)
        .load_dictionary()
        .context("Failed to load CPE dictionary")?;
    let summary = LoadReportSummary::from(report);
    if json {
        return print_json(&summary);
    }
    print_load_report(&summary);
    Ok(())
}

pub fn discover_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let extractor = MakeExtractor::new(config);
    let discovered = Pipeline::new(config, &ctx.db, &extractor)
        .discover()
        .context("Port discovery failed")?;
    if json {
        return print_json(&serde_json::json!({ "discovered": discovered }));
    }
    println!("Discovered {discovered} ports under {}", config.ports_dir.display());
    Ok(())
}

pub fn scan_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let extractor = MakeExtractor::new(config);
    let report =
        Pipeline::new(config, &ctx.db, &extractor).scan().context("Port extraction failed")?;
    if json {
        return print_json(&report);
    }
    print_scan_report(&report);
    Ok(())
}

pub fn reconcile_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let extractor = MakeExtractor::new(config);
    let report =
        Pipeline::new(config, &ctx.db, &extractor).reconcile().context("Reconciliation failed")?;
    if json {
        return print_json(&report);
    }
    print_reconcile_report(&report);
    Ok(())
}

fn print_load_report(report: &LoadReportSummary) {
    println!(
        "Loaded CPE dictionary: {} entries from {} file(s) ({} ignored, {} malformed)",
        report.imported, report.files, report.ignored, report.malformed
    );
    println!("  Digest: {}", report.digest);
}

fn print_scan_report(report: &ScanReport) {
    println!(
        "Scanned {} of {} ports ({} failed)",
        report.scanned, report.attempted, report.failed
    );
}

fn print_reconcile_report(report: &ReconcileReport) {
    println!("Classified {} ports:", report.classified);
    for (status, count) in &report.counts {
        println!("  {status:<14} {count}");
    }
}
