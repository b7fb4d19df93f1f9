use anyhow::{Context, Result};
use chkcpe_core::config::Config;
use chkcpe_core::services::{collect_overlay_garbage, next_for_review, review_queue, Curator};

use crate::commands::{load_overlay, open_store, port_line, print_json, print_port};

/// Confirm `cpe` for `origin`.
pub fn match_command(config: &Config, origin: &str, cpe: &str, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let mut overlay = load_overlay(config)?;
    let port = Curator::new(&ctx.db, &mut overlay)
        .record_match(origin, cpe)
        .with_context(|| format!("Failed to record match for {origin}"))?;
    if json {
        return print_json(&port);
    }
    println!("Recorded match for {}: {}", port.origin, port.status);
    Ok(())
}

/// Reject `cpe` for `origin`.
pub fn nomatch_command(config: &Config, origin: &str, cpe: &str, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let mut overlay = load_overlay(config)?;
    let port = Curator::new(&ctx.db, &mut overlay)
        .record_no_match(origin, cpe)
        .with_context(|| format!("Failed to record rejection for {origin}"))?;
    if json {
        return print_json(&port);
    }
    println!(
        "Recorded rejection for {}: {} ({} candidate(s) left)",
        port.origin,
        port.status,
        port.candidates.len()
    );
    Ok(())
}

pub fn gc_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let mut overlay = load_overlay(config)?;
    let report =
        collect_overlay_garbage(&ctx.db, &mut overlay).context("Overlay garbage collection failed")?;
    if json {
        return print_json(&serde_json::json!({
            "fields_removed": report.fields_removed,
            "origins_removed": report.origins_removed,
        }));
    }
    println!(
        "Overlay cleaned: {} field(s) removed, {} origin(s) dropped",
        report.fields_removed, report.origins_removed
    );
    Ok(())
}

/// Show the next port awaiting review, or the whole queue with `all`.
pub fn next_command(config: &Config, all: bool, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let overlay = load_overlay(config)?;

    if all {
        let queue = review_queue(&ctx.db, &overlay).context("Failed to build review queue")?;
        if json {
            return print_json(&queue);
        }
        if queue.is_empty() {
            println!("No ports awaiting review.");
        }
        for port in &queue {
            let priority =
                overlay.priority(&port.origin).map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            println!("[{priority:>3}] {}", port_line(port));
        }
        return Ok(());
    }

    let next = next_for_review(&ctx.db, &overlay).context("Failed to build review queue")?;
    if json {
        return print_json(&next);
    }
    match next {
        Some(port) => print_port(&port),
        None => println!("No ports awaiting review."),
    }
    Ok(())
}
