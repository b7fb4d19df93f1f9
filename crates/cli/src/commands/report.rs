use anyhow::{anyhow, Result};
use chkcpe_core::config::Config;
use chkcpe_core::db::PortStatus;
use serde::Serialize;

use crate::commands::{open_store, port_line, print_json, print_port, validate_port_status};

#[derive(Serialize)]
pub struct StatusSummary {
    pub total: i64,
    pub counts: Vec<StatusCount>,
    pub dictionary_entries: i64,
}

#[derive(Serialize)]
pub struct StatusCount {
    pub status: PortStatus,
    pub count: i64,
}

/// Gather port counts per status, every terminal status included.
pub fn status_summary(config: &Config) -> Result<StatusSummary> {
    let ctx = open_store(config)?;
    let stored = ctx.db.status_counts()?;

    let mut counts: Vec<StatusCount> = PortStatus::TERMINAL
        .iter()
        .map(|status| StatusCount {
            status: *status,
            count: stored.iter().find(|(s, _)| s == status).map(|(_, n)| *n).unwrap_or(0),
        })
        .collect();
    for (status, count) in &stored {
        if !status.is_terminal() {
            counts.push(StatusCount { status: *status, count: *count });
        }
    }

    Ok(StatusSummary {
        total: stored.iter().map(|(_, n)| n).sum(),
        counts,
        dictionary_entries: ctx.db.product_count()?,
    })
}

pub fn summary_command(config: &Config, json: bool) -> Result<()> {
    let summary = status_summary(config)?;
    if json {
        return print_json(&summary);
    }
    println!("Ports: {}", summary.total);
    for entry in &summary.counts {
        println!("  {:<14} {}", entry.status.as_str(), entry.count);
    }
    println!("Dictionary entries: {}", summary.dictionary_entries);
    Ok(())
}

pub fn list_command(
    config: &Config,
    status: Option<&str>,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    let status = status.map(validate_port_status).transpose()?;
    let ctx = open_store(config)?;
    let ports = ctx.db.list_ports(status, category)?;
    if json {
        return print_json(&ports);
    }
    if ports.is_empty() {
        println!("No ports found.");
    }
    for port in &ports {
        println!("{}", port_line(port));
    }
    Ok(())
}

pub fn show_command(config: &Config, origin: &str, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let port = ctx.db.load_port(origin)?.ok_or_else(|| anyhow!("Unknown port origin: {origin}"))?;
    if json {
        return print_json(&port);
    }
    print_port(&port);
    Ok(())
}

pub fn stages_command(config: &Config, json: bool) -> Result<()> {
    let ctx = open_store(config)?;
    let runs = ctx.db.list_stage_runs()?;
    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No stage runs recorded.");
    }
    for run in &runs {
        println!(
            "#{:<4} {:<15} {:<10} {} -> {}  items={}{}",
            run.id,
            run.stage.as_str(),
            run.status.as_str(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
            run.items,
            run.detail.as_deref().map(|d| format!("  ({d})")).unwrap_or_default()
        );
    }
    Ok(())
}
