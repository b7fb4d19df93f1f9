use anyhow::{anyhow, Context, Result};
use chkcpe_core::config::Config;
use chkcpe_core::db::{PortRecord, PortStatus, StoreContext};
use chkcpe_core::overlay::Overlay;
use serde::Serialize;

/// Open the classification store named by `config`.
pub fn open_store(config: &Config) -> Result<StoreContext> {
    StoreContext::open(config.clone())
}

/// Load the overlay named by `config`; it must already exist.
pub fn load_overlay(config: &Config) -> Result<Overlay> {
    Overlay::load(&config.overlay)
        .with_context(|| format!("Failed to load overlay {}", config.overlay.display()))
}

pub fn validate_port_status(status: &str) -> Result<PortStatus> {
    status.parse::<PortStatus>().map_err(|_| {
        anyhow!(
            "Invalid status '{}'. Allowed: new, scanned, valid, invalid, deprecated, checkneeded, readytocommit, unknown",
            status
        )
    })
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line rendering used by `list`, `next` and the curation commands.
pub fn port_line(port: &PortRecord) -> String {
    let mut line = format!("{:<40} {}", port.origin, port.status);
    if let Some(resolved) = &port.resolved {
        line.push_str(&format!("  {resolved}"));
    } else if !port.declared.is_empty() {
        line.push_str(&format!("  {}", port.declared));
    }
    if let Some(successor) = &port.successor {
        line.push_str(&format!(" -> {successor}"));
    }
    line
}

/// Multi-line rendering used by `show`.
pub fn print_port(port: &PortRecord) {
    println!("Port: {}", port.origin);
    println!("  Status: {}", port.status);
    println!("  Portname: {}", port.portname);
    println!("  Version: {}", port.version);
    println!("  Maintainer: {}", port.maintainer);
    println!("  Declared CPE: {}", if port.declared.is_empty() { "-" } else { &port.declared });
    if let Some(resolved) = &port.resolved {
        let source = port.match_source.map(|s| s.as_str()).unwrap_or("-");
        println!("  Resolved: {resolved} ({source})");
    }
    if let Some(successor) = &port.successor {
        println!("  Deprecated by: {successor}");
    }
    if port.candidates.is_empty() {
        println!("  Candidates: none");
    } else {
        println!("  Candidates:");
        for candidate in &port.candidates {
            println!("    - {candidate}");
        }
    }
}
