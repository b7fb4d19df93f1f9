use std::fs;

use anyhow::{Context, Result};
use chkcpe_core::config::Config;
use chkcpe_core::overlay::Overlay;

use crate::commands::{open_store, print_json};

/// Create the data and log directories, the database and an empty overlay.
///
/// An existing overlay is left untouched.
pub fn init_command(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir: {}", config.data_dir.display()))?;
    fs::create_dir_all(&config.logs_dir)
        .with_context(|| format!("Failed to create logs dir: {}", config.logs_dir.display()))?;

    let overlay_created = if config.overlay.exists() {
        false
    } else {
        if let Some(parent) = config.overlay.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Overlay::empty(&config.overlay)
            .save()
            .with_context(|| format!("Failed to write overlay {}", config.overlay.display()))?;
        true
    };

    // Opening the store creates and migrates the database.
    open_store(config)?;

    println!("Initialized chkcpe data directory:");
    println!("  Data dir: {}", config.data_dir.display());
    println!("  Logs dir: {}", config.logs_dir.display());
    println!("  Database: {}", config.database.display());
    println!(
        "  Overlay: {}{}",
        config.overlay.display(),
        if overlay_created { " (created)" } else { "" }
    );
    println!("  Dictionary: {}", config.dictionary.display());
    Ok(())
}

/// Print the effective configuration.
pub fn config_command(config: &Config, json: bool) -> Result<()> {
    if json {
        return print_json(config);
    }

    println!("chkcpe configuration");
    println!("====================");
    println!("Ports dir:  {}", config.ports_dir.display());
    println!("Data dir:   {}", config.data_dir.display());
    println!("Logs dir:   {}", config.logs_dir.display());
    println!("Make:       {}", config.make_bin.display());
    println!("Database:   {}", config.database.display());
    println!("Dictionary: {}", config.dictionary.display());
    println!("Overlay:    {}", config.overlay.display());
    println!("Jobs:       {}", config.jobs);
    println!();
    println!("Resources:");
    print_resource_status("Ports tree", config.require_ports_dir().is_ok(), &config.ports_dir);
    print_resource_status("Dictionary", config.require_dictionary().is_ok(), &config.dictionary);
    print_resource_status("Overlay", config.require_overlay().is_ok(), &config.overlay);
    Ok(())
}

fn print_resource_status(label: &str, ok: bool, path: &std::path::Path) {
    println!("- {label}: {} ({})", if ok { "OK" } else { "MISSING" }, path.display());
}
