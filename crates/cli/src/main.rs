use anyhow::Result;
use chkcpe::commands::{
    config_command, discover_command, gc_command, init_command, list_command,
    load_dictionary_command, match_command, next_command, nomatch_command, reconcile_command,
    run_command, scan_command, show_command, stages_command, summary_command,
};
use chkcpe::{init_tracing, resolve_config, ConfigOverrides};
use clap::{ArgAction, Parser, Subcommand};

/// Reconcile the CPE identifiers declared by ports against the NVD CPE dictionary.
///
/// This CLI is a thin wrapper around `chkcpe-core`. All substantive logic lives in the
/// library so it can be tested thoroughly and reused from other frontends.
#[derive(Parser, Debug)]
#[command(name = "chkcpe", version, about = "Ports CPE reconciliation", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the data directory, database and an empty overlay.
    Init,

    /// Show the effective configuration and whether each resource exists.
    Config {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run every stage: dictionary load, discovery, two extraction passes, reconciliation.
    Run {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Rebuild the dictionary from the snapshot file(s).
    LoadDictionary {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Rebuild the port list from the ports tree.
    Discover {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Extract metadata for every port not yet scanned.
    Scan {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Classify scanned ports against the dictionary and overlay.
    Reconcile {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Confirm a CPE for a port that declares none.
    Match {
        /// Port origin (`category/name`).
        #[arg(long)]
        origin: String,

        /// CPE in any accepted form (`cpe:2.3:...`, `cpe:/a:...` or `vendor:product`).
        #[arg(long)]
        cpe: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Reject a candidate CPE for a port.
    Nomatch {
        /// Port origin (`category/name`).
        #[arg(long)]
        origin: String,

        /// CPE in any accepted form.
        #[arg(long)]
        cpe: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Drop overlay entries for removed ports and ports already matched by the dictionary.
    Gc {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Port counts per status.
    Summary {
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List ports, optionally filtered.
    List {
        /// Only ports with this status.
        #[arg(long)]
        status: Option<String>,

        /// Only ports in this category.
        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show one port with its candidates.
    Show {
        /// Port origin (`category/name`).
        origin: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the next port awaiting review.
    Next {
        /// Show the whole review queue.
        #[arg(long, default_value_t = false)]
        all: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List recorded stage runs.
    Stages {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = resolve_config(&cli.overrides);
    init_tracing(&config.logs_dir, cli.verbose);

    match cli.command {
        Command::Init => init_command(&config)?,
        Command::Config { json } => config_command(&config, json)?,
        Command::Run { json } => run_command(&config, json)?,
        Command::LoadDictionary { json } => load_dictionary_command(&config, json)?,
        Command::Discover { json } => discover_command(&config, json)?,
        Command::Scan { json } => scan_command(&config, json)?,
        Command::Reconcile { json } => reconcile_command(&config, json)?,
        Command::Match { origin, cpe, json } => match_command(&config, &origin, &cpe, json)?,
        Command::Nomatch { origin, cpe, json } => nomatch_command(&config, &origin, &cpe, json)?,
        Command::Gc { json } => gc_command(&config, json)?,
        Command::Summary { json } => summary_command(&config, json)?,
        Command::List { status, category, json } => {
            list_command(&config, status.as_deref(), category.as_deref(), json)?
        }
        Command::Show { origin, json } => show_command(&config, &origin, json)?,
        Command::Next { all, json } => next_command(&config, all, json)?,
        Command::Stages { json } => stages_command(&config, json)?,
    }

    Ok(())
}
