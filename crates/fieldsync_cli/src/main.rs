//! Fieldsync CLI
//!
//! Command-line tools for fieldsync journals.
//!
//! # Commands
//!
//! - `inspect` - Display engine and journal statistics
//! - `verify` - Verify journal framing, checksums and replay
//! - `conflicts` - List conflicts
//! - `changes` - Read the change feed as a device would
//! - `dump-journal` - Dump journal records for debugging
//! - `resolve` - Resolve one conflict

mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::Format;
use fieldsync_protocol::{ConflictStatus, DeviceId, ResolutionStrategy};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Fieldsync command-line journal tools.
#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display engine and journal statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify journal framing, checksums and replay
    Verify,

    /// List conflicts, oldest first
    Conflicts {
        /// Only conflicts raised by this device
        #[arg(short, long)]
        device: Option<DeviceId>,

        /// Only conflicts in this status (unresolved, client-wins, server-wins, manual-merge)
        #[arg(short, long)]
        status: Option<ConflictStatus>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Read the change feed as a device would
    Changes {
        /// Reading device; its own writes are left out (a random id sees everything)
        #[arg(short, long)]
        device: Option<DeviceId>,

        /// Cursor from a previous page (RFC 3339)
        #[arg(short, long)]
        since: Option<DateTime<Utc>>,

        /// Page size
        #[arg(short, long, default_value = "100")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Dump journal records for debugging
    DumpJournal {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Resolve one conflict
    Resolve {
        /// Conflict id
        conflict_id: Uuid,

        /// Strategy (client-wins, server-wins, manual-merge)
        strategy: ResolutionStrategy,

        /// Merged payload, required for manual-merge
        #[arg(short, long)]
        merged_payload: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Conflicts {
            device,
            status,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for conflicts")?;
            commands::conflicts::run(&path, device, status, format)?;
        }
        Commands::Changes {
            device,
            since,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for changes")?;
            commands::changes::run(&path, device, since, limit, format)?;
        }
        Commands::DumpJournal { limit, format } => {
            let path = cli.path.ok_or("Journal path required for dump-journal")?;
            commands::dump_journal::run(&path, limit, format)?;
        }
        Commands::Resolve {
            conflict_id,
            strategy,
            merged_payload,
        } => {
            let path = cli.path.ok_or("Journal path required for resolve")?;
            commands::resolve::run(&path, conflict_id, strategy, merged_payload)?;
        }
        Commands::Version => {
            println!("fieldsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "journal format v{}",
                fieldsync_core::journal::JOURNAL_VERSION
            );
        }
    }

    Ok(())
}
