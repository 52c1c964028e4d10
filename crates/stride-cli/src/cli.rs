use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use stride_core::sync::SyncDirection;
use stride_core::SyncTable;

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Track training data offline and sync it across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User whose data to read and sync (falls back to STRIDE_USER)
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or replace a record
    Put {
        /// Table name (e.g. sessions, preferences)
        #[arg(value_parser = parse_table)]
        table: SyncTable,
        /// Record payload as a JSON object
        data: String,
        /// Existing record ID to replace
        #[arg(long)]
        id: Option<String>,
        /// Output the stored record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record
    Get {
        #[arg(value_parser = parse_table)]
        table: SyncTable,
        /// Record ID
        id: String,
    },
    /// List records of a table
    List {
        #[arg(value_parser = parse_table)]
        table: SyncTable,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include deleted records
        #[arg(long)]
        include_deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record (synced as a tombstone)
    Delete {
        #[arg(value_parser = parse_table)]
        table: SyncTable,
        /// Record ID
        id: String,
    },
    /// Sync the local store with the remote store
    Sync {
        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status per table
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum DirectionArg {
    Push,
    Pull,
    Both,
}

impl From<DirectionArg> for SyncDirection {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Push => Self::Push,
            DirectionArg::Pull => Self::Pull,
            DirectionArg::Both => Self::Both,
        }
    }
}

pub fn parse_table(value: &str) -> Result<SyncTable, String> {
    value.parse().map_err(|_| {
        let known = SyncTable::ALL
            .iter()
            .map(|table| table.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown table '{value}' (expected one of: {known})")
    })
}
