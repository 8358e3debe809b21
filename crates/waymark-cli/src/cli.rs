use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "waymark")]
#[command(about = "Local-first records with queued sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Subject (user) id to act as; falls back to WAYMARK_SUBJECT
    #[arg(long, global = true, value_name = "ID")]
    pub subject: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update a record
    Put {
        /// Record ID (generated when omitted)
        id: Option<String>,
        /// Display label
        #[arg(short, long)]
        label: Option<String>,
        /// Extra field as NAME=VALUE; VALUE is parsed as JSON when possible
        #[arg(short, long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record
    Get {
        /// Record ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List local records
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record and everything attached to it
    Delete {
        /// Record ID
        id: String,
    },
    /// Rename a record
    Label {
        /// Record ID
        id: String,
        /// New label
        #[arg(required = true)]
        label: Vec<String>,
    },
    /// Show or set the current record
    Current {
        /// Record ID to make current
        id: Option<String>,
        /// Clear the current record
        #[arg(long, conflicts_with = "id")]
        clear: bool,
    },
    /// Inspect queued remote operations
    Outbox {
        /// Show dead-lettered operations instead of pending ones
        #[arg(long)]
        dead: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop dead-lettered operations
    PurgeDead,
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pull remote records and deliver queued operations
    Sync {
        /// Keep running and sync live changes until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Share records with invite codes
    Invite {
        #[command(subcommand)]
        command: InviteCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum InviteCommands {
    /// Create an invite code for a record
    Create {
        /// Record ID to share
        id: String,
    },
    /// Redeem an invite code
    Redeem {
        /// Six-character invite code
        code: String,
    },
}
