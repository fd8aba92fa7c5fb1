use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

/// Merge independently owned role and user mappings into one shared
/// aws-auth table.
///
/// Each snippet declares a set of IAM role/user to RBAC mappings. authmap
/// merges every snippet into the shared table without touching entries that
/// belong to other snippets or to the platform (`system:node:*`), and
/// removes exactly what a snippet contributed when it is deleted.
///
/// State lives in the state directory:
///
///   aws-auth.json   the shared table
///   snippets.json   snippet declarations and status
///   config.toml     optional settings
#[derive(Parser)]
#[command(name = "authmap")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(
    after_help = "See 'authmap <command> --help' for more information on a specific command."
)]
struct Cli {
    /// Directory holding the table, snippet records and config.
    #[arg(long, global = true, env = "AUTHMAP_STATE_DIR", default_value = ".authmap")]
    state_dir: PathBuf,

    /// Config file (default: <state-dir>/config.toml).
    #[arg(long, global = true, env = "AUTHMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to wait for the controller to settle.
    #[arg(long, global = true, default_value_t = 60)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Declare or update snippets from a JSON manifest
    ///
    /// The file holds one snippet object or an array of them. Exits non-zero
    /// if any of them could not be fully merged.
    Apply {
        /// Manifest file.
        file: PathBuf,
    },

    /// Delete a snippet and remove its entries from the table
    Delete {
        /// Snippet identity as namespace/name.
        id: String,
    },

    /// Re-check every snippet against the table and repair drift
    Resync,

    /// Print the shared table document
    Show {
        /// Output format: text or json.
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Print every snippet's status
    Status {
        /// Output format: text or json.
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let env = commands::Env::open(cli.state_dir, cli.config.as_deref(), cli.timeout_secs)?;

    match cli.command {
        Commands::Apply { file } => commands::apply(&env, &file),
        Commands::Delete { id } => commands::delete(&env, &id),
        Commands::Resync => commands::resync(&env),
        Commands::Show { format } => commands::show(&env, format.parse()?),
        Commands::Status { format } => commands::status(&env, format.parse()?),
    }
}
