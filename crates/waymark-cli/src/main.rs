//! Waymark CLI - drive the local-first store and sync engine from a terminal

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands, InviteCommands};
use crate::commands::common::{resolve_db_path, resolve_subject};
use crate::commands::completions::run_completions;
use crate::commands::current::run_current;
use crate::commands::delete::run_delete;
use crate::commands::get::run_get;
use crate::commands::invite::{run_invite_create, run_invite_redeem};
use crate::commands::label::run_label;
use crate::commands::list::run_list;
use crate::commands::outbox::{run_outbox, run_purge_dead};
use crate::commands::put::{run_put, PutArgs};
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("waymark=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let subject = resolve_subject(cli.subject);

    match cli.command {
        Some(Commands::Put {
            id,
            label,
            fields,
            json,
        }) => {
            let args = PutArgs {
                id,
                label,
                fields,
                owner: subject,
            };
            run_put(args, json, &db_path).await?;
        }
        Some(Commands::Get { id, json }) => run_get(&id, json, &db_path).await?,
        Some(Commands::List { limit, json }) => run_list(limit, json, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Label { id, label }) => run_label(&id, &label, &db_path).await?,
        Some(Commands::Current { id, clear }) => {
            run_current(id.as_deref(), clear, &db_path).await?;
        }
        Some(Commands::Outbox { dead, json }) => run_outbox(dead, json, &db_path).await?,
        Some(Commands::PurgeDead) => run_purge_dead(&db_path).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path).await?,
        Some(Commands::Sync { watch }) => run_sync(subject.as_deref(), watch, &db_path).await?,
        Some(Commands::Invite { command }) => match command {
            InviteCommands::Create { id } => {
                run_invite_create(&id, subject.as_deref(), &db_path).await?;
            }
            InviteCommands::Redeem { code } => {
                run_invite_redeem(&code, subject.as_deref(), &db_path).await?;
            }
        },
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            Cli::command().print_help().map_err(CliError::Io)?;
            println!();
        }
    }

    Ok(())
}
