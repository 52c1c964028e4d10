//! stride - Command-line interface for Stride

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::{load_config, resolve_config_path, resolve_db_path, resolve_user};
use crate::commands::{run_delete, run_get, run_list, run_put, run_status, run_sync};
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

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stride=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config = load_config(&resolve_config_path(cli.config))?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Put {
            table,
            data,
            id,
            json,
        } => {
            let user = resolve_user(user, &config)?;
            run_put(table, &data, id.as_deref(), json, &user, &db_path).await?;
        }
        Commands::Get { table, id } => run_get(table, &id, &db_path).await?,
        Commands::List {
            table,
            limit,
            include_deleted,
            json,
        } => {
            let user = resolve_user(user, &config)?;
            run_list(table, limit, include_deleted, json, &user, &db_path).await?;
        }
        Commands::Delete { table, id } => run_delete(table, &id, &db_path).await?,
        Commands::Sync { direction, json } => {
            let user = resolve_user(user, &config)?;
            run_sync(direction.into(), json, &user, &config, &db_path).await?;
        }
        Commands::Status { json } => {
            let user = resolve_user(user, &config)?;
            run_status(json, &user, &config, &db_path).await?;
        }
    }

    Ok(())
}
