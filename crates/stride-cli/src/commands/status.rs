use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use stride_core::config::StrideConfig;
use stride_core::models::{SyncBookkeeping, SyncStatus};
use stride_core::UserId;

use super::common::{format_bookkeeping_line, format_sync_timestamp, open_store};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub user_id: UserId,
    pub remote: Option<String>,
    pub pending_mutations: usize,
    pub tables: Vec<SyncBookkeeping>,
}

pub async fn load_status(
    user: &UserId,
    config: &StrideConfig,
    db_path: &Path,
) -> Result<StatusSummary, CliError> {
    let store = open_store(db_path)?;
    Ok(StatusSummary {
        user_id: user.clone(),
        remote: config.remote.as_ref().map(|remote| remote.describe()),
        pending_mutations: store.pending_count(user).await?,
        tables: store.bookkeeping(user).await?,
    })
}

pub async fn run_status(
    as_json: bool,
    user: &UserId,
    config: &StrideConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let summary = load_status(user, config, db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Remote: {}",
        summary.remote.as_deref().unwrap_or("not configured")
    );
    println!("Pending changes: {}", summary.pending_mutations);

    if summary.tables.is_empty() {
        println!("Never synced.");
        return Ok(());
    }

    let now_ms = Utc::now().timestamp_millis();
    for bookkeeping in &summary.tables {
        println!("{}", format_bookkeeping_line(bookkeeping, now_ms));
        if bookkeeping.sync_status == SyncStatus::Error {
            if let Some(message) = &bookkeeping.error_message {
                let at = bookkeeping.last_error_at.map_or_else(
                    || "unknown time".to_string(),
                    |at| format_sync_timestamp(at.timestamp_millis()),
                );
                println!("    last error at {at}: {message}");
            }
        }
    }
    Ok(())
}
