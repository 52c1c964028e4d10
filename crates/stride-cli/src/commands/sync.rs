use std::path::Path;

use stride_core::config::StrideConfig;
use stride_core::sync::{SyncCoordinator, SyncDirection, SyncError, SyncReport};
use stride_core::UserId;

use super::common::{format_sync_timestamp, open_store};
use crate::error::CliError;

pub async fn run_sync(
    direction: SyncDirection,
    as_json: bool,
    user: &UserId,
    config: &StrideConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let coordinator = build_coordinator(config, db_path)?;

    let report = match coordinator.sync(user, direction).await {
        Ok(report) => report,
        Err(error) => {
            eprintln!("Warning: sync did not complete: {error}");
            return Ok(());
        }
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }

    if let Some(message) = auth_failure(&report) {
        return Err(CliError::Reauthenticate(message));
    }
    for warning in report.warnings() {
        eprintln!("Warning: {warning}");
    }
    Ok(())
}

pub fn build_coordinator(
    config: &StrideConfig,
    db_path: &Path,
) -> Result<SyncCoordinator, CliError> {
    let remote = config
        .remote
        .as_ref()
        .ok_or(CliError::SyncNotConfigured)?
        .connect(&config.sync)?;
    let store = open_store(db_path)?;
    Ok(SyncCoordinator::new(store, remote, config.sync.clone()))
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync {} ({}) finished at {}",
        report.status(),
        report.direction,
        format_sync_timestamp(report.finished_at.timestamp_millis())
    )];
    lines.extend(report.tables.iter().map(|table| {
        format!(
            "  {:<20}  {:<8}  pushed {:<4}  pulled {:<4}  conflicts {}",
            table.table.as_str(),
            table.status.as_str(),
            table.pushed,
            table.pulled,
            table.conflicts
        )
    }));
    lines
}

fn auth_failure(report: &SyncReport) -> Option<String> {
    report.tables.iter().find_map(|table| match &table.error {
        Some(SyncError::Auth(message)) => Some(message.clone()),
        _ => None,
    })
}
