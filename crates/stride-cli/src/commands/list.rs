use std::path::Path;

use stride_core::db::ListFilter;
use stride_core::{SyncTable, UserId};

use super::common::{format_record_lines, open_store, record_to_list_item};
use crate::error::CliError;

pub async fn run_list(
    table: SyncTable,
    limit: usize,
    include_deleted: bool,
    as_json: bool,
    user: &UserId,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let filter = ListFilter {
        include_deleted,
        limit: Some(limit),
        ..ListFilter::default()
    };
    let records = store.list(table, user, &filter).await?;

    if as_json {
        let items = records.iter().map(record_to_list_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {table} records found.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
