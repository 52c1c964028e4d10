use std::path::Path;

use stride_core::SyncTable;

use super::common::{open_store, parse_record_id};
use crate::error::CliError;

pub async fn run_get(table: SyncTable, id: &str, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let store = open_store(db_path)?;
    let record = store
        .get(table, &record_id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(format!("{table}/{record_id}")))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
