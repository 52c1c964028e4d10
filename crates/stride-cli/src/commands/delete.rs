use std::path::Path;

use stride_core::SyncTable;

use super::common::{open_store, parse_record_id};
use crate::error::CliError;

pub async fn run_delete(table: SyncTable, id: &str, db_path: &Path) -> Result<(), CliError> {
    let record_id = parse_record_id(id)?;
    let store = open_store(db_path)?;
    let outcome = store.soft_delete(table, &record_id).await?;
    println!("Deleted {table}/{record_id} (v{})", outcome.version);
    Ok(())
}
