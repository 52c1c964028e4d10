use std::path::Path;

use stride_core::models::RecordDraft;
use stride_core::{SyncTable, UserId};

use super::common::{open_store, parse_payload, parse_record_id};
use crate::error::CliError;

pub async fn run_put(
    table: SyncTable,
    data: &str,
    id: Option<&str>,
    as_json: bool,
    user: &UserId,
    db_path: &Path,
) -> Result<(), CliError> {
    let payload = parse_payload(data)?;
    let mut draft = RecordDraft::new(user.clone(), payload);
    if let Some(id) = id {
        draft = draft.with_id(parse_record_id(id)?);
    }

    let store = open_store(db_path)?;
    let outcome = store.put(table, draft).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome.record)?);
    } else {
        println!("Saved {table}/{} (v{})", outcome.record.id, outcome.version);
    }
    Ok(())
}
