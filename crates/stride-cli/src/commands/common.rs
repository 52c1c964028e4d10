use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use stride_core::config::StrideConfig;
use stride_core::db::LocalStore;
use stride_core::models::SyncBookkeeping;
use stride_core::{EntityRecord, RecordId, UserId};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub version: i64,
    pub preview: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub deleted: bool,
    pub data: Value,
}

pub fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open(db_path)?)
}

pub fn load_config(config_path: &Path) -> Result<StrideConfig, CliError> {
    Ok(StrideConfig::load(config_path)?.apply_env(|name| env::var(name).ok())?)
}

/// The `--user` flag wins over `STRIDE_USER` and the config file
pub fn resolve_user(cli_user: Option<&str>, config: &StrideConfig) -> Result<UserId, CliError> {
    let raw = cli_user
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| config.user_id.clone())
        .ok_or(CliError::UserNotConfigured)?;
    Ok(raw.parse()?)
}

pub fn parse_record_id(raw: &str) -> Result<RecordId, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    Ok(trimmed.parse()?)
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload(format!(
            "expected an object, got {}",
            json_kind(&value)
        )))
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub fn record_preview(record: &EntityRecord, max_chars: usize) -> String {
    let compact = record.data.to_string();
    if compact.chars().count() <= max_chars {
        return compact;
    }
    let mut preview = compact
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    preview.push_str("...");
    preview
}

pub fn format_record_lines(records: &[EntityRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let version = format!("v{}", record.version);
            let preview = record_preview(record, 48);
            let relative_time = format_relative_time(record.updated_at.timestamp_millis(), now_ms);

            if record.deleted_at.is_some() {
                format!("{short_id:<13}  {version:<5}  {preview:<48}  {relative_time:<10}  [deleted]")
            } else {
                format!("{short_id:<13}  {version:<5}  {preview:<48}  {relative_time}")
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &EntityRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    let updated_at = record.updated_at.timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        version: record.version,
        preview: record_preview(record, 48),
        updated_at,
        relative_time: format_relative_time(updated_at, now_ms),
        deleted: record.deleted_at.is_some(),
        data: record.data.clone(),
    }
}

pub fn format_bookkeeping_line(bookkeeping: &SyncBookkeeping, now_ms: i64) -> String {
    let last_sync = bookkeeping.last_sync_at.map_or_else(
        || "never".to_string(),
        |at| format_relative_time(at.timestamp_millis(), now_ms),
    );
    let records = bookkeeping
        .record_count
        .map_or_else(|| "-".to_string(), |count| count.to_string());

    format!(
        "{:<20}  {:<8}  last sync {:<10}  records {:<6}  conflicts {}",
        bookkeeping.table_name.as_str(),
        bookkeeping.sync_status.as_str(),
        last_sync,
        records,
        bookkeeping.conflict_count
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STRIDE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stride")
        .join("stride.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config
        .or_else(|| env::var_os("STRIDE_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stride")
        .join("config.json")
}
