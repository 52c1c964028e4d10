use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stride_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record payload must be a JSON object: {0}")]
    InvalidPayload(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("No user selected. Pass --user, set STRIDE_USER, or add user_id to the config file.")]
    UserNotConfigured,
    #[error(
        "Sync is not configured. Set STRIDE_REMOTE_URL (with STRIDE_API_TOKEN) or STRIDE_REMOTE_DB, or add a `remote` entry to the config file."
    )]
    SyncNotConfigured,
    #[error("The remote store rejected your credentials ({0}). Re-authenticate and update STRIDE_API_TOKEN.")]
    Reauthenticate(String),
}
