//! Entity record model shared by every synced table

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identity key of a record, unique within its table.
///
/// Locally created ids are UUID v7 (time-sortable); ids received from the
/// remote store are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an id read back from storage without re-validating it
    pub(crate) const fn from_raw(value: String) -> Self {
        Self(value)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("record id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Owning-user key. All local and sync state is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) const fn from_raw(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("user id cannot be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Tables kept in sync between the local store and the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTable {
    Sessions,
    Templates,
    Schedules,
    CustomDefinitions,
    PhysiologicalLogs,
    Preferences,
    CategoryStatuses,
    Notifications,
}

impl SyncTable {
    pub const ALL: [Self; 8] = [
        Self::Sessions,
        Self::Templates,
        Self::Schedules,
        Self::CustomDefinitions,
        Self::PhysiologicalLogs,
        Self::Preferences,
        Self::CategoryStatuses,
        Self::Notifications,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Templates => "templates",
            Self::Schedules => "schedules",
            Self::CustomDefinitions => "custom_definitions",
            Self::PhysiologicalLogs => "physiological_logs",
            Self::Preferences => "preferences",
            Self::CategoryStatuses => "category_statuses",
            Self::Notifications => "notifications",
        }
    }

    /// Data field holding the per-user natural key, if the table has one.
    ///
    /// At most one live record per (user, natural key) may exist.
    pub const fn natural_key_field(self) -> Option<&'static str> {
        match self {
            Self::Preferences => Some("key"),
            Self::PhysiologicalLogs => Some("date"),
            Self::CategoryStatuses => Some("category"),
            _ => None,
        }
    }

    /// Extract and validate the natural key from a record payload.
    pub fn natural_key(self, data: &Value) -> Result<Option<String>> {
        let Some(field) = self.natural_key_field() else {
            return Ok(None);
        };

        let value = data
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "{} records require a non-empty `{field}` field",
                    self.as_str()
                ))
            })?;

        if self == Self::PhysiologicalLogs {
            let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
                Error::InvalidInput(format!("`date` must be YYYY-MM-DD, got `{value}`"))
            })?;
            return Ok(Some(date.format("%Y-%m-%d").to_string()));
        }

        Ok(Some(value.to_string()))
    }
}

impl fmt::Display for SyncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|table| table.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown table `{s}`")))
    }
}

/// A synced record. Every table shares this shape; table-specific fields
/// live in `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: RecordId,
    pub user_id: UserId,
    /// Starts at 1, incremented exactly once per accepted mutation
    pub version: i64,
    /// Tombstone marker; set instead of physically removing the row
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl EntityRecord {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether two copies of a record carry the same synced state.
    ///
    /// `updated_at` is bookkeeping of the writer and not compared.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.version == other.version
            && self.deleted_at == other.deleted_at
            && self.data == other.data
    }

    /// Structural validation applied to both local writes and pulled records.
    pub fn validate(&self, table: SyncTable) -> Result<()> {
        if self.version < 1 {
            return Err(Error::InvalidInput(format!(
                "record {} has invalid version {}",
                self.id, self.version
            )));
        }
        if !self.data.is_object() {
            return Err(Error::InvalidInput(format!(
                "record {} payload must be a JSON object",
                self.id
            )));
        }
        if !self.is_deleted() {
            table.natural_key(&self.data)?;
        }
        Ok(())
    }
}

/// Input to a local write: the value the application wants stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    /// Target record; `None` creates a record (or, on natural-key tables,
    /// updates the live record holding the same key)
    pub id: Option<RecordId>,
    pub user_id: UserId,
    pub data: Value,
}

impl RecordDraft {
    #[must_use]
    pub const fn new(user_id: UserId, data: Value) -> Self {
        Self {
            id: None,
            user_id,
            data,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> UserId {
        "user-1".parse().unwrap()
    }

    #[test]
    fn test_record_id_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn test_user_id_rejects_blank() {
        assert!("  ".parse::<UserId>().is_err());
        assert_eq!("  alice ".parse::<UserId>().unwrap().as_str(), "alice");
    }

    #[test]
    fn test_table_parse_round_trip() {
        for table in SyncTable::ALL {
            assert_eq!(table.as_str().parse::<SyncTable>().unwrap(), table);
        }
        assert_eq!(
            "Physiological-Logs".parse::<SyncTable>().unwrap(),
            SyncTable::PhysiologicalLogs
        );
        assert!("workouts".parse::<SyncTable>().is_err());
    }

    #[test]
    fn test_natural_key_extraction() {
        let key = SyncTable::Preferences
            .natural_key(&json!({"key": " units ", "value": "metric"}))
            .unwrap();
        assert_eq!(key.as_deref(), Some("units"));

        assert!(SyncTable::Preferences
            .natural_key(&json!({"value": "metric"}))
            .is_err());
        assert_eq!(
            SyncTable::Sessions.natural_key(&json!({})).unwrap(),
            None
        );
    }

    #[test]
    fn test_physiological_log_date_validated() {
        assert!(SyncTable::PhysiologicalLogs
            .natural_key(&json!({"date": "2026-02-30"}))
            .is_err());
        assert_eq!(
            SyncTable::PhysiologicalLogs
                .natural_key(&json!({"date": "2026-03-01"}))
                .unwrap()
                .as_deref(),
            Some("2026-03-01")
        );
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let now = crate::util::now();
        let record = EntityRecord {
            id: RecordId::new(),
            user_id: user(),
            version: 1,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            data: json!({"name": "Leg day"}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("deletedAt").is_some());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_same_state_ignores_updated_at() {
        let now = crate::util::now();
        let record = EntityRecord {
            id: RecordId::new(),
            user_id: user(),
            version: 2,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            data: json!({"name": "Push"}),
        };
        let mut other = record.clone();
        other.updated_at = now + chrono::Duration::seconds(5);
        assert!(record.same_state(&other));

        other.version = 3;
        assert!(!record.same_state(&other));
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let now = crate::util::now();
        let record = EntityRecord {
            id: RecordId::new(),
            user_id: user(),
            version: 1,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            data: json!("just a string"),
        };
        assert!(record.validate(SyncTable::Sessions).is_err());
    }
}
