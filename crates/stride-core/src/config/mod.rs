//! Sync configuration.
//!
//! A JSON config file selects the remote store and tunes the sync engine.
//! Environment variables override file values so deployments can inject
//! credentials without writing them to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SyncTable;
use crate::sync::{HttpRemote, RemoteEndpoint, RetryPolicy, SqliteRemote};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_REMOTE_URL: &str = "STRIDE_REMOTE_URL";
pub const ENV_API_TOKEN: &str = "STRIDE_API_TOKEN";
pub const ENV_REMOTE_DB: &str = "STRIDE_REMOTE_DB";
pub const ENV_MAX_ATTEMPTS: &str = "STRIDE_MAX_ATTEMPTS";
pub const ENV_USER: &str = "STRIDE_USER";

/// Tuning of the sync engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Attempts per remote call, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pending mutations sent per push request
    pub push_batch_size: usize,
    /// Pull pages fetched per table and cycle
    pub max_pull_pages: usize,
    pub request_timeout_secs: u64,
    /// Age after which a `syncing` bookkeeping row counts as abandoned
    pub stale_cycle_secs: u64,
    /// Tables included in a cycle
    pub tables: Vec<SyncTable>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
            push_batch_size: 100,
            max_pull_pages: 50,
            request_timeout_secs: 15,
            stale_cycle_secs: 600,
            tables: SyncTable::ALL.to_vec(),
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn stale_cycle_after(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.stale_cycle_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        chrono::Duration::seconds(seconds)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.push_batch_size == 0 || self.max_pull_pages == 0 {
            return Err(Error::InvalidInput(
                "push_batch_size and max_pull_pages must be at least 1".to_string(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::InvalidInput(
                "base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.tables.is_empty() {
            return Err(Error::InvalidInput(
                "at least one table must be synced".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the shared remote store lives
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum RemoteTarget {
    Http {
        base_url: String,
        #[serde(default)]
        api_token: Option<String>,
    },
    /// A `SQLite` file shared by several local profiles on one machine
    Sqlite { path: PathBuf },
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                base_url,
                api_token,
            } => formatter
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_token", &api_token.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            Self::Sqlite { path } => formatter.debug_struct("Sqlite").field("path", path).finish(),
        }
    }
}

impl RemoteTarget {
    /// Build the endpoint client for this target
    pub fn connect(&self, settings: &SyncSettings) -> Result<Arc<dyn RemoteEndpoint>> {
        match self {
            Self::Http {
                base_url,
                api_token,
            } => {
                let remote =
                    HttpRemote::new(base_url.clone(), api_token.clone(), settings.request_timeout())?;
                Ok(Arc::new(remote))
            }
            Self::Sqlite { path } => Ok(Arc::new(SqliteRemote::open(path)?)),
        }
    }

    /// Short description for status output
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Http { base_url, .. } => base_url.clone(),
            Self::Sqlite { path } => format!("sqlite:{}", path.display()),
        }
    }
}

/// Contents of `config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StrideConfig {
    /// Default user when none is given on the command line
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub remote: Option<RemoteTarget>,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl StrideConfig {
    /// Load a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.sync.validate()?;
        Ok(config)
    }

    /// Apply overrides read through `lookup` (normally `std::env::var`)
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &str| normalize_text_option(lookup(name));

        if let Some(base_url) = read(ENV_REMOTE_URL) {
            if !is_http_url(&base_url) {
                return Err(Error::InvalidInput(format!(
                    "{ENV_REMOTE_URL} must include http:// or https://"
                )));
            }
            let inherited_token = match &self.remote {
                Some(RemoteTarget::Http { api_token, .. }) => api_token.clone(),
                _ => None,
            };
            self.remote = Some(RemoteTarget::Http {
                base_url,
                api_token: read(ENV_API_TOKEN).or(inherited_token),
            });
        } else if let Some(path) = read(ENV_REMOTE_DB) {
            self.remote = Some(RemoteTarget::Sqlite {
                path: PathBuf::from(path),
            });
        } else if let (Some(token), Some(RemoteTarget::Http { api_token, .. })) =
            (read(ENV_API_TOKEN), self.remote.as_mut())
        {
            *api_token = Some(token);
        }

        if let Some(raw) = read(ENV_MAX_ATTEMPTS) {
            self.sync.max_attempts = raw.parse().map_err(|_| {
                Error::InvalidInput(format!("{ENV_MAX_ATTEMPTS} must be a positive integer"))
            })?;
        }
        if let Some(user) = read(ENV_USER) {
            self.user_id = Some(user);
        }

        self.sync.validate()?;
        Ok(self)
    }
}
