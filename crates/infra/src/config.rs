//! Data-layer configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bookbuddy_core::{AppTable, DataError, DataResult, TenantPolicy};

/// Settings for one data-layer instance.
///
/// | variable | default |
/// |----------|---------|
/// | `BOOKBUDDY_APP_ID` | `bookbuddy` |
/// | `BOOKBUDDY_TENANT_COLUMN` | `app_id` |
/// | `BOOKBUDDY_SHARED_TABLES` | `profiles,apps,achievements` |
/// | `BOOKBUDDY_DEFAULT_PAGE_SIZE` | `10` |
/// | `BOOKBUDDY_CALL_TIMEOUT_MS` | unset |
/// | `DATABASE_URL` | unset |
/// | `BOOKBUDDY_STORAGE_ROOT` | `./storage` |
/// | `BOOKBUDDY_PUBLIC_URL` | `http://localhost:54321/storage/v1/object/public` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub app_id: String,
    pub tenant_column: String,
    pub shared_tables: Vec<String>,
    pub default_page_size: u64,
    pub call_timeout_ms: Option<u64>,
    pub database_url: Option<String>,
    pub storage_root: PathBuf,
    pub public_url: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            app_id: "bookbuddy".to_string(),
            tenant_column: TenantPolicy::DEFAULT_TENANT_COLUMN.to_string(),
            shared_tables: AppTable::shared().map(|t| t.as_str().to_string()).collect(),
            default_page_size: 10,
            call_timeout_ms: None,
            database_url: None,
            storage_root: PathBuf::from("./storage"),
            public_url: "http://localhost:54321/storage/v1/object/public".to_string(),
        }
    }
}

impl DataConfig {
    /// Load from the process environment; unset variables keep their defaults.
    pub fn from_env() -> DataResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> DataResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(app_id) = lookup("BOOKBUDDY_APP_ID") {
            config.app_id = app_id;
        }
        if let Some(column) = lookup("BOOKBUDDY_TENANT_COLUMN") {
            if column.trim().is_empty() {
                return Err(DataError::invalid_options("BOOKBUDDY_TENANT_COLUMN is empty"));
            }
            config.tenant_column = column.trim().to_string();
        }
        if let Some(tables) = lookup("BOOKBUDDY_SHARED_TABLES") {
            config.shared_tables = tables
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(size) = lookup("BOOKBUDDY_DEFAULT_PAGE_SIZE") {
            config.default_page_size = parse_number("BOOKBUDDY_DEFAULT_PAGE_SIZE", &size)?;
        }
        if let Some(ms) = lookup("BOOKBUDDY_CALL_TIMEOUT_MS") {
            config.call_timeout_ms = Some(parse_number("BOOKBUDDY_CALL_TIMEOUT_MS", &ms)?);
        }
        config.database_url = lookup("DATABASE_URL").or(config.database_url);
        if let Some(root) = lookup("BOOKBUDDY_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(root);
        }
        if let Some(url) = lookup("BOOKBUDDY_PUBLIC_URL") {
            config.public_url = url;
        }

        Ok(config)
    }

    pub fn tenant_policy(&self) -> TenantPolicy {
        TenantPolicy::new(self.app_id.as_str())
            .with_tenant_column(self.tenant_column.as_str())
            .with_shared_tables(self.shared_tables.iter().cloned())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number(key: &str, raw: &str) -> DataResult<u64> {
    raw.trim()
        .parse()
        .map_err(|e| DataError::invalid_options(format!("{key}={raw:?}: {e}")))
}
