//! Process configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `REPAIRDESK_STORE` | `memory` (`memory` or `postgres`) |
//! | `DATABASE_URL` | required when the store is `postgres` |
//! | `REPAIRDESK_MAX_CONFLICT_RETRIES` | `1` |
//! | `REPAIRDESK_DEFAULT_PAGE_SIZE` | `20`, clamped to `[1, 100]` |

use std::str::FromStr;

use thiserror::Error;

use crate::read_model::MAX_PAGE_SIZE;

pub const STORE_VAR: &str = "REPAIRDESK_STORE";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONFLICT_RETRIES_VAR: &str = "REPAIRDESK_MAX_CONFLICT_RETRIES";
pub const DEFAULT_PAGE_SIZE_VAR: &str = "REPAIRDESK_DEFAULT_PAGE_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when REPAIRDESK_STORE=postgres")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" => Ok(StoreKind::Memory),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            other => Err(format!("unknown store '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub store: StoreKind,
    pub database_url: Option<String>,
    pub max_conflict_retries: u32,
    pub default_page_size: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            database_url: None,
            max_conflict_retries: 1,
            default_page_size: 20,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let store = match get(STORE_VAR) {
            Some(raw) => raw.parse::<StoreKind>().map_err(|reason| ConfigError::Invalid {
                var: STORE_VAR,
                value: raw,
                reason,
            })?,
            None => defaults.store,
        };

        let database_url = get(DATABASE_URL_VAR);
        if store == StoreKind::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing(DATABASE_URL_VAR));
        }

        let max_conflict_retries = match get(MAX_CONFLICT_RETRIES_VAR) {
            Some(raw) => parse_number(MAX_CONFLICT_RETRIES_VAR, raw)?,
            None => defaults.max_conflict_retries,
        };

        let default_page_size = match get(DEFAULT_PAGE_SIZE_VAR) {
            Some(raw) => parse_number::<i64>(DEFAULT_PAGE_SIZE_VAR, raw)?.clamp(1, i64::from(MAX_PAGE_SIZE)) as u32,
            None => defaults.default_page_size,
        };

        Ok(Self {
            store,
            database_url,
            max_conflict_retries,
            default_page_size,
        })
    }
}

fn parse_number<T>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
        value: raw,
    })
}
