//! Configuration management for the server.

use agency_sync::{CacheConfig, SyncConfig, DEFAULT_HISTORY_LIMIT};
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Single-entity cache timing
    pub entity_cache: CacheConfig,
    /// Collection listing cache timing
    pub list_cache: CacheConfig,
    /// Ledger entries kept per record
    pub history_limit: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let refresh_timeout = secs(&lookup, "REFRESH_TIMEOUT_SECS", CacheConfig::entity().refresh_timeout)?;

        let entity_cache = cache_config(&lookup, "ENTITY", CacheConfig::entity())?
            .with_refresh_timeout(refresh_timeout);
        let list_cache = cache_config(&lookup, "LIST", CacheConfig::list())?
            .with_refresh_timeout(refresh_timeout);

        let history_limit = match lookup("HISTORY_LIMIT") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or_else(|| ConfigError::InvalidValue("HISTORY_LIMIT".into()))?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            host,
            port,
            database_url,
            entity_cache,
            list_cache,
            history_limit,
        })
    }

    /// Store configuration derived from these settings.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::default()
            .with_entity_cache(self.entity_cache.clone())
            .with_list_cache(self.list_cache.clone())
            .with_history_limit(self.history_limit)
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(default),
    }
}

/// Read `{prefix}_FRESH_TTL_SECS` and `{prefix}_STALE_TTL_SECS` over `defaults`.
fn cache_config(
    lookup: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    defaults: CacheConfig,
) -> Result<CacheConfig, ConfigError> {
    let fresh = secs(lookup, &format!("{prefix}_FRESH_TTL_SECS"), defaults.fresh_ttl)?;
    let stale = secs(lookup, &format!("{prefix}_STALE_TTL_SECS"), defaults.stale_ttl)?;
    if stale < fresh {
        return Err(ConfigError::StaleBeforeFresh(prefix.to_string()));
    }
    Ok(defaults.with_fresh_ttl(fresh).with_stale_ttl(stale))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidValue(String),

    #[error("{0} stale TTL must not be shorter than its fresh TTL")]
    StaleBeforeFresh(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/portal")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.entity_cache, CacheConfig::entity());
        assert_eq!(config.list_cache, CacheConfig::list());
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.sync_config(), SyncConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/portal"),
            ("PORT", "8080"),
            ("ENTITY_FRESH_TTL_SECS", "5"),
            ("ENTITY_STALE_TTL_SECS", "50"),
            ("LIST_FRESH_TTL_SECS", "1"),
            ("REFRESH_TIMEOUT_SECS", "2"),
            ("HISTORY_LIMIT", "25"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.entity_cache.fresh_ttl, Duration::from_secs(5));
        assert_eq!(config.entity_cache.stale_ttl, Duration::from_secs(50));
        assert_eq!(config.entity_cache.refresh_timeout, Duration::from_secs(2));
        assert_eq!(config.list_cache.fresh_ttl, Duration::from_secs(1));
        assert_eq!(config.list_cache.stale_ttl, CacheConfig::list().stale_ttl);
        assert_eq!(config.sync_config().history_limit, 25);
    }

    #[test]
    fn test_missing_database_url() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingDatabaseUrl)));
    }

    #[test]
    fn test_invalid_values() {
        let db = ("DATABASE_URL", "postgres://localhost/portal");
        assert!(matches!(
            load(&[db, ("PORT", "http")]),
            Err(ConfigError::InvalidPort)
        ));
        assert!(matches!(
            load(&[db, ("HISTORY_LIMIT", "0")]),
            Err(ConfigError::InvalidValue(name)) if name == "HISTORY_LIMIT"
        ));
        assert!(matches!(
            load(&[db, ("LIST_STALE_TTL_SECS", "soon")]),
            Err(ConfigError::InvalidValue(name)) if name == "LIST_STALE_TTL_SECS"
        ));
        assert!(matches!(
            load(&[db, ("ENTITY_FRESH_TTL_SECS", "100"), ("ENTITY_STALE_TTL_SECS", "10")]),
            Err(ConfigError::StaleBeforeFresh(prefix)) if prefix == "ENTITY"
        ));
    }
}
