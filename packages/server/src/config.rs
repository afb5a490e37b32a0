//! Server configuration from environment variables.

use std::sync::Arc;

use sigor_database::{MemoryStore, SqlStore, Store, db, feed::DEFAULT_FEED_CAPACITY, run_migrations};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {name} value '{value}'")]
    Invalid {
        /// Environment variable name.
        name: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Which store backend to run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StoreKind {
    /// PostgreSQL at `DATABASE_URL`.
    #[default]
    Postgres,
    /// A self-contained in-process store; state is lost on exit.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub store: StoreKind,
    /// Change-feed buffer per subscriber.
    pub feed_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            store: StoreKind::default(),
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Reads `BIND_ADDR`, `PORT`, `SIGOR_STORE` and `SIGOR_FEED_CAPACITY`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Invalid`] if a variable is set to an unparseable
    ///   value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            store: parse(&lookup, "SIGOR_STORE")?.unwrap_or(defaults.store),
            feed_capacity: parse(&lookup, "SIGOR_FEED_CAPACITY")?
                .filter(|&capacity| capacity > 0)
                .unwrap_or(defaults.feed_capacity),
        })
    }

    /// Opens the configured store. PostgreSQL connects through
    /// `DATABASE_URL` and applies pending migrations first.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn open_store(&self) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
        match self.store {
            StoreKind::Memory => {
                log::warn!("Using the in-memory store; nothing will be persisted");
                Ok(Arc::new(MemoryStore::with_feed_capacity(self.feed_capacity)))
            }
            StoreKind::Postgres => {
                log::info!("Connecting to database...");
                let db_conn = db::connect_from_env().await?;

                log::info!("Running migrations...");
                run_migrations(db_conn.as_ref()).await?;

                Ok(Arc::new(SqlStore::with_feed_capacity(
                    db_conn,
                    self.feed_capacity,
                )))
            }
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: BTreeMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        assert_eq!(config(&[]).unwrap(), ServerConfig::default());
    }

    #[test]
    fn reads_every_variable() {
        let config = config(&[
            ("BIND_ADDR", "0.0.0.0"),
            ("PORT", "9000"),
            ("SIGOR_STORE", "Memory"),
            ("SIGOR_FEED_CAPACITY", "64"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.feed_capacity, 64);
    }

    #[test]
    fn rejects_garbage() {
        let err = config(&[("SIGOR_STORE", "sqlite")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SIGOR_STORE", .. }));

        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
