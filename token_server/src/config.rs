//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::net::SocketAddr;
use token_ledger::{
    EntitlementConfig, GateConfig, LedgerConfig, db::DatabaseConfig,
};

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Where balances and entitlements live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local stores; state is lost on restart
    Memory,
}

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    pub storage: StorageBackend,
    /// Database configuration, unused with `StorageBackend::Memory`
    pub database: DatabaseConfig,
    /// Prometheus scrape address, exporter disabled when unset
    pub metrics_bind: Option<SocketAddr>,
    pub ledger: LedgerConfig,
    pub entitlement: EntitlementConfig,
    pub gate: GateConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    /// * `memory` - Use in-memory stores (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if an address variable is set but cannot be parsed
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
        memory: bool,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_addr_env("SERVER_BIND")?.unwrap_or_else(default_bind),
        };

        let mut database = DatabaseConfig::from_env();
        if let Some(database_url) = database_url_override {
            database.database_url = database_url;
        }

        let memory_env = std::env::var("LEDGER_STORAGE")
            .map(|value| value.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);
        let storage = if memory || memory_env {
            StorageBackend::Memory
        } else {
            StorageBackend::Postgres
        };

        Ok(ServerConfig {
            bind,
            storage,
            database,
            metrics_bind: parse_addr_env("METRICS_BIND")?,
            ledger: LedgerConfig::from_env(),
            entitlement: EntitlementConfig::from_env(),
            gate: GateConfig::from_env(),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage == StorageBackend::Postgres {
            if self.database.database_url.is_empty() {
                return Err(ConfigError::MissingRequired {
                    var: "DATABASE_URL".to_string(),
                    hint: "Pass --db-url or run with --memory".to_string(),
                });
            }

            if self.database.min_connections > self.database.max_connections {
                return Err(ConfigError::Invalid {
                    var: "DB_MIN_CONNECTIONS".to_string(),
                    reason: format!(
                        "Cannot exceed max connections ({})",
                        self.database.max_connections
                    ),
                });
            }
        }

        if self.ledger.lock_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "LEDGER_LOCK_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.entitlement.free_contacts_per_month < 0 {
            return Err(ConfigError::Invalid {
                var: "FREE_CONTACTS_PER_MONTH".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        // Paid tiers must cost something, or the gate would debit zero
        if self.gate.repeat_contact_cost <= 0 {
            return Err(ConfigError::Invalid {
                var: "CONTACT_REPEAT_COST".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.gate.new_business_cost <= 0 {
            return Err(ConfigError::Invalid {
                var: "CONTACT_NEW_BUSINESS_COST".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        for (level, cost) in self.gate.boost_costs.iter().enumerate() {
            if *cost <= 0 {
                return Err(ConfigError::Invalid {
                    var: format!("BOOST_COST_LEVEL_{}", level + 1),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if self.gate.analytics_cost <= 0 {
            return Err(ConfigError::Invalid {
                var: "ANALYTICS_COST".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Parse an optional socket address variable; set but malformed is an error
fn parse_addr_env(key: &str) -> Result<Option<SocketAddr>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("'{value}' is not an IP:PORT address"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:8080".parse().unwrap(),
            storage: StorageBackend::Postgres,
            database: DatabaseConfig {
                database_url: "postgres://localhost/test".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_secs: 5,
                idle_timeout_secs: 300,
                max_lifetime_secs: 1800,
            },
            metrics_bind: None,
            ledger: LedgerConfig::default(),
            entitlement: EntitlementConfig::default(),
            gate: GateConfig::default(),
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "DATABASE_URL".to_string(),
            hint: "Use --memory".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DATABASE_URL"));
        assert!(msg.contains("Use --memory"));
    }

    #[test]
    fn test_default_bind_matches_constant() {
        assert_eq!(default_bind(), DEFAULT_BIND.parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_cost() {
        let mut config = config();
        config.gate.new_business_cost = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "CONTACT_NEW_BUSINESS_COST"));
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let mut config = config();
        config.database.min_connections = 20;
        assert!(config.validate().is_err());

        // Pool settings are irrelevant in memory mode
        config.storage = StorageBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_boost_level() {
        let mut config = config();
        config.gate.boost_costs[2] = -1;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BOOST_COST_LEVEL_3"));
    }
}
