//! Client configuration.
//!
//! One [`ClientConfig`] carries the addresses and per-attempt timeouts the
//! coordinators and gateways are built from. Every timeout here bounds a
//! single attempt; none of them is a budget for a whole sequence.

use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_ROUTE_ATTEMPTS, DEFAULT_MIGRATION_TIMEOUT, DEFAULT_REPORT_BATCH_SIZE,
    DEFAULT_ROUTE_ATTEMPT_TIMEOUT, DEFAULT_RPC_TIMEOUT,
};
use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Root node to send control-plane calls to.
    pub root_server: Address,
    /// This node's own address, used as reporter and migration source.
    pub self_address: Address,
    /// Timeout for one control-plane call.
    pub rpc_timeout: Duration,
    /// Timeout for one replica attempt during read routing.
    pub route_attempt_timeout: Duration,
    /// Timeout for migration load requests.
    pub migration_timeout: Duration,
    /// Maximum tablets per report batch.
    pub report_batch_size: usize,
    /// Upper bound on replica attempts per read; 0 means the list length.
    pub max_route_attempts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            root_server: Address::new("127.0.0.1", 2500),
            self_address: Address::new("127.0.0.1", 2600),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            route_attempt_timeout: DEFAULT_ROUTE_ATTEMPT_TIMEOUT,
            migration_timeout: DEFAULT_MIGRATION_TIMEOUT,
            report_batch_size: DEFAULT_REPORT_BATCH_SIZE,
            max_route_attempts: DEFAULT_MAX_ROUTE_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TABLETRPC_ROOT_SERVER`: root node as `host:port` (default: 127.0.0.1:2500)
    /// - `TABLETRPC_SELF_ADDRESS`: this node as `host:port` (default: 127.0.0.1:2600)
    /// - `TABLETRPC_RPC_TIMEOUT_MS`: control-plane call timeout (default: 1000)
    /// - `TABLETRPC_ROUTE_TIMEOUT_MS`: per-replica read timeout (default: 500)
    /// - `TABLETRPC_MIGRATION_TIMEOUT_MS`: load request timeout (default: 10000)
    /// - `TABLETRPC_REPORT_BATCH_SIZE`: tablets per report batch (default: 1024)
    /// - `TABLETRPC_MAX_ROUTE_ATTEMPTS`: attempts per read, 0 = all (default: 0)
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let root_server = match std::env::var("TABLETRPC_ROOT_SERVER") {
            Ok(raw) => raw
                .parse::<Address>()
                .map_err(|e| format!("Invalid TABLETRPC_ROOT_SERVER: {}", e))?,
            Err(_) => defaults.root_server,
        };

        let self_address = match std::env::var("TABLETRPC_SELF_ADDRESS") {
            Ok(raw) => raw
                .parse::<Address>()
                .map_err(|e| format!("Invalid TABLETRPC_SELF_ADDRESS: {}", e))?,
            Err(_) => defaults.self_address,
        };

        let rpc_timeout = env_millis("TABLETRPC_RPC_TIMEOUT_MS", defaults.rpc_timeout)?;
        let route_attempt_timeout =
            env_millis("TABLETRPC_ROUTE_TIMEOUT_MS", defaults.route_attempt_timeout)?;
        let migration_timeout =
            env_millis("TABLETRPC_MIGRATION_TIMEOUT_MS", defaults.migration_timeout)?;

        let report_batch_size: usize = std::env::var("TABLETRPC_REPORT_BATCH_SIZE")
            .unwrap_or_else(|_| defaults.report_batch_size.to_string())
            .parse()
            .map_err(|e| format!("Invalid TABLETRPC_REPORT_BATCH_SIZE: {}", e))?;

        let max_route_attempts: usize = std::env::var("TABLETRPC_MAX_ROUTE_ATTEMPTS")
            .unwrap_or_else(|_| defaults.max_route_attempts.to_string())
            .parse()
            .map_err(|e| format!("Invalid TABLETRPC_MAX_ROUTE_ATTEMPTS: {}", e))?;

        Ok(Self {
            root_server,
            self_address,
            rpc_timeout,
            route_attempt_timeout,
            migration_timeout,
            report_batch_size,
            max_route_attempts,
        })
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.root_server.port == 0 {
            errors.push(format!("root_server ({}) must have a port", self.root_server));
        }
        if self.self_address.port == 0 {
            errors.push(format!(
                "self_address ({}) must have a port",
                self.self_address
            ));
        }
        if self.root_server == self.self_address {
            errors.push(format!(
                "self_address ({}) must differ from root_server",
                self.self_address
            ));
        }
        if self.rpc_timeout.is_zero() {
            errors.push("rpc_timeout must be greater than 0".to_string());
        }
        if self.route_attempt_timeout.is_zero() {
            errors.push("route_attempt_timeout must be greater than 0".to_string());
        }
        if self.migration_timeout.is_zero() {
            errors.push("migration_timeout must be greater than 0".to_string());
        }
        if self.migration_timeout < self.rpc_timeout {
            errors.push(format!(
                "migration_timeout ({:?}) must be at least rpc_timeout ({:?})",
                self.migration_timeout, self.rpc_timeout
            ));
        }
        if self.report_batch_size == 0 {
            errors.push("report_batch_size must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// `max_route_attempts` as the router expects it.
    pub fn route_attempt_limit(&self) -> Option<usize> {
        (self.max_route_attempts > 0).then_some(self.max_route_attempts)
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| format!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = ClientConfig {
            rpc_timeout: Duration::ZERO,
            route_attempt_timeout: Duration::ZERO,
            report_batch_size: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("rpc_timeout")));
        assert!(errors.iter().any(|e| e.contains("route_attempt_timeout")));
        assert!(errors.iter().any(|e| e.contains("report_batch_size")));
    }

    #[test]
    fn test_validate_rejects_short_migration_timeout() {
        let config = ClientConfig {
            migration_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("migration_timeout"));
    }

    #[test]
    fn test_validate_rejects_self_as_root() {
        let config = ClientConfig {
            self_address: Address::new("127.0.0.1", 2500),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_route_attempt_limit() {
        assert_eq!(ClientConfig::default().route_attempt_limit(), None);
        let config = ClientConfig {
            max_route_attempts: 2,
            ..Default::default()
        };
        assert_eq!(config.route_attempt_limit(), Some(2));
    }
}
