// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for runtara-fleet.

/// Daemon configuration loaded from environment variables.
///
/// Tick interval and per-state timeouts are loaded separately by
/// [`SchedulerConfig::from_env`](crate::scheduler::SchedulerConfig::from_env)
/// and [`StateTimeouts::from_env`](crate::supervisor::StateTimeouts::from_env).
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL for the deployment and node registries.
    pub database_url: String,
    /// Database connection pool size.
    pub db_pool_size: u32,
    /// Provisioner backend to use. Opaque to the core; the daemon resolves
    /// it, embedders supply their own backend via the runtime builder.
    pub provisioner: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("RUNTARA_FLEET_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("RUNTARA_FLEET_DATABASE_URL"))?;

        let db_pool_size = std::env::var("RUNTARA_FLEET_DB_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let provisioner =
            std::env::var("RUNTARA_FLEET_PROVISIONER").unwrap_or_else(|_| "mock".to_string());

        Ok(Self {
            database_url,
            db_pool_size,
            provisioner,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The requested provisioner backend is not known to the daemon.
    #[error("Unsupported provisioner backend: {0}")]
    UnsupportedProvisioner(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNTARA_FLEET_DATABASE_URL", "postgres://localhost/fleet");
        guard.remove("RUNTARA_FLEET_DB_POOL_SIZE");
        guard.remove("RUNTARA_FLEET_PROVISIONER");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://localhost/fleet");
        assert_eq!(config.db_pool_size, 10);
        assert_eq!(config.provisioner, "mock");
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set(
            "RUNTARA_FLEET_DATABASE_URL",
            "postgres://user:pass@db:5432/prod",
        );
        guard.set("RUNTARA_FLEET_DB_POOL_SIZE", "25");
        guard.set("RUNTARA_FLEET_PROVISIONER", "kubernetes");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "postgres://user:pass@db:5432/prod");
        assert_eq!(config.db_pool_size, 25);
        assert_eq!(config.provisioner, "kubernetes");
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("RUNTARA_FLEET_DATABASE_URL");

        let result = Config::from_env();
        assert!(result.is_err());

        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingEnvVar("RUNTARA_FLEET_DATABASE_URL")
        ));
        assert!(err.to_string().contains("RUNTARA_FLEET_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_pool_size_falls_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("RUNTARA_FLEET_DATABASE_URL", "postgres://localhost/fleet");
        guard.set("RUNTARA_FLEET_DB_POOL_SIZE", "not_a_number");

        let config = Config::from_env().unwrap();
        assert_eq!(config.db_pool_size, 10);
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::MissingEnvVar("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "Missing required environment variable: MY_VAR"
        );

        let unsupported = ConfigError::UnsupportedProvisioner("warp-drive".to_string());
        assert_eq!(
            unsupported.to_string(),
            "Unsupported provisioner backend: warp-drive"
        );
    }
}
