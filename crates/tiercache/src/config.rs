//! Cache engine configuration.

use crate::error::{CacheError, CacheResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Configuration for the cache engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Instance name used to namespace remote keys.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Remote store configuration. `None` runs the engine local-only.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            remote: None,
        }
    }
}

fn default_instance_name() -> String {
    "tiercache".to_string()
}

/// Remote (Redis) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Redis URLs. One entry is a single node, several entries a cluster.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Connection pool size (single node only).
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Logical database index, used to build keyspace channel names.
    #[serde(default)]
    pub database: i64,

    /// Value written to `notify-keyspace-events` before the first subscription.
    #[serde(default = "default_notify_keyspace_events")]
    pub notify_keyspace_events: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
            database: 0,
            notify_keyspace_events: default_notify_keyspace_events(),
        }
    }
}

fn default_endpoints() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}

fn default_pool_size() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_notify_keyspace_events() -> String {
    // keyspace channel; string, hash, generic and expired events
    "K$hgx".to_string()
}

impl RemoteConfig {
    /// Returns true when more than one endpoint is configured.
    pub fn is_cluster(&self) -> bool {
        self.endpoints.len() > 1
    }

    /// Returns connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl CacheConfig {
    /// Local-only configuration with the given instance name.
    pub fn local(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            remote: None,
        }
    }

    /// Single-node configuration.
    pub fn single(instance_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            remote: Some(RemoteConfig {
                endpoints: vec![url.into()],
                ..RemoteConfig::default()
            }),
        }
    }

    /// Cluster configuration.
    pub fn cluster(instance_name: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            remote: Some(RemoteConfig {
                endpoints: urls,
                ..RemoteConfig::default()
            }),
        }
    }

    /// Remote configuration if at least one endpoint is set.
    pub fn active_remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref().filter(|r| !r.endpoints.is_empty())
    }

    /// Load configuration from `.env` and `TIERCACHE__*` environment variables.
    ///
    /// Nested fields use `__` as separator, e.g. `TIERCACHE__REMOTE__ENDPOINTS`
    /// takes a comma separated list.
    pub fn from_env() -> CacheResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let config = Config::builder()
            .add_source(Self::environment())
            .build()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        Self::finish(config)
    }

    /// Load configuration from a TOML file, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        debug!("Loading cache config from: {}", path.display());

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Self::environment())
            .build()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        Self::finish(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("TIERCACHE")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("remote.endpoints")
            .try_parsing(true)
    }

    fn finish(config: Config) -> CacheResult<Self> {
        let cache_config: CacheConfig = config
            .try_deserialize()
            .map_err(|e| CacheError::Configuration(e.to_string()))?;

        cache_config.validate()?;
        Ok(cache_config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CacheResult<()> {
        if self.instance_name.trim().is_empty() {
            return Err(CacheError::Configuration(
                "Instance name must not be empty".to_string(),
            ));
        }

        if let Some(remote) = self.active_remote() {
            if remote.pool_size == 0 {
                return Err(CacheError::Configuration(
                    "Pool size must be greater than zero".to_string(),
                ));
            }

            for endpoint in &remote.endpoints {
                if !endpoint.starts_with("redis://") && !endpoint.starts_with("rediss://") {
                    return Err(CacheError::Configuration(format!(
                        "Invalid Redis endpoint: {}",
                        endpoint
                    )));
                }
            }

            if remote.is_cluster() && remote.database != 0 {
                return Err(CacheError::Configuration(
                    "Cluster mode only supports database 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_local() {
        let config = CacheConfig::default();
        assert_eq!(config.instance_name, "tiercache");
        assert!(config.active_remote().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_and_cluster() {
        let single = CacheConfig::single("app", "redis://127.0.0.1:6379");
        assert!(!single.active_remote().unwrap().is_cluster());

        let cluster = CacheConfig::cluster(
            "app",
            vec![
                "redis://10.0.0.1:7000".to_string(),
                "redis://10.0.0.2:7000".to_string(),
            ],
        );
        assert!(cluster.active_remote().unwrap().is_cluster());
    }

    #[test]
    fn test_empty_endpoints_degrade_to_local() {
        let config = CacheConfig::cluster("app", Vec::new());
        assert!(config.active_remote().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CacheConfig::local("  ").validate().is_err());

        let bad_scheme = CacheConfig::single("app", "http://localhost:6379");
        assert!(bad_scheme.validate().is_err());

        let mut zero_pool = CacheConfig::single("app", "redis://localhost:6379");
        zero_pool.remote.as_mut().unwrap().pool_size = 0;
        assert!(zero_pool.validate().is_err());

        let mut cluster_db = CacheConfig::cluster(
            "app",
            vec![
                "redis://10.0.0.1:7000".to_string(),
                "redis://10.0.0.2:7000".to_string(),
            ],
        );
        cluster_db.remote.as_mut().unwrap().database = 1;
        assert!(cluster_db.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
instance_name = "orders"

[remote]
endpoints = ["redis://cache-1:6379"]
database = 2
"#
        )
        .unwrap();

        let config = CacheConfig::from_file(file.path()).unwrap();
        assert_eq!(config.instance_name, "orders");
        let remote = config.active_remote().unwrap();
        assert_eq!(remote.endpoints, vec!["redis://cache-1:6379".to_string()]);
        assert_eq!(remote.database, 2);
        assert_eq!(remote.pool_size, 10);
        assert_eq!(remote.notify_keyspace_events, "K$hgx");
    }
}
