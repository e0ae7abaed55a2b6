use serde::Deserialize;
use std::path::Path;

use crate::json::SerializeFlags;

/// Top-level config loaded from `sysdb.toml`, with `SYSDB_BIND_ADDR` /
/// `SYSDB_LOG` environment overrides applied on top (§10.3).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SysDbConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub serializer: SerializerConfig,
}

impl Default for SysDbConfig {
    fn default() -> Self {
        SysDbConfig {
            bind_addr: default_bind_addr(),
            log_filter: default_log_filter(),
            serializer: SerializerConfig::default(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_filter() -> String {
    "sysdb=debug,tower_http=debug".to_string()
}

/// Which child collections `tojson` omits by default when a request doesn't
/// say otherwise.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SerializerConfig {
    pub skip_attributes: bool,
    pub skip_metrics: bool,
    pub skip_services: bool,
}

impl SerializerConfig {
    pub fn flags(&self) -> SerializeFlags {
        let mut flags = SerializeFlags::NONE;
        if self.skip_attributes {
            flags = flags | SerializeFlags::SKIP_ATTRIBUTES;
        }
        if self.skip_metrics {
            flags = flags | SerializeFlags::SKIP_METRICS;
        }
        if self.skip_services {
            flags = flags | SerializeFlags::SKIP_SERVICES;
        }
        flags
    }
}

impl SysDbConfig {
    /// Load config from a TOML file (defaults if the file doesn't exist),
    /// then apply environment variable overrides on top — `SYSDB_BIND_ADDR`
    /// and `SYSDB_LOG` (§10.3), the same `std::env::var` override-on-top-of-
    /// config-file shape the teacher's own `main.rs` uses for `CLICKHOUSE_URL`
    /// and friends.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            Self::default()
        } else {
            let contents = std::fs::read_to_string(path)?;
            let config: SysDbConfig = toml::from_str(&contents)?;
            tracing::info!("loaded config from {}", path.display());
            config
        };
        config.apply_env_overrides(std::env::var("SYSDB_BIND_ADDR").ok(), std::env::var("SYSDB_LOG").ok());
        Ok(config)
    }

    fn apply_env_overrides(&mut self, bind_addr: Option<String>, log_filter: Option<String>) {
        if let Some(bind_addr) = bind_addr {
            tracing::info!("SYSDB_BIND_ADDR overrides bind_addr: {bind_addr}");
            self.bind_addr = bind_addr;
        }
        if let Some(log_filter) = log_filter {
            tracing::info!("SYSDB_LOG overrides log_filter: {log_filter}");
            self.log_filter = log_filter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_absent() {
        let config = SysDbConfig::load("/nonexistent/sysdb.toml").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(!config.serializer.skip_attributes);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: SysDbConfig = toml::from_str(r#"bind_addr = "127.0.0.1:9000""#).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.log_filter, default_log_filter());
    }

    #[test]
    fn env_overrides_apply_on_top_of_file_values() {
        let mut config = SysDbConfig::default();
        config.apply_env_overrides(Some("127.0.0.1:1234".to_string()), Some("sysdb=trace".to_string()));
        assert_eq!(config.bind_addr, "127.0.0.1:1234");
        assert_eq!(config.log_filter, "sysdb=trace");
    }

    #[test]
    fn absent_env_overrides_leave_config_untouched() {
        let mut config = SysDbConfig::default();
        config.apply_env_overrides(None, None);
        assert_eq!(config.bind_addr, default_bind_addr());
        assert_eq!(config.log_filter, default_log_filter());
    }
}
