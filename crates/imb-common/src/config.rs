use serde::Deserialize;

use crate::error::GatewayResult;

/// Top-level application configuration.
/// Loaded from an optional config file and environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// WebSocket port (default: 8767)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log level used when `RUST_LOG` is unset (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deployment label; `production` switches logs to JSON lines
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Seconds between server pings to registered clients, 0 disables (default: 30)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Number of recent diagnostic events kept in memory (default: 1000)
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            environment: default_environment(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl AppConfig {
    /// Load config from an optional `config.{json,toml,yaml}` file in the
    /// working directory, overridden by `GATEWAY__SECTION__KEY` variables.
    pub fn load() -> GatewayResult<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8767
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_environment() -> String {
    "production".to_string()
}
fn default_heartbeat_interval() -> u64 {
    30
}
fn default_diagnostics_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8767);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.heartbeat_interval_secs, 30);
        assert_eq!(config.server.diagnostics_capacity, 1000);
        assert!(config.server.is_production());
    }

    #[test]
    fn test_partial_source_fills_defaults() {
        let cfg = config::Config::builder()
            .set_override("server.port", 9100)
            .unwrap()
            .set_override("server.environment", "development")
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = cfg.try_deserialize().unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.log_level, "info");
        assert!(!config.server.is_production());
    }
}
