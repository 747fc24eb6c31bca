//! Database settings.
//!
//! [`DbConfig`] is the settings contract a relational engine crate
//! consumes to open connections; the in-memory engine ignores the
//! connection fields. Loaded from `config/config.toml` (optional) with
//! `DBX`-prefixed environment variables layered on top.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct DbConfig {
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_db_type")]
    pub db_type: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
}

fn default_db_name() -> String {
    "dbx_dev".to_string()
}

fn default_db_type() -> String {
    "mysql".to_string()
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_max_idle_conns() -> u32 {
    10
}

impl DbConfig {
    /// Load settings from `config/config.toml`, falling back to env vars.
    ///
    /// Environment variables use the `DBX` prefix (`DBX_PORT=3307`);
    /// nested keys separate with `__`.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/config.toml").required(false))
            .add_source(Environment::with_prefix("DBX").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // An unreadable file falls back to env-only sources.
                if std::path::Path::new("config/config.toml").exists() {
                    log::warn!("failed to load config file, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix("DBX").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "failed to load configuration from file ({err}) and env ({env_err})"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<DbConfig>()
    }

    /// MySQL-style DSN for the configured database.
    pub fn dsn(&self) -> String {
        format!(
            "{}:{}@tcp({}:{})/{}?charset=utf8&parseTime=True&loc=Local",
            self.user, self.password, self.ip, self.port, self.db_name
        )
    }
}
