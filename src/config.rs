use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_file() -> PathBuf {
    PathBuf::from("data/invoices.db")
}

fn default_port() -> u16 {
    8787
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
            port: default_port(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Loads `invoicer.{toml,json,yaml}` (optional) and `INVOICER_*` environment
    /// variables, in that order. A `.env` file is honoured when present.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        Config::builder()
            .add_source(File::with_name("invoicer").required(false))
            .add_source(Environment::with_prefix("INVOICER").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sources_fall_back_to_defaults() {
        let cfg: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.port, 8787);
        assert_eq!(cfg.db_file, PathBuf::from("data/invoices.db"));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg: AppConfig = Config::builder()
            .set_override("port", 9000)
            .unwrap()
            .set_override("db_file", "/tmp/x.db")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.db_file, PathBuf::from("/tmp/x.db"));
    }
}
