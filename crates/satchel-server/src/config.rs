use std::path::Path;

use serde::Deserialize;

/// Server settings, loaded from a YAML file. Every key has a default so
/// a missing file or a partial one still yields a runnable config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Environment name, doubling as the database name.
    pub environment: String,
    pub mongo_host: String,
    pub mongo_user: String,
    pub mongo_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            environment: "development".to_string(),
            mongo_host: "localhost".to_string(),
            mongo_user: String::new(),
            mongo_password: String::new(),
        }
    }
}

impl Config {
    /// Read settings from `path`. A missing or unparsable file logs a
    /// warning and runs on the defaults; keys absent from a parsable
    /// file fall back individually.
    pub fn load(path: &Path) -> Config {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot read config file, using default settings");
                return Config::default();
            }
        };
        match serde_yaml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot parse config file, using default settings");
                Config::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_per_key() {
        let config: Config = serde_yaml::from_str("port: 9100\nmongoHost: mongo.internal\n").unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.mongo_host, "mongo.internal");
        assert_eq!(config.environment, "development");
        assert_eq!(config.mongo_user, "");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.yml"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, "development");
    }
}
