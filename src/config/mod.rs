//! Configuration management
//!
//! - [`Config`]: the server's TOML file
//! - [`RouteTable`]: upgrade paths and their destinations
//! - [`ClientConfig`]: the client's endpoint and scrambling choice

mod endpoint;
mod routes;

pub use endpoint::{ClientConfig, EndpointError};
pub use routes::{Destination, LineError, RouteError, RouteTable};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
    /// Route table file
    pub routes: PathBuf,
    /// TLS certificate path; with `tls_key`, serves `wss://`
    pub tls_cert: Option<PathBuf>,
    /// TLS key path
    pub tls_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            routes: PathBuf::from("server.conf"),
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_fill_gaps() {
        let config: Config = toml::from_str("[server]\nlisten = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.routes, PathBuf::from("server.conf"));
        assert!(config.server.tls_cert.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nroutes = \"/etc/wstcp/routes.conf\"\ntls_cert = \"cert.pem\"\ntls_key = \"key.pem\"\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.routes, PathBuf::from("/etc/wstcp/routes.conf"));
        assert_eq!(config.server.tls_cert, Some(PathBuf::from("cert.pem")));
        assert_eq!(config.server.tls_key, Some(PathBuf::from("key.pem")));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Config::load("/nonexistent/wstcp.toml"),
            Err(crate::Error::Config(_))
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nlisten = 1").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(crate::Error::Config(_))
        ));
    }
}
