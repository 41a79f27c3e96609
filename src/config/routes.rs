//! Destination route table
//!
//! One rule per line: an upgrade path and the `host:port` it tunnels to.
//!
//! ```text
//! # path      destination
//! /ssh        localhost:22
//! /db         [::1]:5432
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. A malformed line is
//! skipped with a diagnostic; the rest of the file is still read.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Where a route's sessions are relayed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    host: String,
    port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Why a route line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("need 2 items")]
    FieldCount,

    #[error("no port")]
    NoPort,

    #[error("no host")]
    NoHost,

    #[error("invalid port")]
    InvalidPort,

    #[error("path must begin with /")]
    RelativePath,

    #[error("duplicate path {0}")]
    DuplicatePath(String),
}

/// Route table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Failed to read routes file {path}: {message}")]
    Read { path: String, message: String },

    #[error("parse error in config file line {line}: {kind}")]
    Line { line: usize, kind: LineError },
}

/// Upgrade paths mapped to their destinations
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, Destination>,
    skipped: Vec<RouteError>,
}

impl RouteTable {
    /// Parse route rules, skipping malformed lines
    pub fn parse(text: &str) -> Self {
        let mut table = Self::default();
        for (index, line) in text.lines().enumerate() {
            let line_nr = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let rule = parse_rule(line).and_then(|(path, dest)| {
                if table.routes.contains_key(path) {
                    Err(LineError::DuplicatePath(path.to_string()))
                } else {
                    Ok((path, dest))
                }
            });
            match rule {
                Ok((path, dest)) => {
                    info!("Registered route {} -> {}", path, dest);
                    table.routes.insert(path.to_string(), dest);
                }
                Err(kind) => {
                    let err = RouteError::Line {
                        line: line_nr,
                        kind,
                    };
                    warn!("{}", err);
                    table.skipped.push(err);
                }
            }
        }
        table
    }

    /// Read and parse a routes file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RouteError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::parse(&text))
    }

    /// Destination for an exact upgrade path
    pub fn get(&self, path: &str) -> Option<&Destination> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Diagnostics for every line that was skipped
    pub fn skipped(&self) -> &[RouteError] {
        &self.skipped
    }
}

fn parse_rule(line: &str) -> Result<(&str, Destination), LineError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [path, target] = fields.as_slice() else {
        return Err(LineError::FieldCount);
    };

    let (host, port) = target.rsplit_once(':').ok_or(LineError::NoPort)?;
    if host.is_empty() {
        return Err(LineError::NoHost);
    }
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(LineError::NoHost);
    }
    let port: u16 = port.parse().map_err(|_| LineError::InvalidPort)?;
    if !path.starts_with('/') {
        return Err(LineError::RelativePath);
    }

    Ok((path, Destination::new(host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rules() {
        let table = RouteTable::parse(
            "# tunnels\n\
             \n\
             /ssh   localhost:22\n\
             \t/db\t[::1]:5432  \n",
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("/ssh"), Some(&Destination::new("localhost", 22)));
        assert_eq!(table.get("/db"), Some(&Destination::new("::1", 5432)));
        assert_eq!(table.get("/db").unwrap().to_string(), "[::1]:5432");
        assert_eq!(table.get("/ssh/"), None);
        assert!(table.skipped().is_empty());
    }

    #[test]
    fn test_bad_port_does_not_stop_parsing() {
        let table = RouteTable::parse("/a host:80\n/b host:http\n/c other:81\n");
        assert_eq!(table.len(), 2);
        assert!(table.get("/a").is_some());
        assert!(table.get("/b").is_none());
        assert!(table.get("/c").is_some());
        assert_eq!(
            table.skipped(),
            &[RouteError::Line {
                line: 2,
                kind: LineError::InvalidPort
            }]
        );
        assert_eq!(
            table.skipped()[0].to_string(),
            "parse error in config file line 2: invalid port"
        );
    }

    #[test]
    fn test_line_errors() {
        let cases = [
            ("/only-path", LineError::FieldCount),
            ("/a host:1 extra", LineError::FieldCount),
            ("/a hostonly", LineError::NoPort),
            ("/a :80", LineError::NoHost),
            ("/a []:80", LineError::NoHost),
            ("/a host:", LineError::InvalidPort),
            ("/a host:65536", LineError::InvalidPort),
            ("/a host:-1", LineError::InvalidPort),
            ("a host:80", LineError::RelativePath),
        ];
        for (line, expected) in cases {
            assert_eq!(parse_rule(line).unwrap_err(), expected, "line {:?}", line);
        }
    }

    #[test]
    fn test_duplicate_path_keeps_first() {
        let table = RouteTable::parse("/a first:1\n/a second:2\n");
        assert_eq!(table.get("/a"), Some(&Destination::new("first", 1)));
        assert_eq!(
            table.skipped(),
            &[RouteError::Line {
                line: 2,
                kind: LineError::DuplicatePath("/a".to_string())
            }]
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = RouteTable::load("/nonexistent/server.conf").unwrap_err();
        assert!(matches!(err, RouteError::Read { .. }));
    }
}
