//! Client endpoint configuration

use crate::obfuscation::ObfuscationKey;
use crate::protocol::with_session_key;
use thiserror::Error;
use tokio_tungstenite::tungstenite::http::Uri;

/// Endpoint URL errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("Invalid endpoint URL '{url}': {message}")]
    Invalid { url: String, message: String },

    #[error("Endpoint URL must be absolute (scheme://host/path): {0}")]
    NotAbsolute(String),

    #[error("Unsupported scheme '{scheme}' in endpoint URL {url}")]
    UnsupportedScheme { scheme: String, url: String },
}

/// Everything the client needs to open one session, built once at startup
#[derive(Debug, Clone)]
pub struct ClientConfig {
    scheme: &'static str,
    endpoint: Uri,
    scramble: bool,
}

impl ClientConfig {
    /// Validate `url` and normalize `http`/`https` to `ws`/`wss`
    pub fn new(url: &str, scramble: bool) -> Result<Self, EndpointError> {
        let endpoint = url.parse::<Uri>().map_err(|e| EndpointError::Invalid {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let (Some(scheme), Some(_)) = (endpoint.scheme_str(), endpoint.authority()) else {
            return Err(EndpointError::NotAbsolute(url.to_string()));
        };
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            _ => {
                return Err(EndpointError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                    url: url.to_string(),
                })
            }
        };

        Ok(Self {
            scheme,
            endpoint,
            scramble,
        })
    }

    pub fn scramble(&self) -> bool {
        self.scramble
    }

    /// Fresh key for a new session, if scrambling is on
    pub fn session_key(&self) -> Option<ObfuscationKey> {
        self.scramble.then(ObfuscationKey::from_clock)
    }

    /// URL to connect to, carrying `key` in the query when given
    pub fn session_url(&self, key: Option<ObfuscationKey>) -> String {
        let authority = self
            .endpoint
            .authority()
            .map(|a| a.as_str())
            .unwrap_or_default();
        let mut url = format!("{}://{}{}", self.scheme, authority, self.endpoint.path());

        let query = match key {
            Some(key) => Some(with_session_key(self.endpoint.query(), key)),
            None => self.endpoint.query().map(str::to_string),
        };
        if let Some(query) = query {
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}
