//! Home Assistant URL handling
//!
//! One validated base URL feeds every endpoint: REST state, entity pictures
//! and the WebSocket API.

use std::fmt;

use super::error::ConnectionError;

/// Path of the WebSocket API relative to the base URL
pub const WEBSOCKET_PATH: &str = "/api/websocket";

/// A normalized `http(s)://host[:port]` base URL without trailing slash
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseUrl(String);

impl BaseUrl {
    /// Normalize and validate a base URL
    ///
    /// Surrounding whitespace and trailing slashes are removed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidUrl`] unless the URL starts with
    /// `http://` or `https://` and names a host.
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| {
                ConnectionError::InvalidUrl(format!(
                    "'{raw}': Home Assistant base URL must start with http:// or https://"
                ))
            })?;
        if rest.is_empty() {
            return Err(ConnectionError::InvalidUrl(format!("'{raw}': missing host")));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The normalized URL
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the URL uses TLS
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.0.starts_with("https://")
    }

    /// Whether `url` has the same scheme, host and port as the base
    ///
    /// Default ports count as equal to explicit ones; anything that does not
    /// parse is foreign.
    #[must_use]
    pub fn is_same_origin(&self, url: &str) -> bool {
        match (reqwest::Url::parse(&self.0), reqwest::Url::parse(url)) {
            (Ok(base), Ok(other)) => base.origin() == other.origin(),
            _ => false,
        }
    }

    /// WebSocket endpoint: scheme upgraded to `ws`/`wss`, API path appended
    #[must_use]
    pub fn websocket_url(&self) -> String {
        let (scheme, rest) = match self.0.strip_prefix("https://") {
            Some(rest) => ("wss://", rest),
            None => ("ws://", self.0.trim_start_matches("http://")),
        };
        format!("{scheme}{rest}{WEBSOCKET_PATH}")
    }

    /// Join a possibly relative URL onto the base
    ///
    /// Absolute `http(s)` URLs are returned unchanged.
    #[must_use]
    pub fn join(&self, maybe_relative: &str) -> String {
        if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
            return maybe_relative.to_string();
        }
        format!("{}/{}", self.0, maybe_relative.trim_start_matches('/'))
    }

    /// REST endpoint for one entity's state
    #[must_use]
    pub fn state_url(&self, entity_id: &str) -> String {
        self.join(&format!("/api/states/{}", urlencoding::encode(entity_id)))
    }

    /// Fallback picture endpoint for media players without `entity_picture`
    #[must_use]
    pub fn media_proxy_url(&self, entity_id: &str) -> String {
        self.join(&format!(
            "/api/media_player_proxy/{}",
            urlencoding::encode(entity_id)
        ))
    }
}

impl fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
