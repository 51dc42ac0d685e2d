//! Server endpoint validation.
//!
//! An [`Endpoint`] is the absolute address (scheme, host, port) of the
//! editor/automation server. It is supplied by the caller and never changes
//! for the life of a session. Unlike a UI address field, the core does not
//! guess: a missing scheme or port is an error, not something to fill in.
//!
//! # Example
//!
//! ```
//! use edlink_client::endpoint::Endpoint;
//!
//! let endpoint = Endpoint::parse("http://127.0.0.1:50051")?;
//! assert_eq!(endpoint.as_str(), "http://127.0.0.1:50051/");
//! assert!(!endpoint.is_tls());
//! # Ok::<(), edlink_client::endpoint::EndpointError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Validated, absolute server address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    /// The normalized URL (always has scheme, host and port)
    url: String,
}

impl Endpoint {
    /// Parse and validate an endpoint URL.
    ///
    /// Leading and trailing whitespace is ignored. The scheme must be `http`
    /// or `https` and the port must be explicit.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(EndpointError::EmptyInput);
        }

        let url = Url::parse(input).map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;

        let scheme = url.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(EndpointError::UnsupportedScheme(scheme));
        }

        if url.host().is_none() {
            return Err(EndpointError::MissingHost);
        }

        // `port()` hides the scheme default, so "http://host:80" reads as None.
        if !has_explicit_port(input, &url) {
            return Err(EndpointError::MissingPort);
        }

        Ok(Self {
            url: url.to_string(),
        })
    }

    /// Returns the normalized URL string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Returns `true` if this endpoint uses TLS (https scheme).
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("https://")
    }
}

fn has_explicit_port(input: &str, url: &Url) -> bool {
    if url.port().is_some() {
        return true;
    }
    // Default ports are elided by the parser; look for them in the raw authority.
    let Some(default) = url.port_or_known_default() else {
        return false;
    };
    let authority = input
        .split_once("://")
        .map_or(input, |(_, rest)| rest)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    authority.ends_with(&format!(":{default}"))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.url
    }
}

/// Endpoint validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Input was empty or whitespace-only
    EmptyInput,
    /// URL parsing failed
    InvalidUrl(String),
    /// No host was found in the URL
    MissingHost,
    /// The port was not given explicitly
    MissingPort,
    /// Unsupported URL scheme (only http/https allowed)
    UnsupportedScheme(String),
}

impl std::error::Error for EndpointError {}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Address cannot be empty"),
            Self::InvalidUrl(e) => write!(f, "Invalid URL: {e} (use scheme://host:port)"),
            Self::MissingHost => write!(f, "URL must include a host"),
            Self::MissingPort => write!(f, "URL must include an explicit port"),
            Self::UnsupportedScheme(s) => write!(f, "Unsupported scheme '{s}' (use http or https)"),
        }
    }
}
