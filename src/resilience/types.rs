//! Call parameters and error definitions for breaker resolution.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Boxed error returned by breaker factories and custom key selectors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Options attached to an outgoing call.
///
/// The registry never reads these; they exist so custom key selectors can
/// partition on things like a tenant header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Response timeout requested by the caller, if any.
    pub response_timeout: Option<Duration>,
    /// Free-form attributes (headers, tenant ids, ...).
    pub attributes: HashMap<String, String>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Look up an attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Remote target of a call.
///
/// Wraps the parsed [`Url`] together with the port exactly as written.
/// `Url` normalizes a scheme-default port away (`http://h:80/` has no port),
/// so the written port is kept separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    url: Url,
    port: Option<u16>,
    written: String,
}

impl CallTarget {
    /// Parse a target, keeping an explicitly written port.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(input)?;
        let port = url.port().or_else(|| written_port(input));
        Ok(Self {
            url,
            port,
            written: input.to_string(),
        })
    }

    /// The parsed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host component, if the target has one.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Port as written in the target, including scheme-default ports.
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Port in the authority of `input`, as written.
fn written_port(input: &str) -> Option<u16> {
    let (_, rest) = input.split_once("://")?;
    let authority = rest.split(|c: char| matches!(c, '/' | '?' | '#')).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let port = match host_port.rfind(']') {
        // IPv6 literal: only a `:` after the closing bracket starts a port.
        Some(end) => host_port[end + 1..].strip_prefix(':')?,
        None => host_port.rsplit_once(':')?.1,
    };
    port.parse().ok()
}

impl From<Url> for CallTarget {
    fn from(url: Url) -> Self {
        let port = url.port();
        let written = url.to_string();
        Self { url, port, written }
    }
}

impl FromStr for CallTarget {
    type Err = url::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.written)
    }
}

/// Parameters of one outgoing remote call, as seen by a key selector.
#[derive(Debug, Clone, Copy)]
pub struct CallParams<'a> {
    /// The remote target being called.
    pub target: &'a CallTarget,
    /// Options the call was issued with.
    pub options: &'a CallOptions,
    /// Name of the invoked operation (RPC method).
    pub operation: &'a str,
    /// Arguments of the invocation.
    pub args: &'a [serde_json::Value],
}

impl<'a> CallParams<'a> {
    /// Bundle call parameters.
    pub fn new(
        target: &'a CallTarget,
        options: &'a CallOptions,
        operation: &'a str,
        args: &'a [serde_json::Value],
    ) -> Self {
        Self {
            target,
            options,
            operation,
            args,
        }
    }
}

/// A key could not be computed from the call parameters.
#[derive(Debug, Error)]
pub enum KeyDerivationError {
    /// The call target has no host component (e.g. `unix:/run/app.sock`).
    #[error("call target '{target}' has no host")]
    MissingHost { target: String },

    /// The operation identifier is empty.
    #[error("call has an empty operation name")]
    MissingOperation,

    /// Raised by a user-supplied selector.
    #[error("key derivation failed: {0}")]
    Custom(#[source] BoxError),
}

impl KeyDerivationError {
    /// Wrap an arbitrary error raised by a custom selector.
    pub fn custom(err: impl Into<BoxError>) -> Self {
        Self::Custom(err.into())
    }
}

/// Errors returned by [`KeyedBreakerRegistry::resolve`](super::registry::KeyedBreakerRegistry::resolve).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The key selector failed; carries its error untouched.
    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    /// The breaker factory failed for a key that had no breaker yet.
    #[error("failed to create circuit breaker for key {key}: {source}")]
    BreakerCreation {
        key: String,
        #[source]
        source: BoxError,
    },
}

/// Result type for breaker resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;
