//! Connection settings.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::{
    error::{HyperError, Result},
    retry::RetryPolicy,
};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 38088;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Where and how to reach the store's broker.
///
/// Deserializable from an application config section:
///
/// ```text
/// host: localhost
/// port: 38088
/// timeout_ms: 20000
/// retry:
///   max_retries: 1
///   backoff_ms: 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    #[serde(rename = "timeout_ms", deserialize_with = "duration_from_millis")]
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_owned(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Broker host name or address.
    pub fn host(self, host: impl Into<String>) -> Self {
        ConnectionConfig {
            host: host.into(),
            ..self
        }
    }

    /// Broker port.
    pub fn port(self, port: u16) -> Self {
        ConnectionConfig { port, ..self }
    }

    /// Per-request timeout, also used for connecting.
    pub fn timeout(self, timeout: Duration) -> Self {
        ConnectionConfig { timeout, ..self }
    }

    /// Retry policy for transient failures.
    pub fn retry(self, retry: RetryPolicy) -> Self {
        ConnectionConfig { retry, ..self }
    }
}

impl ConnectionConfig {
    /// Configured host.
    pub fn host_name(&self) -> &str {
        &self.host
    }

    /// Configured port.
    pub fn port_number(&self) -> u16 {
        self.port
    }

    /// Configured timeout.
    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings no broker could be reached with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(HyperError::configuration("connection config is missing host"));
        }
        if self.port == 0 {
            return Err(HyperError::configuration("connection config has port 0"));
        }
        if self.timeout.is_zero() {
            return Err(HyperError::configuration("connection timeout must be positive"));
        }
        Ok(())
    }
}

pub(crate) fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
