//! Transport configuration.

use std::fmt;
use std::time::Duration;

use mailpost_smtp::{Config, IMPLICIT_TLS_PORT, Security};

use crate::error::{Error, Result};

/// Client identity sent with EHLO when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "localhost";

/// Everything needed to submit mail through one SMTP account.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Server hostname.
    pub host: String,
    /// Server port; 465 starts with implicit TLS, anything else with STARTTLS.
    pub port: u16,
    /// Username for `AUTH LOGIN`.
    pub username: String,
    /// Password for `AUTH LOGIN`.
    pub password: String,
    /// Sender, either `local@domain` or `Name <local@domain>`.
    pub from: String,
    /// Name announced in EHLO.
    pub client_id: String,
    /// Timeout for connecting and for the TLS handshake.
    pub connect_timeout: Duration,
    /// Timeout for each read or write.
    pub io_timeout: Duration,
}

impl TransportConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> TransportConfigBuilder {
        TransportConfigBuilder::new(host)
    }

    /// Reads the configuration from `SMTP_*` environment variables.
    ///
    /// `SMTP_HOST`, `SMTP_USER`, `SMTP_PASS` and `SMTP_FROM` are required.
    /// `SMTP_PORT` defaults to 465. `SMTP_CLIENT_ID`,
    /// `SMTP_CONNECT_TIMEOUT_SECS` and `SMTP_IO_TIMEOUT_SECS` are optional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or empty,
    /// or a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`TransportConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`TransportConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required =
            |name: &str| optional(name).ok_or_else(|| Error::Config(format!("Missing {name}")));

        let port = match optional("SMTP_PORT") {
            Some(port) => parse_number::<u16>("SMTP_PORT", &port)?,
            None => IMPLICIT_TLS_PORT,
        };

        let mut builder = Self::builder(required("SMTP_HOST")?)
            .port(port)
            .credentials(required("SMTP_USER")?, required("SMTP_PASS")?)
            .from(required("SMTP_FROM")?);

        if let Some(client_id) = optional("SMTP_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Some(secs) = optional("SMTP_CONNECT_TIMEOUT_SECS") {
            builder = builder.connect_timeout(Duration::from_secs(parse_number(
                "SMTP_CONNECT_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(secs) = optional("SMTP_IO_TIMEOUT_SECS") {
            builder = builder.io_timeout(Duration::from_secs(parse_number(
                "SMTP_IO_TIMEOUT_SECS",
                &secs,
            )?));
        }

        builder.build()
    }

    /// Returns the security mode tried first.
    #[must_use]
    pub const fn initial_security(&self) -> Security {
        Security::for_port(self.port)
    }

    /// Returns the connection settings for one attempt.
    #[must_use]
    pub fn connection_config(&self, security: Security) -> Config {
        Config::builder(&self.host)
            .port(self.port)
            .security(security)
            .connect_timeout(self.connect_timeout)
            .io_timeout(self.io_timeout)
            .build()
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from", &self.from)
            .field("client_id", &self.client_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("Invalid {name}: {value}")))
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Creates a builder for `host` on port 465.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: TransportConfig {
                host: host.into(),
                port: IMPLICIT_TLS_PORT,
                username: String::new(),
                password: String::new(),
                from: String::new(),
                client_id: DEFAULT_CLIENT_ID.to_string(),
                connect_timeout: Config::DEFAULT_CONNECT_TIMEOUT,
                io_timeout: Config::DEFAULT_IO_TIMEOUT,
            },
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the login credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.config.from = from.into();
        self
    }

    /// Sets the EHLO identity.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host, username, password, sender
    /// or client identity is empty, the port is zero, or a timeout is zero.
    pub fn build(self) -> Result<TransportConfig> {
        let config = self.config;
        let missing = [
            ("host", config.host.trim().is_empty()),
            ("username", config.username.trim().is_empty()),
            ("password", config.password.is_empty()),
            ("from", config.from.trim().is_empty()),
            ("client_id", config.client_id.trim().is_empty()),
        ];
        if let Some((field, _)) = missing.iter().find(|(_, empty)| *empty) {
            return Err(Error::Config(format!("{field} is required")));
        }
        if config.port == 0 {
            return Err(Error::Config("port must be 1-65535".into()));
        }
        if config.connect_timeout.is_zero() || config.io_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("SMTP_HOST", "smtp.example.com"),
        ("SMTP_USER", "user@example.com"),
        ("SMTP_PASS", "secret"),
        ("SMTP_FROM", "Example <noreply@example.com>"),
    ];

    #[test]
    fn test_from_lookup_defaults() {
        let config = TransportConfig::from_lookup(env(REQUIRED)).unwrap();
        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 465);
        assert_eq!(config.initial_security(), Security::Implicit);
        assert_eq!(config.client_id, "localhost");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.io_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_optional_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("SMTP_PORT", " 587 "),
            ("SMTP_CLIENT_ID", "matrix.local"),
            ("SMTP_CONNECT_TIMEOUT_SECS", "5"),
            ("SMTP_IO_TIMEOUT_SECS", "10"),
        ]);
        let config = TransportConfig::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.port, 587);
        assert_eq!(config.initial_security(), Security::StartTls);
        assert_eq!(config.client_id, "matrix.local");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.io_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_lookup_missing_required() {
        for skip in ["SMTP_HOST", "SMTP_USER", "SMTP_PASS", "SMTP_FROM"] {
            let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != skip).collect();
            let err = TransportConfig::from_lookup(env(&pairs)).unwrap_err();
            assert!(err.to_string().contains(skip), "{err}");
        }
    }

    #[test]
    fn test_from_lookup_blank_is_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SMTP_HOST", "   "));
        pairs.remove(0);
        let err = TransportConfig::from_lookup(env(&pairs)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_lookup_invalid_port() {
        for port in ["0", "abc", "70000", "-1"] {
            let mut pairs = REQUIRED.to_vec();
            pairs.push(("SMTP_PORT", port));
            assert!(
                TransportConfig::from_lookup(env(&pairs)).is_err(),
                "port {port} accepted"
            );
        }
    }

    #[test]
    fn test_connection_config() {
        let config = TransportConfig::builder("smtp.example.com")
            .port(2525)
            .credentials("u", "p")
            .from("a@b.com")
            .build()
            .unwrap();
        let conn = config.connection_config(Security::Implicit);
        assert_eq!(conn.host, "smtp.example.com");
        assert_eq!(conn.port, 2525);
        assert_eq!(conn.security, Security::Implicit);
        assert_eq!(config.connection_config(Security::StartTls).port, 2525);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = TransportConfig::builder("smtp.example.com")
            .credentials("user", "hunter2")
            .from("a@b.com")
            .build()
            .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
