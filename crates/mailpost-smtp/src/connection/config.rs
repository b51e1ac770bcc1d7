//! Connection configuration types.

use std::time::Duration;

/// Well-known port for SMTP over implicit TLS (RFC 8314).
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Message submission port, plaintext upgraded with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;

/// Initial encryption strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Security {
    /// Start with plaintext, upgrade with STARTTLS.
    StartTls,
    /// TLS from the first byte.
    Implicit,
}

impl Security {
    /// Picks the strategy conventionally used on `port`.
    #[must_use]
    pub const fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            Self::Implicit
        } else {
            Self::StartTls
        }
    }

    /// Returns the other strategy.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::StartTls => Self::Implicit,
            Self::Implicit => Self::StartTls,
        }
    }

    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::StartTls => SUBMISSION_PORT,
            Self::Implicit => IMPLICIT_TLS_PORT,
        }
    }
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StartTls => "starttls",
            Self::Implicit => "implicit-tls",
        })
    }
}

/// SMTP connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Timeout for connecting (and for a TLS upgrade).
    pub connect_timeout: Duration,
    /// Timeout for each read or write.
    pub io_timeout: Duration,
}

impl Config {
    /// Default connect timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// Default I/O timeout.
    pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(60);

    /// Creates a configuration with the security mode implied by `port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::builder(host).port(port).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Option<Security>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: None,
            connect_timeout: Config::DEFAULT_CONNECT_TIMEOUT,
            io_timeout: Config::DEFAULT_IO_TIMEOUT,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode explicitly.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// Without an explicit security mode, the port decides; without a
    /// port, the security mode's default port is used.
    #[must_use]
    pub fn build(self) -> Config {
        let (port, security) = match (self.port, self.security) {
            (Some(port), Some(security)) => (port, security),
            (Some(port), None) => (port, Security::for_port(port)),
            (None, Some(security)) => (security.default_port(), security),
            (None, None) => (IMPLICIT_TLS_PORT, Security::Implicit),
        };
        Config {
            host: self.host,
            port,
            security,
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
        }
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

    #[test]
    fn test_security_for_port() {
        assert_eq!(Security::for_port(465), Security::Implicit);
        assert_eq!(Security::for_port(587), Security::StartTls);
        assert_eq!(Security::for_port(25), Security::StartTls);
        assert_eq!(Security::for_port(2525), Security::StartTls);
    }

    #[test]
    fn test_security_opposite() {
        assert_eq!(Security::Implicit.opposite(), Security::StartTls);
        assert_eq!(Security::StartTls.opposite(), Security::Implicit);
    }

    #[test]
    fn test_config_new() {
        let config = Config::new("smtp.example.com", 587);
        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.io_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder_defaults() {
        let config = Config::builder("smtp.example.com").build();
        assert_eq!(config.port, 465);
        assert_eq!(config.security, Security::Implicit);

        let config = Config::builder("smtp.example.com")
            .security(Security::StartTls)
            .build();
        assert_eq!(config.port, 587);
    }

    #[test]
    fn test_builder_explicit_security_wins() {
        let config = Config::builder("smtp.example.com")
            .port(465)
            .security(Security::StartTls)
            .io_timeout(Duration::from_secs(5))
            .build();
        assert_eq!(config.port, 465);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.io_timeout, Duration::from_secs(5));
    }
}
