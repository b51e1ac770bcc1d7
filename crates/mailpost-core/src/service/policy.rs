//! Encryption-strategy selection with a single fallback attempt.

use mailpost_mime::ComposedDocument;
use mailpost_smtp::{Connector, Reply, Security, TcpConnector};

use super::session;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::message::{Envelope, OutboundMessage};

/// Outcome of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// `Message-ID` header of the sent message.
    pub message_id: String,
    /// Strategy that succeeded.
    pub security: Security,
    /// Number of connection attempts made (1 or 2).
    pub attempts: u8,
    /// Final reply to the message data.
    pub reply: Reply,
}

/// Sends messages through one SMTP account.
///
/// Each send opens its own connection. The port decides whether the first
/// attempt starts with implicit TLS or STARTTLS; if that attempt fails in a
/// way that suggests the server expected the other mode, the whole
/// transaction is retried once with the other mode.
#[derive(Debug, Clone)]
pub struct Mailer<C = TcpConnector> {
    config: TransportConfig,
    connector: C,
}

impl Mailer<TcpConnector> {
    /// Creates a mailer that connects over TCP with the bundled root
    /// certificates.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self::with_connector(config, TcpConnector::new())
    }
}

impl<C: Connector> Mailer<C> {
    /// Creates a mailer using a custom connector.
    #[must_use]
    pub const fn with_connector(config: TransportConfig, connector: C) -> Self {
        Self { config, connector }
    }

    /// Returns the transport configuration.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Returns the connector.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    /// Sends one message.
    ///
    /// Addresses are validated and the document is composed before any
    /// connection is opened.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad addresses, or the error of the
    /// last attempt.
    pub async fn send(&self, message: &OutboundMessage) -> Result<Delivery> {
        let envelope = Envelope::new(&self.config.from, message)?;
        let document = message.compose(&self.config.from)?;

        let initial = self.config.initial_security();
        let (security, attempts, reply) = match self.attempt(initial, &envelope, &document).await {
            Ok(reply) => (initial, 1, reply),
            Err(e) if e.is_tls_mismatch() => {
                let fallback = initial.opposite();
                tracing::warn!(
                    host = %self.config.host,
                    port = self.config.port,
                    from = %initial,
                    to = %fallback,
                    error = %e,
                    "Encryption mode mismatch, retrying"
                );
                let reply = self.attempt(fallback, &envelope, &document).await?;
                (fallback, 2, reply)
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            host = %self.config.host,
            message_id = document.message_id(),
            recipients = envelope.recipients.len(),
            %security,
            attempts,
            "Message accepted for delivery"
        );

        Ok(Delivery {
            message_id: document.message_id().to_string(),
            security,
            attempts,
            reply,
        })
    }

    async fn attempt(
        &self,
        security: Security,
        envelope: &Envelope,
        document: &ComposedDocument,
    ) -> Result<Reply> {
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            %security,
            "Delivery attempt"
        );
        session::deliver(&self.connector, &self.config, security, envelope, document).await
    }
}

/// Sends `message` with a one-off [`Mailer`] over TCP.
///
/// # Errors
///
/// See [`Mailer::send`].
pub async fn send_mail(config: &TransportConfig, message: &OutboundMessage) -> Result<Delivery> {
    Mailer::new(config.clone()).send(message).await
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
    use crate::Error;
    use std::cell::Cell;
    use tokio_test::io::Mock;

    /// Connector that must never be asked to connect.
    #[derive(Default)]
    struct NoNetwork {
        connects: Cell<usize>,
    }

    impl Connector for NoNetwork {
        type Stream = Mock;

        async fn connect_plain(&self, _host: &str, _port: u16) -> mailpost_smtp::Result<Mock> {
            self.connects.set(self.connects.get() + 1);
            Err(mailpost_smtp::Error::ConnectionClosed)
        }

        async fn connect_tls(&self, _host: &str, _port: u16) -> mailpost_smtp::Result<Mock> {
            self.connects.set(self.connects.get() + 1);
            Err(mailpost_smtp::Error::ConnectionClosed)
        }

        async fn upgrade(&self, stream: Mock, _host: &str) -> mailpost_smtp::Result<Mock> {
            Ok(stream)
        }
    }

    fn config() -> TransportConfig {
        TransportConfig::builder("smtp.example.com")
            .port(587)
            .credentials("user@example.com", "secret")
            .from("Mailer <noreply@example.com>")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_recipient_fails_before_connecting() {
        let mailer = Mailer::with_connector(config(), NoNetwork::default());
        for to in ["not-an-email", "a@", "@b.com"] {
            let err = mailer
                .send(&OutboundMessage::new(to, "Hi", "x"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{to}: {err:?}");
        }
        assert_eq!(mailer.connector.connects.get(), 0);
    }

    #[tokio::test]
    async fn test_invalid_sender_fails_before_connecting() {
        let mut config = config();
        config.from = "nobody".into();
        let mailer = Mailer::with_connector(config, NoNetwork::default());
        let err = mailer
            .send(&OutboundMessage::new("a@b.com", "Hi", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(mailer.connector.connects.get(), 0);
    }

    #[tokio::test]
    async fn test_non_mismatch_error_is_not_retried() {
        let mailer = Mailer::with_connector(config(), NoNetwork::default());
        let err = mailer
            .send(&OutboundMessage::new("a@b.com", "Hi", "x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Smtp(mailpost_smtp::Error::ConnectionClosed)
        ));
        assert_eq!(mailer.connector.connects.get(), 1);
    }
}
