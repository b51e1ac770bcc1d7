//! SMTP connection management.
//!
//! [`Connection`] does the byte exchange, [`Client`] layers the command
//! sequence on top of it with one type per dialogue state, and a
//! [`Connector`] decides how streams are opened and upgraded.

mod client;
mod config;
mod framed;
mod stream;

pub use client::{Authenticated, Client, Data, Greeted, MailTransaction, RecipientAdded};
pub use config::{Config, ConfigBuilder, IMPLICIT_TLS_PORT, SUBMISSION_PORT, Security};
pub use framed::{Connection, State};
pub use stream::{Connector, SmtpStream, TcpConnector};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// What the server announced in its greeting and EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Extensions from the latest EHLO reply.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_queries() {
        let info = ServerInfo {
            hostname: "smtp.example.com".to_string(),
            extensions: ["STARTTLS", "SIZE 1024", "AUTH LOGIN PLAIN"]
                .into_iter()
                .map(Extension::parse)
                .collect(),
        };
        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(1024));
        assert!(info.auth_mechanisms().contains(&AuthMechanism::Login));
    }

    #[test]
    fn test_server_info_empty() {
        let info = ServerInfo::default();
        assert!(!info.supports_starttls());
        assert_eq!(info.max_message_size(), None);
        assert!(info.auth_mechanisms().is_empty());
    }
}
