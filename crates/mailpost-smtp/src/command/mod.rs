//! SMTP command builder.

use crate::types::{Address, AuthMechanism};
use std::fmt;

/// SMTP command issued by the client.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// EHLO - Extended greeting
    Ehlo {
        /// Client identity
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
    },
    /// Base64 answer to an authentication challenge
    AuthResponse {
        /// Encoded payload
        payload: String,
    },
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Returns the command line without its CRLF terminator.
    #[must_use]
    pub fn line(&self) -> String {
        match self {
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth { mechanism } => format!("AUTH {}", mechanism.as_str()),
            Self::AuthResponse { payload } => payload.clone(),
            Self::MailFrom { from } => format!("MAIL FROM:<{from}>"),
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
    }

    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.line().into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns true if the command carries credentials.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::AuthResponse { .. })
    }
}

/// Renders the command for logs; credentials are replaced.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sensitive() {
            f.write_str("<redacted>")
        } else {
            f.write_str(&self.line())
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({self})")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize() {
        let from = Address::new("sender@example.com").unwrap();
        let to = Address::new("recipient@example.com").unwrap();
        let cases = [
            (
                Command::Ehlo {
                    hostname: "matrix.local".to_string(),
                },
                "EHLO matrix.local\r\n",
            ),
            (Command::StartTls, "STARTTLS\r\n"),
            (
                Command::Auth {
                    mechanism: AuthMechanism::Login,
                },
                "AUTH LOGIN\r\n",
            ),
            (
                Command::AuthResponse {
                    payload: "dXNlcg==".to_string(),
                },
                "dXNlcg==\r\n",
            ),
            (
                Command::MailFrom { from },
                "MAIL FROM:<sender@example.com>\r\n",
            ),
            (Command::RcptTo { to }, "RCPT TO:<recipient@example.com>\r\n"),
            (Command::Data, "DATA\r\n"),
            (Command::Quit, "QUIT\r\n"),
        ];

        for (command, expected) in cases {
            assert_eq!(command.serialize(), expected.as_bytes(), "{command}");
        }
    }

    #[test]
    fn test_credentials_are_redacted() {
        let command = Command::AuthResponse {
            payload: "c2VjcmV0".to_string(),
        };
        assert!(command.is_sensitive());
        assert_eq!(command.to_string(), "<redacted>");
        assert!(!format!("{command:?}").contains("c2VjcmV0"));
        assert_eq!(Command::Data.to_string(), "DATA");
    }
}
