//! Error types for SMTP operations.

use crate::connection::State;
use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error text fragments produced when the two ends disagree on whether the
/// session starts encrypted.
const TLS_MISMATCH_SIGNATURES: &[&str] = &[
    "wrong version number",
    "corrupt message",
    "invalidcontenttype",
    "eproto",
    "ssl",
    "tls",
];

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// Hostname is not a valid TLS server name.
    #[error("Invalid TLS server name: {0}")]
    InvalidHostname(String),

    /// The server closed the connection.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// No reply arrived in time.
    #[error("Timed out after {after:?} ({state})")]
    Timeout {
        /// Connection state when the timeout fired.
        state: State,
        /// Configured timeout.
        after: Duration,
    },

    /// The connection failed earlier and can no longer be used.
    #[error("Connection unusable after earlier failure: {0}")]
    Broken(String),

    /// Server returned an unexpected reply code.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Server rejected the credentials.
    #[error("Authentication failed {code}: {message}")]
    AuthFailed {
        /// Reply code (e.g., 535).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (malformed reply).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Command line would break SMTP framing.
    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    /// A reply is already being awaited on this connection.
    #[error("A reply is already pending on this connection")]
    ReplyPending,

    /// Invalid state for operation.
    #[error("Invalid state for operation: {0}")]
    InvalidState(String),
}

/// Broad error classes, used to decide what a caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, detected before any I/O.
    Validation,
    /// Socket, TLS or timeout failure.
    Transport,
    /// Unexpected or malformed server reply.
    Protocol,
    /// Credentials rejected.
    Authentication,
    /// Connection used out of order.
    Sequencing,
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAddress(_) | Self::InvalidCommand(_) | Self::InvalidHostname(_) => {
                ErrorKind::Validation
            }
            Self::Io(_)
            | Self::TlsHandshake(_)
            | Self::ConnectionClosed
            | Self::Timeout { .. }
            | Self::Broken(_) => ErrorKind::Transport,
            Self::SmtpError { .. } | Self::Protocol(_) => ErrorKind::Protocol,
            Self::AuthFailed { .. } => ErrorKind::Authentication,
            Self::ReplyPending | Self::InvalidState(_) => ErrorKind::Sequencing,
        }
    }

    /// Returns true if the error looks like the peer expected the other
    /// initial encryption mode.
    ///
    /// Only failures before the session is established qualify: a TLS
    /// handshake whose error text matches a known signature, or a greeting
    /// that never arrives (a plaintext client on an implicit TLS port waits
    /// silently). I/O errors and closed connections never qualify.
    #[must_use]
    pub fn is_tls_mismatch(&self) -> bool {
        match self {
            Self::Timeout { state, .. } => *state == State::Connecting,
            Self::TlsHandshake(detail) => {
                let detail = detail.to_lowercase();
                TLS_MISMATCH_SIGNATURES
                    .iter()
                    .any(|signature| detail.contains(signature))
            }
            _ => false,
        }
    }

    /// Returns the reply code, if the server sent one.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } | Self::AuthFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500 && code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 400 && code < 500)
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
    fn test_kinds() {
        assert_eq!(
            Error::InvalidAddress("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(Error::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(Error::smtp_error(550, "no").kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::AuthFailed {
                code: 535,
                message: "bad".into()
            }
            .kind(),
            ErrorKind::Authentication
        );
        assert_eq!(Error::ReplyPending.kind(), ErrorKind::Sequencing);
    }

    #[test]
    fn test_permanent_and_transient() {
        assert!(Error::smtp_error(550, "no").is_permanent());
        assert!(Error::smtp_error(451, "later").is_transient());
        assert!(!Error::ConnectionClosed.is_permanent());
    }

    #[test]
    fn test_tls_mismatch_signatures() {
        assert!(
            Error::TlsHandshake("received corrupt message of type InvalidContentType".into())
                .is_tls_mismatch()
        );
        assert!(
            Error::TlsHandshake("SSL routines:ssl3_get_record:wrong version number".into())
                .is_tls_mismatch()
        );
        assert!(Error::TlsHandshake("tls handshake eof".into()).is_tls_mismatch());
        assert!(
            Error::Timeout {
                state: State::Connecting,
                after: Duration::from_secs(30)
            }
            .is_tls_mismatch()
        );
    }

    #[test]
    fn test_not_tls_mismatch() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(!Error::Io(refused).is_tls_mismatch());
        assert!(
            !Error::TlsHandshake("invalid peer certificate: UnknownIssuer".into())
                .is_tls_mismatch()
        );
        assert!(!Error::smtp_error(530, "Must issue a STARTTLS command first").is_tls_mismatch());
        assert!(
            !Error::AuthFailed {
                code: 535,
                message: "TLS required".into()
            }
            .is_tls_mismatch()
        );
        assert!(
            !Error::Timeout {
                state: State::InData,
                after: Duration::from_secs(60)
            }
            .is_tls_mismatch()
        );
    }

    #[test]
    fn test_dropped_tls_session_is_not_mismatch() {
        let eof = io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed connection without sending TLS close_notify",
        );
        assert!(!Error::Io(eof).is_tls_mismatch());
        assert!(!Error::ConnectionClosed.is_tls_mismatch());
        assert!(!Error::Broken("TLS session dropped".into()).is_tls_mismatch());
    }
}
