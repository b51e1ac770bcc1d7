//! Error types for the core library.

use mailpost_smtp::ErrorKind;
use thiserror::Error;

/// Errors that can occur while sending a message.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Envelope sender or recipient is not a valid mailbox.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The message could not be composed.
    #[error("Composition error: {0}")]
    Compose(#[from] mailpost_mime::Error),

    /// The SMTP exchange failed.
    #[error("SMTP error: {0}")]
    Smtp(#[from] mailpost_smtp::Error),
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Compose(_) => ErrorKind::Validation,
            Self::Smtp(e) => e.kind(),
        }
    }

    /// Returns true if a retry with the other encryption strategy may help.
    #[must_use]
    pub fn is_tls_mismatch(&self) -> bool {
        matches!(self, Self::Smtp(e) if e.is_tls_mismatch())
    }

    /// Returns the SMTP reply code, if the server rejected a step.
    #[must_use]
    pub const fn smtp_code(&self) -> Option<u16> {
        match self {
            Self::Smtp(e) => e.code(),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

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
    fn test_kind() {
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            Error::from(mailpost_mime::Error::NoRecipients).kind(),
            ErrorKind::Validation
        );

        let rejected = Error::from(mailpost_smtp::Error::smtp_error(550, "no such user"));
        assert_eq!(rejected.kind(), ErrorKind::Protocol);
        assert_eq!(rejected.smtp_code(), Some(550));
        assert!(!rejected.is_tls_mismatch());
    }

    #[test]
    fn test_tls_mismatch_passes_through() {
        let err = Error::from(mailpost_smtp::Error::TlsHandshake(
            "received corrupt message of type InvalidContentType".into(),
        ));
        assert!(err.is_tls_mismatch());
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
