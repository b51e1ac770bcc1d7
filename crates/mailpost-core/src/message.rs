//! Outbound messages and their envelope.

use mailpost_mime::{ComposedDocument, MessageBuilder};
use mailpost_smtp::{Address, Mailbox};

use crate::error::{Error, Result};

/// A message to send: recipients, subject, bodies and an optional reply-to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    to: Vec<String>,
    subject: String,
    text: String,
    html: Option<String>,
    reply_to: Option<String>,
}

impl OutboundMessage {
    /// Creates a text-only message.
    ///
    /// `to` may hold several comma-separated recipients, each either a bare
    /// address or `Name <address>`.
    #[must_use]
    pub fn new(to: &str, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self::to_all(split_recipients(to), subject, text)
    }

    /// Creates a text-only message for a list of recipients.
    ///
    /// Blank entries are dropped.
    #[must_use]
    pub fn to_all<I, S>(to: I, subject: impl Into<String>, text: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            to: to
                .into_iter()
                .map(|recipient| recipient.into().trim().to_string())
                .filter(|recipient| !recipient.is_empty())
                .collect(),
            subject: subject.into(),
            text: text.into(),
            html: None,
            reply_to: None,
        }
    }

    /// Adds an HTML alternative.
    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Sets the `Reply-To` address.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Returns the recipients as given.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    /// Returns the subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the plain-text body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the HTML body, if any.
    #[must_use]
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    /// Returns the reply-to address, if any.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Renders the message as sent by `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message has no recipient or no sender.
    pub fn compose(&self, from: &str) -> Result<ComposedDocument> {
        let mut builder = MessageBuilder::new()
            .from(from)
            .to_all(&self.to)
            .subject(&self.subject)
            .text_body(&self.text);
        if let Some(html) = &self.html {
            builder = builder.html_body(html);
        }
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to);
        }
        Ok(builder.build()?)
    }
}

/// Splits a comma-separated recipient list, trimming entries and dropping
/// blank ones.
#[must_use]
pub fn split_recipients(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// SMTP envelope: the addresses used in `MAIL FROM` and `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope sender.
    pub from: Address,
    /// Envelope recipients, never empty.
    pub recipients: Vec<Address>,
}

impl Envelope {
    /// Extracts and validates the envelope of `message` sent by `from`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the sender or any recipient is not a
    /// valid mailbox, or there are no recipients.
    pub fn new(from: &str, message: &OutboundMessage) -> Result<Self> {
        let from = envelope_address(from)
            .map_err(|e| Error::Validation(format!("invalid sender envelope address: {e}")))?;

        let recipients = message
            .recipients()
            .iter()
            .map(|recipient| envelope_address(recipient))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Validation(format!("invalid recipient envelope address: {e}")))?;
        if recipients.is_empty() {
            return Err(Error::Validation("no recipient email provided".into()));
        }

        Ok(Self { from, recipients })
    }
}

fn envelope_address(input: &str) -> mailpost_smtp::Result<Address> {
    Mailbox::parse(input).map(|mailbox| mailbox.address)
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
    fn test_split_recipients() {
        assert_eq!(
            split_recipients(" a@b.com, ,Bob <bob@example.org>,"),
            vec!["a@b.com", "Bob <bob@example.org>"]
        );
        assert!(split_recipients(" , ").is_empty());
    }

    #[test]
    fn test_envelope_extracts_bracketed_addresses() {
        let message = OutboundMessage::new("Alice <alice@example.com>, bob@example.org", "Hi", "x");
        let envelope = Envelope::new("Mailer <noreply@example.com>", &message).unwrap();
        assert_eq!(envelope.from.as_str(), "noreply@example.com");
        let recipients: Vec<_> = envelope.recipients.iter().map(Address::as_str).collect();
        assert_eq!(recipients, vec!["alice@example.com", "bob@example.org"]);
    }

    #[test]
    fn test_envelope_rejects_invalid_addresses() {
        for bad in ["not-an-email", "a@", "@b.com"] {
            let message = OutboundMessage::new(bad, "Hi", "x");
            let err = Envelope::new("noreply@example.com", &message).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{bad}");
        }

        let message = OutboundMessage::new("a@b.com", "Hi", "x");
        assert!(matches!(
            Envelope::new("Mailer <not-an-email>", &message),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_envelope_requires_recipient() {
        let message = OutboundMessage::new(" , ", "Hi", "x");
        assert!(matches!(
            Envelope::new("noreply@example.com", &message),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_compose_keeps_display_names() {
        let message = OutboundMessage::new("Alice <alice@example.com>", "Hi", "Hello")
            .with_html("<p>Hello</p>")
            .with_reply_to("support@example.com");
        let document = message.compose("Mailer <noreply@example.com>").unwrap();

        let text = document.as_str();
        assert!(text.contains("From: Mailer <noreply@example.com>\r\n"));
        assert!(text.contains("To: Alice <alice@example.com>\r\n"));
        assert!(text.contains("Reply-To: support@example.com\r\n"));
        assert!(document.boundary().is_some());
        assert!(document.message_id().ends_with("@example.com>"));
    }

    #[test]
    fn test_compose_with_empty_html_is_plain_text() {
        let message = OutboundMessage::new("alice@example.com", "Hi", "Hello").with_html("");
        let document = message.compose("noreply@example.com").unwrap();
        assert!(document.boundary().is_none());
        assert!(document.as_str().contains("Content-Type: text/plain; charset=UTF-8\r\n"));
    }

    #[test]
    fn test_compose_without_recipients_fails() {
        let message = OutboundMessage::to_all(Vec::<String>::new(), "Hi", "x");
        assert!(matches!(
            message.compose("noreply@example.com"),
            Err(Error::Compose(mailpost_mime::Error::NoRecipients))
        ));
    }
}
