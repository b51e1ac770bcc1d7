//! Outbound message composition.
//!
//! [`MessageBuilder`] renders a logical message into a wire-ready
//! RFC 5322 document. Composition is pure: the only inputs besides the
//! builder fields are the current time and a random source, both of which
//! can be pinned for reproducible output.

use crate::content_type::ContentType;
use crate::encoding::{dot_stuff, encode_base64_body};
use crate::error::{Error, Result};
use crate::header::{Headers, sanitize_value};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt::Write as _;

/// Longest boundary allowed by RFC 2046.
const MAX_BOUNDARY_LENGTH: usize = 70;

/// Transfer encoding used for every body part.
const TRANSFER_ENCODING: &str = "base64";

/// A fully rendered message, ready for the SMTP `DATA` phase.
///
/// The document uses CRLF line endings throughout and carries no trailing
/// CRLF; the end-of-data marker is appended by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    headers: Headers,
    data: String,
    message_id: String,
    boundary: Option<String>,
}

impl ComposedDocument {
    /// Returns the rendered document as bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Returns the rendered document as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Returns the document length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the document is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the top-level headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the Message-ID, including angle brackets.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns the multipart boundary, if the message is multipart.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_deref()
    }

    /// Consumes the document and returns the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data.into_bytes()
    }
}

/// Builder for outbound messages.
///
/// Without an HTML body the result is a single `text/plain` part; with one
/// it is `multipart/alternative` holding the text part followed by the HTML
/// part. Bodies are always base64 encoded.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    reply_to: Option<String>,
    subject: String,
    text: String,
    html: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
    message_id_domain: Option<String>,
    boundary: Option<String>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `From` header (address or `Name <address>`).
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Adds a `To` recipient (address or `Name <address>`).
    #[must_use]
    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to.push(recipient.into());
        self
    }

    /// Adds several `To` recipients.
    #[must_use]
    pub fn to_all<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.to.extend(recipients.into_iter().map(Into::into));
        self
    }

    /// Sets the `Reply-To` header.
    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain-text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Sets the HTML body, turning the message into multipart/alternative.
    /// An empty HTML body is treated as absent.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Pins the `Date` header (defaults to now).
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Pins the `Message-ID` header value (angle brackets included).
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Sets the domain used for generated Message-IDs.
    ///
    /// Defaults to the domain of the `From` address.
    #[must_use]
    pub fn message_id_domain(mut self, domain: impl Into<String>) -> Self {
        self.message_id_domain = Some(domain.into());
        self
    }

    /// Pins the multipart boundary (defaults to a random token).
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Renders the message.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no sender, no recipient, or a pinned
    /// boundary is invalid or collides with the encoded content.
    pub fn build(self) -> Result<ComposedDocument> {
        let from = self
            .from
            .as_deref()
            .map(sanitize_value)
            .filter(|from| !from.is_empty())
            .ok_or(Error::NoSender)?;

        let recipients: Vec<String> = self
            .to
            .iter()
            .map(|to| sanitize_value(to))
            .filter(|to| !to.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(Error::NoRecipients);
        }

        let date = self.date.unwrap_or_else(Utc::now);
        let message_id = match self.message_id {
            Some(id) => sanitize_value(&id),
            None => {
                let domain = self
                    .message_id_domain
                    .clone()
                    .or_else(|| address_domain(&from))
                    .unwrap_or_else(|| "localhost".to_string());
                generate_message_id(&date, &domain)
            }
        };

        let mut headers = Headers::new();
        headers.add("From", &from);
        headers.add("To", recipients.join(", "));
        if let Some(reply_to) = self.reply_to.as_deref().map(sanitize_value) {
            if !reply_to.is_empty() {
                headers.add("Reply-To", reply_to);
            }
        }
        headers.add("Subject", Headers::encode_value(&self.subject));
        headers.add("Date", date.to_rfc2822());
        headers.add("Message-ID", &message_id);
        headers.add("MIME-Version", "1.0");

        let text = dot_stuff(&encode_base64_body(&self.text));

        let (body, boundary) = match self.html.as_deref().filter(|html| !html.is_empty()) {
            None => {
                headers.add("Content-Type", ContentType::text_plain().to_string());
                headers.add("Content-Transfer-Encoding", TRANSFER_ENCODING);
                (text, None)
            }
            Some(html) => {
                let html = dot_stuff(&encode_base64_body(html));
                let boundary = match self.boundary {
                    Some(boundary) => {
                        validate_boundary(&boundary, &[&text, &html])?;
                        boundary
                    }
                    None => generate_boundary(),
                };
                headers.add(
                    "Content-Type",
                    ContentType::multipart_alternative(&boundary).to_string(),
                );

                let mut body = String::new();
                write_part(&mut body, &boundary, &ContentType::text_plain(), &text);
                write_part(&mut body, &boundary, &ContentType::text_html(), &html);
                let _ = write!(body, "--{boundary}--");
                (body, Some(boundary))
            }
        };

        let data = format!("{headers}\r\n{body}");

        Ok(ComposedDocument {
            headers,
            data,
            message_id,
            boundary,
        })
    }
}

fn write_part(out: &mut String, boundary: &str, content_type: &ContentType, encoded: &str) {
    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add("Content-Transfer-Encoding", TRANSFER_ENCODING);
    let _ = write!(out, "--{boundary}\r\n{headers}\r\n{encoded}\r\n");
}

/// Extracts the domain of an address, accepting `Name <local@domain>`.
fn address_domain(mailbox: &str) -> Option<String> {
    let address = match (mailbox.rfind('<'), mailbox.rfind('>')) {
        (Some(open), Some(close)) if open < close => &mailbox[open + 1..close],
        _ => mailbox,
    };
    address
        .rsplit_once('@')
        .map(|(_, domain)| domain.trim().to_string())
        .filter(|domain| !domain.is_empty())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    buf.iter().fold(String::with_capacity(bytes * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn generate_message_id(date: &DateTime<Utc>, domain: &str) -> String {
    let millis = date.timestamp_millis();
    format!("<{millis:x}.{}@{domain}>", random_hex(8))
}

/// Generates a multipart boundary.
///
/// The `=_` prefix cannot occur in base64 output, so the boundary never
/// collides with an encoded part.
fn generate_boundary() -> String {
    format!("=_mailpost_{}", random_hex(12))
}

fn validate_boundary(boundary: &str, parts: &[&str]) -> Result<()> {
    let valid_chars = boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c));
    if boundary.is_empty()
        || boundary.len() > MAX_BOUNDARY_LENGTH
        || boundary.ends_with(' ')
        || !valid_chars
    {
        return Err(Error::InvalidHeader(format!("Invalid boundary: {boundary}")));
    }
    if parts.iter().any(|part| part.contains(boundary)) {
        return Err(Error::InvalidHeader(format!(
            "Boundary occurs in message content: {boundary}"
        )));
    }
    Ok(())
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
    use crate::encoding::{MAX_LINE_LENGTH, decode_base64_body, normalize_crlf};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from("Mailer <noreply@example.com>")
            .to("alice@example.com")
            .subject("Hello")
            .date(fixed_date())
            .message_id("<fixed@example.com>")
    }

    fn split(doc: &ComposedDocument) -> (&str, &str) {
        doc.as_str().split_once("\r\n\r\n").unwrap()
    }

    #[test]
    fn test_text_only_layout() {
        let doc = base().text_body("Hi there").build().unwrap();
        let expected = format!(
            concat!(
                "From: Mailer <noreply@example.com>\r\n",
                "To: alice@example.com\r\n",
                "Subject: Hello\r\n",
                "Date: {}\r\n",
                "Message-ID: <fixed@example.com>\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: text/plain; charset=UTF-8\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "\r\n",
                "SGkgdGhlcmU="
            ),
            fixed_date().to_rfc2822()
        );
        assert_eq!(doc.as_str(), expected);
        assert!(doc.boundary().is_none());
        assert_eq!(doc.message_id(), "<fixed@example.com>");
    }

    #[test]
    fn test_reply_to_and_multiple_recipients() {
        let doc = base()
            .to("Bob <bob@example.com>")
            .reply_to("help@example.com")
            .text_body("x")
            .build()
            .unwrap();
        let headers = Headers::parse(doc.as_str()).unwrap();
        assert_eq!(
            headers.get("To"),
            Some("alice@example.com, Bob <bob@example.com>")
        );
        assert_eq!(headers.get("Reply-To"), Some("help@example.com"));
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(&names[..4], &["From", "To", "Reply-To", "Subject"]);
    }

    #[test]
    fn test_text_round_trip() {
        let text = "line one\nline two\r\n.leading dot\rend";
        let doc = base().text_body(text).build().unwrap();
        let (_, body) = split(&doc);
        assert_eq!(decode_base64_body(body).unwrap(), normalize_crlf(text));
    }

    #[test]
    fn test_multipart_alternative() {
        let doc = base()
            .text_body("plain")
            .html_body("<p>html</p>")
            .boundary("=_test_boundary")
            .build()
            .unwrap();

        let headers = Headers::parse(doc.as_str()).unwrap();
        let ct = ContentType::parse(headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(ct.sub_type, "alternative");
        assert_eq!(ct.boundary(), Some("=_test_boundary"));
        assert!(headers.get("Content-Transfer-Encoding").is_none());

        let (_, body) = split(&doc);
        let expected = concat!(
            "--=_test_boundary\r\n",
            "Content-Type: text/plain; charset=UTF-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "cGxhaW4=\r\n",
            "--=_test_boundary\r\n",
            "Content-Type: text/html; charset=UTF-8\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PHA+aHRtbDwvcD4=\r\n",
            "--=_test_boundary--"
        );
        assert_eq!(body, expected);
    }

    #[test]
    fn test_empty_html_stays_text_only() {
        let doc = base().text_body("plain").html_body("").build().unwrap();
        assert!(doc.boundary().is_none());

        let headers = Headers::parse(doc.as_str()).unwrap();
        let ct = ContentType::parse(headers.get("Content-Type").unwrap()).unwrap();
        assert_eq!(ct.sub_type, "plain");
        assert!(!doc.as_str().contains("text/html"));
    }

    #[test]
    fn test_generated_boundary_and_message_id() {
        let doc = MessageBuilder::new()
            .from("Mailer <noreply@mail.example.com>")
            .to("alice@example.com")
            .text_body("a")
            .html_body("b")
            .build()
            .unwrap();
        let boundary = doc.boundary().unwrap();
        assert!(boundary.starts_with("=_mailpost_"));
        assert!(doc.message_id().starts_with('<'));
        assert!(doc.message_id().ends_with("@mail.example.com>"));
    }

    #[test]
    fn test_message_id_domain_fallback() {
        let doc = MessageBuilder::new()
            .from("no address here")
            .to("alice@example.com")
            .build()
            .unwrap();
        assert!(doc.message_id().ends_with("@localhost>"));

        let doc = MessageBuilder::new()
            .from("a@example.com")
            .message_id_domain("relay.example.org")
            .to("alice@example.com")
            .build()
            .unwrap();
        assert!(doc.message_id().ends_with("@relay.example.org>"));
    }

    #[test]
    fn test_no_recipients() {
        let err = MessageBuilder::new()
            .from("a@example.com")
            .to("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::NoRecipients));
    }

    #[test]
    fn test_no_sender() {
        let err = MessageBuilder::new().to("a@example.com").build().unwrap_err();
        assert!(matches!(err, Error::NoSender));
    }

    #[test]
    fn test_invalid_pinned_boundary() {
        let err = base()
            .text_body("a")
            .html_body("b")
            .boundary("bad\"boundary")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));

        // "YQ" is the base64 prefix of "a"
        let err = base()
            .text_body("a")
            .html_body("b")
            .boundary("YQ")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let doc = base().subject("Grüße").text_body("x").build().unwrap();
        let headers = Headers::parse(doc.as_str()).unwrap();
        let subject = headers.get("Subject").unwrap();
        assert!(subject.starts_with("=?utf-8?B?"));
        assert_eq!(Headers::decode_value(subject).unwrap(), "Grüße");
    }

    #[test]
    fn test_subject_injection_is_stripped() {
        let doc = base()
            .subject("Hi\r\nBcc: victim@example.com")
            .reply_to("x@example.com\nX-Evil: 1")
            .text_body("x")
            .build()
            .unwrap();
        let (header_block, _) = split(&doc);
        assert!(header_block.lines().all(|l| !l.starts_with("Bcc:")));
        assert!(header_block.lines().all(|l| !l.starts_with("X-Evil:")));
        assert_eq!(header_block.lines().count(), 9);
    }

    #[test]
    fn test_build_is_deterministic_when_pinned() {
        let make = || {
            base()
                .text_body("t")
                .html_body("h")
                .boundary("=_fixed")
                .build()
                .unwrap()
        };
        assert_eq!(make(), make());
    }

    proptest! {
        #[test]
        fn prop_text_only_round_trip(text in "(?s).{0,400}") {
            let doc = base().text_body(text.clone()).build().unwrap();
            let (_, body) = split(&doc);
            prop_assert_eq!(decode_base64_body(body).unwrap(), normalize_crlf(&text));
        }

        #[test]
        fn prop_body_lines_within_limit(text in "(?s).{0,400}", html in "(?s).{0,400}") {
            let doc = base().text_body(text).html_body(html).build().unwrap();
            let (_, body) = split(&doc);
            prop_assert!(body.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
        }

        #[test]
        fn prop_single_consistent_boundary(text in "(?s).{0,300}", html in "(?s).{1,300}") {
            let doc = base().text_body(text).html_body(html).build().unwrap();
            let boundary = doc.boundary().unwrap().to_string();
            let headers = Headers::parse(doc.as_str()).unwrap();
            prop_assert_eq!(headers.get_all("Content-Type").len(), 1);

            let (_, body) = split(&doc);
            let opener = format!("--{boundary}\r\n");
            let closer = format!("--{boundary}--");
            prop_assert_eq!(body.matches(opener.as_str()).count(), 2);
            prop_assert!(body.starts_with(&opener));
            prop_assert!(body.ends_with(&closer));
            prop_assert_eq!(body.matches(boundary.as_str()).count(), 3);
        }

        #[test]
        fn prop_header_values_cannot_inject(subject in "(?s)[a-zA-Z:\r\n ]{0,60}", reply in "(?s)[a-z@.:\r\n]{0,40}") {
            let doc = base().subject(subject).reply_to(reply.clone()).text_body("x").build().unwrap();
            let (header_block, _) = split(&doc);
            let expected = if sanitize_value(&reply).is_empty() { 8 } else { 9 };
            prop_assert_eq!(header_block.split("\r\n").count(), expected);
        }
    }
}
