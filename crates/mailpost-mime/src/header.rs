//! MIME header handling.

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::{Error, Result};
use std::fmt;

/// Ordered collection of email headers.
///
/// Values are sanitized on insertion: every run of CR/LF characters is
/// replaced by a single space, so a value can never start a new header line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.headers
            .push((name.into(), sanitize_value(value.as_ref())));
    }

    /// Gets the first value for a header (case-insensitive name).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Returns the number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns an iterator over all headers, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parses a header block from raw text.
    ///
    /// Parsing stops at the first empty line. Continuation lines (starting
    /// with space or tab) are unfolded into the previous header.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is neither a header nor a continuation.
    pub fn parse(text: &str) -> Result<Self> {
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::InvalidHeader(line.to_string()))?;
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        Ok(headers)
    }

    /// Encodes a header value using RFC 2047 if needed.
    #[must_use]
    pub fn encode_value(value: &str) -> String {
        encode_rfc2047(&sanitize_value(value), "utf-8")
    }

    /// Decodes a header value from RFC 2047 if encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_value(value: &str) -> Result<String> {
        decode_rfc2047(value)
    }
}

/// Strips embedded line breaks from a header value.
///
/// Each run of CR/LF characters becomes one space and the result is
/// trimmed.
#[must_use]
pub fn sanitize_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut in_break = false;

    for ch in value.chars() {
        if ch == '\r' || ch == '\n' {
            if !in_break {
                result.push(' ');
                in_break = true;
            }
        } else {
            result.push(ch);
            in_break = false;
        }
    }

    result.trim().to_string()
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com");
        headers.add("To", "b@example.com");
        headers.add("Subject", "Hi");
        assert_eq!(
            headers.to_string(),
            "From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n"
        );
    }

    #[test]
    fn test_repeated_headers_keep_order() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com");
        headers.add("Subject", "x");
        headers.add("to", "bob@example.com");
        assert_eq!(
            headers.get_all("TO"),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert_eq!(headers.iter().nth(2), Some(("to", "bob@example.com")));
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_sanitize_value() {
        assert_eq!(sanitize_value("Hello\r\nBcc: evil@example.com"), "Hello Bcc: evil@example.com");
        assert_eq!(sanitize_value("a\n\n\rb"), "a b");
        assert_eq!(sanitize_value("\r\ntrailing\n"), "trailing");
        assert_eq!(sanitize_value("clean"), "clean");
    }

    #[test]
    fn test_injection_is_single_line() {
        let mut headers = Headers::new();
        headers.add("Subject", "Hi\r\nBcc: victim@example.com\r\n\r\nbody");
        let rendered = headers.to_string();
        assert_eq!(rendered.matches("\r\n").count(), 1);
        assert!(!rendered.contains("\nBcc:"));
    }

    #[test]
    fn test_headers_parse() {
        let text = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test Message\r\n",
            "Content-Type: multipart/alternative;\r\n",
            " boundary=\"abc\"\r\n",
            "\r\n",
            "Not: a header\r\n"
        );

        let headers = Headers::parse(text).unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("multipart/alternative; boundary=\"abc\"")
        );
        assert!(headers.get("Not").is_none());
    }

    #[test]
    fn test_headers_parse_rejects_garbage() {
        assert!(Headers::parse("no colon here\r\n").is_err());
    }

    #[test]
    fn test_encode_value_round_trip() {
        let encoded = Headers::encode_value("Grüße\r\nBcc: x");
        assert!(!encoded.contains('\n'));
        assert_eq!(Headers::decode_value(&encoded).unwrap(), "Grüße Bcc: x");
    }
}
