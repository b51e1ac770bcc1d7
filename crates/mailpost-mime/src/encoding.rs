//! MIME encoding utilities.
//!
//! Base64 bodies wrapped to the RFC 2045 line limit, CRLF normalization,
//! SMTP dot-stuffing and RFC 2047 encoded-words for header values.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Maximum length of an encoded body line (RFC 2045).
pub const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded-word.
const MAX_ENCODED_WORD_LENGTH: usize = 75;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(Into::into)
}

/// Encodes text as a Base64 body.
///
/// Line endings are normalized to CRLF before encoding and the output is
/// hard-wrapped at [`MAX_LINE_LENGTH`] characters, lines joined by CRLF.
#[must_use]
pub fn encode_base64_body(text: &str) -> String {
    let encoded = encode_base64(normalize_crlf(text).as_bytes());
    // Base64 output is pure ASCII, so byte chunks are char boundaries.
    encoded
        .as_bytes()
        .chunks(MAX_LINE_LENGTH)
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Decodes a wrapped Base64 body back into text.
///
/// Whitespace (including the CRLF line breaks) is ignored.
///
/// # Errors
///
/// Returns an error if the body is not valid Base64 or not UTF-8.
pub fn decode_base64_body(body: &str) -> Result<String> {
    let cleaned: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = decode_base64(&cleaned)?;
    String::from_utf8(decoded).map_err(Into::into)
}

/// Normalizes every line ending (`\r\n`, bare `\n`, bare `\r`) to CRLF.
#[must_use]
pub fn normalize_crlf(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + text.len() / 16);
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                result.push_str("\r\n");
            }
            '\n' => result.push_str("\r\n"),
            _ => result.push(ch),
        }
    }

    result
}

/// Applies the SMTP transparency rule (RFC 5321 section 4.5.2).
///
/// Text is CRLF-normalized, then every line starting with `.` gets one
/// extra leading `.`. The result depends only on the input, so calling it
/// twice on the same input yields the same output.
#[must_use]
pub fn dot_stuff(text: &str) -> String {
    normalize_crlf(text)
        .split("\r\n")
        .map(|line| {
            if line.starts_with('.') {
                format!(".{line}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Encodes a header value using RFC 2047 encoded-words if needed.
///
/// Format: `=?charset?B?encoded-text?=`. Plain ASCII values are returned
/// unchanged. Long values are split into several encoded-words separated
/// by a space, never splitting a UTF-8 sequence.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if text.is_ascii() && !text.contains("=?") {
        return text.to_string();
    }

    // Every 3 input bytes become 4 output characters.
    let overhead = charset.len() + "=??B??=".len();
    let max_bytes = (MAX_ENCODED_WORD_LENGTH.saturating_sub(overhead) / 4 * 3).max(3);

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if !chunk.is_empty() && chunk.len() + ch.len_utf8() > max_bytes {
            words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join(" ")
}

/// Decodes a header value made of RFC 2047 B-encoded words.
///
/// Whitespace between two adjacent encoded-words is dropped; other tokens
/// are kept as they are.
///
/// # Errors
///
/// Returns an error if an encoded-word is malformed or uses an unsupported
/// encoding.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut result = String::new();
    let mut previous_encoded = false;

    for token in text.split_whitespace() {
        let encoded = token.starts_with("=?") && token.ends_with("?=") && token.len() > 4;
        if !result.is_empty() && !(encoded && previous_encoded) {
            result.push(' ');
        }

        if encoded {
            result.push_str(&decode_encoded_word(&token[2..token.len() - 2])?);
        } else {
            result.push_str(token);
        }
        previous_encoded = encoded;
    }

    Ok(result)
}

fn decode_encoded_word(inner: &str) -> Result<String> {
    let parts: Vec<&str> = inner.split('?').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidEncoding(
            "Invalid RFC 2047 format".to_string(),
        ));
    }

    match parts[1].to_uppercase().as_str() {
        "B" => {
            let decoded = decode_base64(parts[2])?;
            String::from_utf8(decoded).map_err(Into::into)
        }
        other => Err(Error::InvalidEncoding(format!("Unknown encoding: {other}"))),
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
    use proptest::prelude::*;

    #[test]
    fn test_base64_encode_decode() {
        let encoded = encode_base64(b"Hello, World!");
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");
        assert_eq!(decode_base64(&encoded).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_base64_body_wraps_at_76() {
        let text = "x".repeat(200);
        let body = encode_base64_body(&text);
        let lines: Vec<&str> = body.split("\r\n").collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|l| l.len() == MAX_LINE_LENGTH));
        assert_eq!(decode_base64_body(&body).unwrap(), text);
    }

    #[test]
    fn test_base64_body_empty() {
        assert_eq!(encode_base64_body(""), "");
        assert_eq!(decode_base64_body("").unwrap(), "");
    }

    #[test]
    fn test_base64_body_normalizes_line_endings() {
        let body = encode_base64_body("one\ntwo\r\nthree");
        assert_eq!(decode_base64_body(&body).unwrap(), "one\r\ntwo\r\nthree");
    }

    #[test]
    fn test_normalize_crlf() {
        assert_eq!(normalize_crlf("a\nb"), "a\r\nb");
        assert_eq!(normalize_crlf("a\r\nb"), "a\r\nb");
        assert_eq!(normalize_crlf("a\rb"), "a\r\nb");
        assert_eq!(normalize_crlf("a\n\nb\r"), "a\r\n\r\nb\r\n");
        assert_eq!(normalize_crlf("plain"), "plain");
    }

    #[test]
    fn test_dot_stuff() {
        assert_eq!(dot_stuff(".hidden\nvisible"), "..hidden\r\nvisible");
        assert_eq!(dot_stuff("a\n.\nb"), "a\r\n..\r\nb");
        assert_eq!(dot_stuff("no dots. here."), "no dots. here.");
        assert_eq!(dot_stuff("..already"), "...already");
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello", "utf-8"), "Hello");

        let encoded = encode_rfc2047("Héllo", "utf-8");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), "Héllo");
    }

    #[test]
    fn test_rfc2047_long_value_splits_words() {
        let subject = "Grüße aus München ".repeat(8);
        let encoded = encode_rfc2047(&subject, "utf-8");
        assert!(encoded.split(' ').count() > 1);
        assert!(encoded.split(' ').all(|w| w.len() <= MAX_ENCODED_WORD_LENGTH));
        assert_eq!(decode_rfc2047(&encoded).unwrap(), subject);
    }

    #[test]
    fn test_rfc2047_decode_mixed() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(
            decode_rfc2047("Re: =?utf-8?B?SMOpbGxv?=").unwrap(),
            "Re: Héllo"
        );
        assert!(decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").is_err());
    }

    proptest! {
        #[test]
        fn prop_base64_body_round_trip(text in "(?s).{0,600}") {
            let body = encode_base64_body(&text);
            prop_assert_eq!(decode_base64_body(&body).unwrap(), normalize_crlf(&text));
        }

        #[test]
        fn prop_base64_body_line_length(text in "(?s).{0,600}") {
            let body = encode_base64_body(&text);
            prop_assert!(body.split("\r\n").all(|line| line.len() <= MAX_LINE_LENGTH));
        }

        #[test]
        fn prop_dot_stuff_is_pure(text in "[.a-z\r\n]{0,80}") {
            prop_assert_eq!(dot_stuff(&text), dot_stuff(&text));
        }

        #[test]
        fn prop_dot_stuff_doubles_leading_dots_once(text in "[.a-z\n]{0,80}") {
            let stuffed = dot_stuff(&text);
            let original = normalize_crlf(&text);
            for (out, inp) in stuffed.split("\r\n").zip(original.split("\r\n")) {
                if inp.starts_with('.') {
                    prop_assert_eq!(out, format!(".{inp}"));
                } else {
                    prop_assert_eq!(out, inp);
                }
            }
        }

        #[test]
        fn prop_normalized_text_has_no_bare_line_breaks(text in "(?s).{0,200}") {
            let normalized = normalize_crlf(&text);
            let bytes = normalized.as_bytes();
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'\r' {
                    prop_assert_eq!(bytes.get(i + 1), Some(&b'\n'));
                }
                if *b == b'\n' {
                    prop_assert!(i > 0 && bytes[i - 1] == b'\r');
                }
            }
        }
    }
}
