//! SMTP reply parser.
//!
//! Every reply line is `NNN` followed by `-` (more lines follow), a space,
//! or nothing (last line). A reply is complete at its last line.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Longest reply line accepted, terminator excluded.
pub const MAX_REPLY_LINE: usize = 8192;

/// One parsed reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyLine<'a> {
    /// Three-digit code.
    pub code: ReplyCode,
    /// True for the final line of a reply.
    pub last: bool,
    /// Text after the separator.
    pub text: &'a str,
}

/// Parses a single reply line (without its line terminator).
///
/// # Errors
///
/// Returns a protocol error if the line does not start with three digits
/// followed by `-`, a space, or the end of the line.
pub fn parse_line(line: &str) -> Result<ReplyLine<'_>> {
    if line.len() > MAX_REPLY_LINE {
        return Err(Error::Protocol(format!(
            "Reply line exceeds {MAX_REPLY_LINE} bytes"
        )));
    }

    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(Error::Protocol(format!("Malformed reply line: {line}")));
    }
    let code = bytes[..3]
        .iter()
        .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));

    let (last, text) = match bytes.get(3) {
        None => (true, ""),
        Some(b' ') => (true, &line[4..]),
        Some(b'-') => (false, &line[4..]),
        Some(_) => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
    };

    Ok(ReplyLine {
        code: ReplyCode::new(code),
        last,
        text,
    })
}

/// Parses an SMTP reply from its lines.
///
/// The code of the reply is the code of its first line.
///
/// # Errors
///
/// Returns an error if there are no lines, a line is malformed, or the
/// last line is not marked as final.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };
    let code = parse_line(first)?.code;

    let mut message = Vec::with_capacity(lines.len());
    let mut complete = false;
    for line in lines {
        let parsed = parse_line(line)?;
        message.push(parsed.text.to_string());
        complete = parsed.last;
    }

    if !complete {
        return Err(Error::Protocol("Reply ended without a final line".into()));
    }

    Ok(Reply::new(code, message))
}

/// Checks if a line is the last line of a reply.
///
/// # Errors
///
/// Returns a protocol error if the line is malformed.
pub fn is_last_reply_line(line: &str) -> Result<bool> {
    parse_line(line).map(|parsed| parsed.last)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&lines(&["250 OK"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.message, vec!["OK"]);
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let reply = parse_reply(&lines(&[
            "250-smtp.example.com greets you",
            "250-STARTTLS",
            "250 AUTH LOGIN PLAIN",
        ]))
        .unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(
            reply.message,
            vec!["smtp.example.com greets you", "STARTTLS", "AUTH LOGIN PLAIN"]
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&lines(&["250-first", "250"])).unwrap();
        assert_eq!(reply.message, vec!["first", ""]);
    }

    #[test]
    fn test_code_comes_from_first_line() {
        let reply = parse_reply(&lines(&["250-first", "251 second"])).unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK").unwrap());
        assert!(is_last_reply_line("250").unwrap());
        assert!(!is_last_reply_line("250-Continuing").unwrap());
        assert!(is_last_reply_line("25").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&lines(&["25"])).is_err());
        assert!(parse_reply(&lines(&["ABC OK"])).is_err());
        assert!(parse_reply(&lines(&["250_OK"])).is_err());
        assert!(parse_reply(&lines(&["250-more"])).is_err());
        assert!(parse_reply(&lines(&["250-ok", "garbage"])).is_err());
    }

    #[test]
    fn test_line_length_limit() {
        let long = format!("250 {}", "x".repeat(MAX_REPLY_LINE));
        let err = parse_line(&long).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }
}
