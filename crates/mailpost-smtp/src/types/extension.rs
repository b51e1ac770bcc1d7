//! EHLO capability keywords.

/// SMTP service extension announced in an EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH with the announced mechanisms
    Auth(Vec<AuthMechanism>),
    /// SIZE with the optional maximum message size
    Size(Option<usize>),
    /// 8BITMIME
    EightBitMime,
    /// PIPELINING (never used by this client)
    Pipelining,
    /// SMTPUTF8 (never used by this client)
    SmtpUtf8,
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Extension {
    /// Parses one capability line of an EHLO reply.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(words.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL mechanism named in an AUTH capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN
    Plain,
    /// LOGIN (the mechanism this client speaks)
    Login,
    /// CRAM-MD5
    CramMd5,
    /// `XOAUTH2`
    XOAuth2,
}

impl AuthMechanism {
    /// Parses a mechanism name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "XOAUTH2" => Some(Self::XOAuth2),
            _ => None,
        }
    }

    /// Returns the mechanism name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keywords() {
        let cases = [
            ("STARTTLS", Extension::StartTls),
            ("starttls", Extension::StartTls),
            ("8BITMIME", Extension::EightBitMime),
            ("PIPELINING", Extension::Pipelining),
            ("SMTPUTF8", Extension::SmtpUtf8),
            ("SIZE 35882577", Extension::Size(Some(35_882_577))),
            ("SIZE", Extension::Size(None)),
            ("X-CUSTOM foo", Extension::Unknown("X-CUSTOM foo".to_string())),
            ("", Extension::Unknown(String::new())),
        ];
        for (line, expected) in cases {
            assert_eq!(Extension::parse(line), expected, "line {line:?}");
        }
    }

    #[test]
    fn test_parse_auth_skips_unknown_mechanisms() {
        assert_eq!(
            Extension::parse("AUTH LOGIN PLAIN GSSAPI xoauth2"),
            Extension::Auth(vec![
                AuthMechanism::Login,
                AuthMechanism::Plain,
                AuthMechanism::XOAuth2
            ])
        );
    }

    #[test]
    fn test_mechanism_names_round_trip() {
        for mechanism in [
            AuthMechanism::Plain,
            AuthMechanism::Login,
            AuthMechanism::CramMd5,
            AuthMechanism::XOAuth2,
        ] {
            assert_eq!(AuthMechanism::parse(mechanism.as_str()), Some(mechanism));
        }
        assert_eq!(AuthMechanism::parse("GSSAPI"), None);
    }
}
