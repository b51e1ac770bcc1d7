//! Email address types.

use crate::error::{Error, Result};

/// Email address for SMTP envelope.
///
/// Accepts `local@domain` where neither side contains whitespace, `@`,
/// `<` or `>`, and the domain has a dot with text on both sides. Only
/// ASCII addresses are accepted since SMTPUTF8 is never negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain part.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if !addr.is_ascii() || addr.chars().any(|c| c.is_ascii_control()) {
            return Err(Error::InvalidAddress(format!(
                "Address must be printable ASCII: {addr}"
            )));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("Address must contain @: {addr}")));
        };

        let forbidden = |c: char| c.is_whitespace() || matches!(c, '@' | '<' | '>');
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "Local and domain parts cannot be empty: {addr}"
            )));
        }
        if local.contains(forbidden) || domain.contains(forbidden) {
            return Err(Error::InvalidAddress(format!(
                "Address contains a forbidden character: {addr}"
            )));
        }

        let dotted = domain
            .char_indices()
            .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len());
        if !dotted {
            return Err(Error::InvalidAddress(format!(
                "Domain must contain a dot: {addr}"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Mailbox (optional display name + address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a new mailbox with just an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: None,
            address: Address::new(address)?,
        })
    }

    /// Creates a new mailbox with a display name and address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: Some(name.into()),
            address: Address::new(address)?,
        })
    }

    /// Parses `Name <local@domain>`, `<local@domain>` or a bare address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        match (input.rfind('<'), input.rfind('>')) {
            (Some(open), Some(close)) if open < close => {
                let address = Address::new(input[open + 1..close].trim())?;
                let name = input[..open].trim().trim_matches('"').trim();
                Ok(Self {
                    name: (!name.is_empty()).then(|| name.to_string()),
                    address,
                })
            }
            _ => Self::new(input),
        }
    }
}

impl std::fmt::Display for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        for addr in ["a@b.com", "a.b+tag@sub.b.com", "user@example.co.uk"] {
            assert_eq!(Address::new(addr).unwrap().as_str(), addr);
        }
    }

    #[test]
    fn test_invalid_addresses() {
        for addr in [
            "",
            "not-an-email",
            "a@",
            "@b.com",
            "a@b",
            "a@.com",
            "a@b.",
            "a@@b.com",
            "a b@c.com",
            "<a@b.com>",
            "a@b.com\r\nRCPT TO:<x@y.com>",
            "ü@b.com",
        ] {
            assert!(Address::new(addr).is_err(), "accepted {addr:?}");
        }
    }

    #[test]
    fn test_domain() {
        assert_eq!(Address::new("user@mail.example.com").unwrap().domain(), "mail.example.com");
    }

    #[test]
    fn test_mailbox_new() {
        let mailbox = Mailbox::new("user@example.com").unwrap();
        assert_eq!(mailbox.address.as_str(), "user@example.com");
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_mailbox_with_name() {
        let mailbox = Mailbox::with_name("John Doe", "john@example.com").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("John Doe"));
        assert_eq!(mailbox.to_string(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_mailbox_parse() {
        let mailbox = Mailbox::parse("\"Jane Roe\" <jane@example.com>").unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Jane Roe"));
        assert_eq!(mailbox.address.as_str(), "jane@example.com");

        let mailbox = Mailbox::parse("<jane@example.com>").unwrap();
        assert!(mailbox.name.is_none());

        let mailbox = Mailbox::parse("  jane@example.com ").unwrap();
        assert_eq!(mailbox.address.as_str(), "jane@example.com");

        assert!(Mailbox::parse("Jane <not-an-email>").is_err());
    }
}
