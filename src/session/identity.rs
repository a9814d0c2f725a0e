//! SIP identities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a callable party (roster id, SIP user part)
pub type PartyId = String;

/// `<user>@<realm>`, rendered as a `sips:` URI
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    pub user: String,
    pub realm: String,
}

impl SipUri {
    pub fn new(user: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            realm: realm.into(),
        }
    }

    /// Parses `user`, `user@realm`, `sip:user@realm` or `sips:user@realm;params`.
    /// A bare user is placed in `default_realm`.
    pub fn parse(input: &str, default_realm: &str) -> Option<Self> {
        let trimmed = input.trim();
        let without_scheme = trimmed
            .strip_prefix("sips:")
            .or_else(|| trimmed.strip_prefix("sip:"))
            .unwrap_or(trimmed);
        let without_params = without_scheme
            .split(';')
            .next()
            .unwrap_or(without_scheme);

        let (user, realm) = match without_params.split_once('@') {
            Some((user, realm)) => (user, realm),
            None => (without_params, default_realm),
        };

        let valid = |part: &str| {
            !part.is_empty() && !part.chars().any(|c| c.is_whitespace() || c == '@' || c == ':')
        };
        if !valid(user) || !valid(realm) {
            return None;
        }
        Some(Self::new(user, realm))
    }

    /// Same user in the same realm (realm compared case-insensitively)
    pub fn same_identity(&self, other: &SipUri) -> bool {
        self.user == other.user && self.realm.eq_ignore_ascii_case(&other.realm)
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sips:{}@{}", self.user, self.realm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let realm = "fs1.example.com";
        assert_eq!(
            SipUri::parse("1000", realm),
            Some(SipUri::new("1000", realm))
        );
        assert_eq!(
            SipUri::parse("1000@other.org", realm),
            Some(SipUri::new("1000", "other.org"))
        );
        assert_eq!(
            SipUri::parse("sips:1000@fs1.example.com;transport=tls", realm),
            Some(SipUri::new("1000", realm))
        );
        assert_eq!(
            SipUri::parse(" sip:doctor1@fs1.example.com ", realm),
            Some(SipUri::new("doctor1", realm))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(SipUri::parse("", "r"), None);
        assert_eq!(SipUri::parse("   ", "r"), None);
        assert_eq!(SipUri::parse("@realm", "r"), None);
        assert_eq!(SipUri::parse("user@", "r"), None);
        assert_eq!(SipUri::parse("two words", "r"), None);
        assert_eq!(SipUri::parse("a@b@c", "r"), None);
    }

    #[test]
    fn test_display_and_identity() {
        let uri = SipUri::new("1000", "Example.COM");
        assert_eq!(uri.to_string(), "sips:1000@Example.COM");
        assert!(uri.same_identity(&SipUri::new("1000", "example.com")));
        assert!(!uri.same_identity(&SipUri::new("1001", "example.com")));
    }
}
