//! Session identity: the numeric user id the service binds to a session.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an identity candidate was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    FromCookie,
    FromDocument,
    FromLoginProvider,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FromCookie => "cookie",
            Self::FromDocument => "document",
            Self::FromLoginProvider => "login_provider",
        }
    }
}

/// A validated, strictly positive decimal user id.
///
/// The value is kept as the original decimal string; ids are never
/// round-tripped through floating point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    value: String,
    source: IdentitySource,
}

impl SessionIdentity {
    /// Accept `raw` only if it is a strictly positive decimal integer
    /// without leading zeros.
    pub fn parse(raw: &str, source: IdentitySource) -> Option<Self> {
        let candidate = raw.trim();
        if is_valid_identity(candidate) {
            Some(Self {
                value: candidate.to_string(),
                source,
            })
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    /// Same id, different provenance.
    pub fn with_source(&self, source: IdentitySource) -> Self {
        Self {
            value: self.value.clone(),
            source,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// `^[1-9][0-9]*$`
pub fn is_valid_identity(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    match bytes.first() {
        Some(b'1'..=b'9') => bytes.iter().all(u8::is_ascii_digit),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_empty_and_non_numeric() {
        for raw in ["0", "", "00", "012", "abc", "12a", "-5", "1.5"] {
            assert!(
                SessionIdentity::parse(raw, IdentitySource::FromCookie).is_none(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_positive_ids_and_keeps_source() {
        let id = SessionIdentity::parse("100012345678901", IdentitySource::FromDocument).unwrap();
        assert_eq!(id.as_str(), "100012345678901");
        assert_eq!(id.source(), IdentitySource::FromDocument);
        assert_eq!(id.to_string(), "100012345678901");
    }

    #[test]
    fn ids_longer_than_u64_stay_valid() {
        let long = "123456789012345678901234567890";
        assert!(SessionIdentity::parse(long, IdentitySource::FromCookie).is_some());
    }

    #[test]
    fn identities_key_hash_sets_by_value_and_source() {
        use std::collections::HashSet;

        let seen: HashSet<SessionIdentity> = [
            SessionIdentity::parse("42", IdentitySource::FromCookie).unwrap(),
            SessionIdentity::parse("42", IdentitySource::FromCookie).unwrap(),
            SessionIdentity::parse("42", IdentitySource::FromDocument).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(seen.len(), 2);
    }
}
