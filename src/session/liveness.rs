//! Session liveness signals.
//!
//! Everything here is a pure function over a fetched document and/or a
//! cookie set. Absent or malformed input yields "no identity", never an
//! error.

use std::sync::LazyLock;

use regex::Regex;

use crate::session::cookies::Cookie;
use crate::session::identity::{IdentitySource, SessionIdentity};

/// Identity cookie names, in lookup order.
pub const IDENTITY_COOKIES: [&str; 2] = ["i_user", "c_user"];

/// Path marker present in documents served while the account is held at a
/// checkpoint.
pub const CHECKPOINT_MARKER: &str = "/checkpoint/block/?next";

/// Path fragment of the automation-challenge interstitial.
pub const AUTOMATION_CHALLENGE_MARKER: &str = "checkpoint/601051028565049";

static USER_ID_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""USER_ID"\s*:\s*"(\d+)""#).ok());

static CURRENT_USER_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\["CurrentUserInitialData",\[\],\{.*?"USER_ID":"(\d+)".*?\},\d+\]"#).ok()
});

/// Outcome of classifying one fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The document itself confirms a valid identity.
    Live(SessionIdentity),
    /// Only the cookies carry a valid identity; the page does not.
    CookieOnly(SessionIdentity),
    /// The page is a checkpoint interstitial.
    Checkpointed,
    /// No valid identity anywhere.
    Dead,
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        match self {
            Self::Live(id) | Self::CookieOnly(id) => Some(id),
            Self::Checkpointed | Self::Dead => None,
        }
    }
}

/// First valid identity carried by the recognized identity cookies.
pub fn identity_from_cookies(cookies: &[Cookie]) -> Option<SessionIdentity> {
    IDENTITY_COOKIES.iter().find_map(|name| {
        cookies
            .iter()
            .filter(|c| c.name == *name)
            .find_map(|c| SessionIdentity::parse(&c.value, IdentitySource::FromCookie))
    })
}

/// Identity embedded in the document's user-id field.
pub fn identity_from_document(html: &str) -> Option<SessionIdentity> {
    [&USER_ID_FIELD, &CURRENT_USER_BLOCK]
        .into_iter()
        .filter_map(|re| re.as_ref())
        .find_map(|re| {
            re.captures(html)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str())
        })
        .and_then(|raw| SessionIdentity::parse(raw, IdentitySource::FromDocument))
}

/// Cookie-derived identity first, else the document's.
pub fn extract_identity(html: Option<&str>, cookies: &[Cookie]) -> Option<SessionIdentity> {
    identity_from_cookies(cookies).or_else(|| html.and_then(identity_from_document))
}

pub fn is_checkpointed(html: &str) -> bool {
    html.contains(CHECKPOINT_MARKER)
}

/// Whether a response's resolved URL is the automation-challenge page.
pub fn is_automation_challenge(resolved_url: &str) -> bool {
    resolved_url.contains(AUTOMATION_CHALLENGE_MARKER)
}

/// Classify a fetched page together with the cookies it was fetched with.
///
/// A checkpointed page is never live, whatever the cookies say.
pub fn classify(html: &str, cookies: &[Cookie]) -> Liveness {
    if is_checkpointed(html) {
        return Liveness::Checkpointed;
    }
    if let Some(identity) = identity_from_document(html) {
        return Liveness::Live(identity);
    }
    match identity_from_cookies(cookies) {
        Some(identity) => Liveness::CookieOnly(identity),
        None => Liveness::Dead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::cookies::CookieStore;

    fn cookies(header: &str) -> Vec<Cookie> {
        let store = CookieStore::new();
        store.import_header_string(header);
        store.snapshot()
    }

    #[test]
    fn identity_cookie_requires_positive_integer() {
        for (value, expected) in [
            ("1001", Some("1001")),
            ("0", None),
            ("", None),
            ("abc", None),
            ("-5", None),
            ("0012", None),
            ("12a", None),
        ] {
            let jar = cookies(&format!("c_user={value}"));
            assert_eq!(
                identity_from_cookies(&jar).as_ref().map(|i| i.as_str()),
                expected,
                "c_user={value:?}"
            );
        }
    }

    #[test]
    fn i_user_takes_priority_over_c_user() {
        let jar = cookies("c_user=111; i_user=222");
        assert_eq!(identity_from_cookies(&jar).unwrap().as_str(), "222");
    }

    #[test]
    fn invalid_i_user_falls_back_to_c_user() {
        let jar = cookies("i_user=0; c_user=333");
        assert_eq!(identity_from_cookies(&jar).unwrap().as_str(), "333");
    }

    #[test]
    fn only_zero_identity_is_no_identity() {
        let jar = cookies("i_user=0");
        assert!(extract_identity(Some("<html></html>"), &jar).is_none());
    }

    #[test]
    fn document_identity_strategies() {
        let html = r#"<script>{"ACCOUNT_ID":"0","USER_ID":"4455","NAME":"x"}</script>"#;
        let id = identity_from_document(html).unwrap();
        assert_eq!(id.as_str(), "4455");
        assert_eq!(id.source(), IdentitySource::FromDocument);

        let zero = r#"{"USER_ID":"0"}"#;
        assert!(identity_from_document(zero).is_none());
        assert!(identity_from_document("").is_none());
    }

    #[test]
    fn checkpoint_wins_over_cookie_identity() {
        let jar = cookies("c_user=998877");
        let html = r#"<a href="/checkpoint/block/?next=%2F">continue</a> "USER_ID":"998877""#;
        assert!(is_checkpointed(html));
        assert_eq!(classify(html, &jar), Liveness::Checkpointed);
    }

    #[test]
    fn classify_distinguishes_cookie_only() {
        let jar = cookies("c_user=998877");
        let state = classify("<html>login</html>", &jar);
        assert_eq!(
            state,
            Liveness::CookieOnly(
                SessionIdentity::parse("998877", IdentitySource::FromCookie).unwrap()
            )
        );
        assert!(!state.is_live());
        assert_eq!(classify("<html></html>", &[]), Liveness::Dead);
    }

    #[test]
    fn automation_challenge_matches_resolved_url() {
        assert!(is_automation_challenge(
            "https://www.facebook.com/checkpoint/601051028565049/?next=1"
        ));
        assert!(!is_automation_challenge("https://www.facebook.com/"));
    }
}
