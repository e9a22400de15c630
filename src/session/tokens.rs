//! Ephemeral page tokens and their extraction strategies.
//!
//! Each token is described by a [`TokenRule`]: an ordered list of
//! [`Extractor`]s tried until one yields a non-empty value. The structured
//! script markers come first, the legacy form attributes after.

use std::sync::LazyLock;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;

/// One way of pulling a token out of a document.
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    /// Text between the first `start` and the next `end` after it.
    Between {
        start: &'static str,
        end: &'static str,
    },
    /// First capture group of a regular expression, compiled once.
    Pattern(&'static LazyLock<Option<Regex>>),
}

impl Extractor {
    pub fn extract(&self, body: &str) -> Option<String> {
        let found = match *self {
            Self::Between { start, end } => {
                let from = body.find(start)? + start.len();
                let len = body[from..].find(end)?;
                body[from..from + len].to_string()
            }
            Self::Pattern(pattern) => {
                let Some(re) = LazyLock::force(pattern).as_ref() else {
                    tracing::error!("Token pattern failed to compile, strategy skipped");
                    return None;
                };
                re.captures(body)?.get(1)?.as_str().to_string()
            }
        };
        (!found.is_empty()).then_some(found)
    }
}

/// Named token with its fallback order.
#[derive(Debug, Clone, Copy)]
pub struct TokenRule {
    pub name: &'static str,
    pub strategies: &'static [Extractor],
}

impl TokenRule {
    pub fn extract(&self, body: &str) -> Option<String> {
        self.strategies.iter().find_map(|s| s.extract(body))
    }
}

static FB_DTSG_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"name="fb_dtsg"\s+value="([^"]+)""#).ok());

static JAZOEST_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"name="jazoest"\s+value="([^"]+)""#).ok());

static LSD_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"name="lsd"\s+value="([^"]+)""#).ok());

static DTSG_INITIAL_DATA: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"DTSGInitialData.*?token":"(.*?)""#).ok());

pub static FB_DTSG: TokenRule = TokenRule {
    name: "fb_dtsg",
    strategies: &[
        Extractor::Between {
            start: r#""DTSGInitData",[],{"token":""#,
            end: r#"","#,
        },
        Extractor::Pattern(&FB_DTSG_FIELD),
    ],
};

pub static JAZOEST: TokenRule = TokenRule {
    name: "jazoest",
    strategies: &[
        Extractor::Between {
            start: r#"name="jazoest" value=""#,
            end: r#"""#,
        },
        Extractor::Between {
            start: "jazoest=",
            end: r#"","#,
        },
        Extractor::Pattern(&JAZOEST_FIELD),
    ],
};

pub static LSD: TokenRule = TokenRule {
    name: "lsd",
    strategies: &[
        Extractor::Between {
            start: r#"["LSD",[],{"token":""#,
            end: r#""}"#,
        },
        Extractor::Pattern(&LSD_FIELD),
    ],
};

/// fb_dtsg as embedded in a logged-in page, used for later requests.
pub static DTSG_INITIAL: TokenRule = TokenRule {
    name: "fb_dtsg",
    strategies: &[
        Extractor::Pattern(&DTSG_INITIAL_DATA),
        Extractor::Between {
            start: r#""DTSGInitData",[],{"token":""#,
            end: r#"","#,
        },
    ],
};

/// Device client id of the realtime channel.
pub static MQTT_CLIENT_ID: TokenRule = TokenRule {
    name: "clientID",
    strategies: &[Extractor::Between {
        start: r#"["MqttWebDeviceID",[],{"clientID":""#,
        end: r#""}"#,
    }],
};

/// The three tokens the automation-challenge dismissal is signed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassTokens {
    pub fb_dtsg: String,
    pub jazoest: String,
    pub lsd: String,
}

impl BypassTokens {
    /// Extract all three tokens, or name the first one missing.
    pub fn extract(body: &str) -> Result<Self, &'static str> {
        let get = |rule: &TokenRule| rule.extract(body).ok_or(rule.name);
        Ok(Self {
            fb_dtsg: get(&FB_DTSG)?,
            jazoest: get(&JAZOEST)?,
            lsd: get(&LSD)?,
        })
    }
}

/// Default lifetime of a cached fb_dtsg token.
pub const DEFAULT_DTSG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cached fb_dtsg token with a TTL.
///
/// Owned by the session; the recovery machine invalidates it whenever it
/// observes a checkpoint.
#[derive(Debug)]
pub struct DtsgCache {
    ttl: Duration,
    entry: Mutex<Option<(String, Instant)>>,
}

impl DtsgCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached token if it has not expired.
    pub fn get(&self) -> Option<String> {
        let mut entry = self.entry.lock();
        match entry.as_ref() {
            Some((token, stored_at)) if stored_at.elapsed() < self.ttl => Some(token.clone()),
            Some(_) => {
                *entry = None;
                None
            }
            None => None,
        }
    }

    pub fn store(&self, token: impl Into<String>) {
        *self.entry.lock() = Some((token.into(), Instant::now()));
    }

    /// Extract a fresh token from `body` and cache it.
    pub fn refresh_from(&self, body: &str) -> Option<String> {
        let token = DTSG_INITIAL.extract(body)?;
        self.store(token.clone());
        Some(token)
    }

    pub fn invalidate(&self) {
        if self.entry.lock().take().is_some() {
            tracing::debug!("fb_dtsg cache invalidated");
        }
    }
}

impl Default for DtsgCache {
    fn default() -> Self {
        Self::new(DEFAULT_DTSG_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURED: &str = r#"<script>["DTSGInitData",[],{"token":"AQH-dtsg","async_get_token":"x"},1]
        ["LSD",[],{"token":"lsd-structured"},323]
        <input type="hidden" name="jazoest" value="25521" /></script>"#;

    const LEGACY: &str = r#"<form><input type="hidden" name="fb_dtsg" value="legacy-dtsg" autocomplete="off" />
        <input type="hidden" name="lsd" value="legacy-lsd" />
        <a href="/x?jazoest=21987",></a></form>"#;

    #[test]
    fn structured_markers_come_first() {
        let tokens = BypassTokens::extract(STRUCTURED).unwrap();
        assert_eq!(tokens.fb_dtsg, "AQH-dtsg");
        assert_eq!(tokens.lsd, "lsd-structured");
        assert_eq!(tokens.jazoest, "25521");
    }

    #[test]
    fn legacy_attributes_are_the_fallback() {
        let tokens = BypassTokens::extract(LEGACY).unwrap();
        assert_eq!(tokens.fb_dtsg, "legacy-dtsg");
        assert_eq!(tokens.lsd, "legacy-lsd");
        assert_eq!(tokens.jazoest, "21987");
    }

    #[test]
    fn missing_token_is_named() {
        let body = r#"name="fb_dtsg" value="d" name="jazoest" value="1""#;
        assert_eq!(BypassTokens::extract(body), Err("lsd"));
    }

    #[test]
    fn empty_capture_counts_as_missing() {
        let between = Extractor::Between {
            start: "a=",
            end: ";",
        };
        assert_eq!(between.extract("a=;"), None);
        assert_eq!(between.extract("a=1;"), Some("1".to_string()));
        assert_eq!(between.extract("a=1"), None);
    }

    #[test]
    fn client_id_and_initial_dtsg() {
        let body = r#"["MqttWebDeviceID",[],{"clientID":"c0ffee"}],["DTSGInitialData",[],{"token":"tok123"},258]"#;
        assert_eq!(MQTT_CLIENT_ID.extract(body).as_deref(), Some("c0ffee"));
        assert_eq!(DTSG_INITIAL.extract(body).as_deref(), Some("tok123"));
    }

    #[test]
    fn every_pattern_strategy_compiles() {
        for rule in [&FB_DTSG, &JAZOEST, &LSD, &DTSG_INITIAL, &MQTT_CLIENT_ID] {
            for strategy in rule.strategies {
                if let Extractor::Pattern(pattern) = strategy {
                    assert!(LazyLock::force(pattern).is_some(), "{} pattern", rule.name);
                }
            }
        }
    }

    #[test]
    fn compiled_patterns_serve_repeated_documents() {
        for value in ["first", "second", "third"] {
            let body = format!(r#"<input name="fb_dtsg"  value="{value}" />"#);
            assert_eq!(FB_DTSG.extract(&body).as_deref(), Some(value));
        }
        assert_eq!(FB_DTSG.extract("<input name=\"fb_dtsg\" value=\"\" />"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dtsg_cache_expires_and_invalidates() {
        let cache = DtsgCache::new(Duration::from_secs(60));
        assert_eq!(cache.get(), None);

        cache.store("one");
        assert_eq!(cache.get().as_deref(), Some("one"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(), None);

        cache.store("two");
        cache.invalidate();
        assert_eq!(cache.get(), None);
    }
}
