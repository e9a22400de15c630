//! Facts scraped from the logged-in page that later stages need: where the
//! realtime channel lives, the request-signing token and the device id.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::session::identity::SessionIdentity;
use crate::session::tokens::{DTSG_INITIAL, MQTT_CLIENT_ID};

pub const DEFAULT_REGION: &str = "PRN";

/// A realtime edge region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub location: &'static str,
}

pub const REGIONS: [Region; 11] = [
    Region { code: "PRN", name: "Pacific Northwest Region", location: "Pacific Northwest" },
    Region { code: "VLL", name: "Valley Region", location: "Valley" },
    Region { code: "ASH", name: "Ashburn Region", location: "Ashburn" },
    Region { code: "DFW", name: "Dallas/Fort Worth Region", location: "Dallas/Fort Worth" },
    Region { code: "LLA", name: "Los Angeles Region", location: "Los Angeles" },
    Region { code: "FRA", name: "Frankfurt", location: "Frankfurt" },
    Region { code: "SIN", name: "Singapore", location: "Singapore" },
    Region { code: "NRT", name: "Tokyo", location: "Japan" },
    Region { code: "HKG", name: "Hong Kong", location: "Hong Kong" },
    Region { code: "SYD", name: "Sydney", location: "Sydney" },
    Region { code: "PNB", name: "Pacific Northwest - Beta", location: "Pacific Northwest" },
];

pub fn region_info(code: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}

static ENDPOINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""endpoint":"([^"]+)""#).ok());

static ESCAPED_ENDPOINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"endpoint\\":\\"([^\\"]+)\\""#).ok());

static USER_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"\["CurrentUserInitialData",\[\],\{.*?"NAME":"([^"]*)""#).ok()
});

/// Realtime endpoint URL, unescaped.
pub fn parse_endpoint(html: &str) -> Option<String> {
    let capture = |re: &LazyLock<Option<Regex>>| {
        re.as_ref()
            .and_then(|re| re.captures(html))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    };
    capture(&ENDPOINT)
        .or_else(|| capture(&ESCAPED_ENDPOINT))
        .map(|raw| raw.replace("\\/", "/"))
}

/// Region code from the endpoint's `region` query parameter, upper-cased.
pub fn parse_region(endpoint: Option<&str>) -> String {
    endpoint
        .and_then(|raw| Url::parse(raw).ok())
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "region")
                .map(|(_, v)| v.to_uppercase())
        })
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

/// Post-login session facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub identity: SessionIdentity,
    pub endpoint: Option<String>,
    pub region: String,
    pub fb_dtsg: Option<String>,
    pub client_id: Option<String>,
    pub user_name: Option<String>,
}

impl SessionContext {
    pub fn from_document(identity: SessionIdentity, html: &str) -> Self {
        let endpoint = parse_endpoint(html);
        let region = parse_region(endpoint.as_deref());
        let user_name = USER_NAME
            .as_ref()
            .and_then(|re| re.captures(html))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|name| !name.is_empty());

        Self {
            identity,
            region,
            endpoint,
            fb_dtsg: DTSG_INITIAL.extract(html),
            client_id: MQTT_CLIENT_ID.extract(html),
            user_name,
        }
    }

    pub fn region_info(&self) -> Option<&'static Region> {
        region_info(&self.region)
    }
}
