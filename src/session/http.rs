//! Cookie-bound HTTP primitives.
//!
//! Every request sends the store's `Cookie` header for its URL and every
//! response hop feeds its `Set-Cookie` headers back into the store in one
//! update. Redirects are followed by hand so cookies set on intermediate
//! hops are not lost.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::{Method, StatusCode};
use url::Url;

use crate::error::HttpError;
use crate::session::cookies::CookieStore;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Response of the final hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// URL of the final hop after redirects.
    pub url: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// GET/POST bound to a cookie jar.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, jar: &CookieStore) -> Result<HttpResponse, HttpError>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        jar: &CookieStore,
    ) -> Result<HttpResponse, HttpError>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| HttpError::RequestFailed {
                url: String::new(),
                reason: format!("client init failed: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        form: Option<&[(String, String)]>,
        jar: &CookieStore,
    ) -> Result<HttpResponse, HttpError> {
        let mut current = parse_url(url)?;
        let mut method = method;
        let mut form = form;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self
                .client
                .request(method.clone(), current.clone())
                .header(ACCEPT, "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
            if let Some(cookie) = jar.header_for_url(current.as_str()) {
                request = request.header(COOKIE, cookie);
            }
            if let Some(fields) = form {
                request = request.form(fields);
            }

            let response = request.send().await.map_err(|e| HttpError::RequestFailed {
                url: current.to_string(),
                reason: e.to_string(),
            })?;

            let set_cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect();
            if !set_cookies.is_empty() {
                let applied = jar.apply_set_cookie_headers(current.as_str(), &set_cookies);
                tracing::trace!("Applied {} cookie(s) from {}", applied, current);
            }

            let status = response.status();
            if status.is_redirection()
                && let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
            {
                let next = resolve_location(&current, location)?;
                tracing::debug!("Following {} redirect to {}", status.as_u16(), next);
                if !matches!(
                    status,
                    StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                ) {
                    method = Method::GET;
                    form = None;
                }
                current = next;
                continue;
            }

            let headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| {
                    v.to_str()
                        .ok()
                        .map(|v| (k.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = response.text().await.map_err(|e| HttpError::RequestFailed {
                url: current.to_string(),
                reason: format!("failed to read body: {e}"),
            })?;

            return Ok(HttpResponse {
                status: status.as_u16(),
                headers,
                body,
                url: current.to_string(),
            });
        }

        Err(HttpError::TooManyRedirects {
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, jar: &CookieStore) -> Result<HttpResponse, HttpError> {
        self.execute(Method::GET, url, None, jar).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        jar: &CookieStore,
    ) -> Result<HttpResponse, HttpError> {
        self.execute(Method::POST, url, Some(form), jar).await
    }
}

fn parse_url(url: &str) -> Result<Url, HttpError> {
    Url::parse(url).map_err(|e| HttpError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Resolve a `Location` header against the URL that returned it.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, HttpError> {
    base.join(location).map_err(|e| HttpError::InvalidUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })
}
