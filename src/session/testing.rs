//! Scripted collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::HttpError;
use crate::session::cookies::CookieStore;
use crate::session::http::{HttpClient, HttpResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub form: Vec<(String, String)>,
    pub cookie: Option<String>,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

type Handler = dyn Fn(&RecordedRequest) -> Result<HttpResponse, HttpError> + Send + Sync;

/// [`HttpClient`] answering from a closure and recording every request.
/// `set-cookie` headers of scripted responses are applied to the jar.
pub(crate) struct ScriptedHttp {
    handler: Box<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
}

impl ScriptedHttp {
    pub fn new(
        handler: impl Fn(&RecordedRequest) -> Result<HttpResponse, HttpError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, request: RecordedRequest, jar: &CookieStore) -> Result<HttpResponse, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let response = (self.handler)(&request)?;
        let set_cookies: Vec<&str> = response
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
            .collect();
        jar.apply_set_cookie_headers(&response.url, &set_cookies);
        Ok(response)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn get(&self, url: &str, jar: &CookieStore) -> Result<HttpResponse, HttpError> {
        let request = RecordedRequest {
            method: "GET",
            url: url.to_string(),
            form: Vec::new(),
            cookie: jar.header_for_url(url),
        };
        self.answer(request, jar)
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        jar: &CookieStore,
    ) -> Result<HttpResponse, HttpError> {
        let request = RecordedRequest {
            method: "POST",
            url: url.to_string(),
            form: form.to_vec(),
            cookie: jar.header_for_url(url),
        };
        self.answer(request, jar)
    }
}

pub(crate) fn page(url: &str, body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: Vec::new(),
        body: body.to_string(),
        url: url.to_string(),
    }
}

pub(crate) fn logged_in_page(url: &str, uid: &str) -> HttpResponse {
    page(
        url,
        &format!(
            r#"<script>["CurrentUserInitialData",[],{{"ACCOUNT_ID":"{uid}","USER_ID":"{uid}","NAME":"Test User"}},270]["DTSGInitialData",[],{{"token":"dtsg-{uid}"}},258]</script>"#
        ),
    )
}
