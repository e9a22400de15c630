//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use fca_session::error::{HttpError, LoginError};
use fca_session::realtime::{InboundMessage, MemoryTransport, PublishedMessage};
use fca_session::session::{
    CookieStore, HttpClient, HttpResponse, LoginGrant, LoginProvider, LoginRequest,
    RecoveryOptions, Session, SessionRecovery, SessionSeed,
};

type Route = dyn Fn(&str, Option<&str>) -> HttpResponse + Send + Sync;

/// Answers every GET from a routing closure given the URL and the cookie
/// header the jar would send.
pub struct FakeWeb {
    route: Box<Route>,
    pub visited: Mutex<Vec<String>>,
}

impl FakeWeb {
    pub fn new(route: impl Fn(&str, Option<&str>) -> HttpResponse + Send + Sync + 'static) -> Self {
        Self {
            route: Box::new(route),
            visited: Mutex::new(Vec::new()),
        }
    }

    /// A site where whoever holds `c_user=<uid>` sees a logged-in page.
    pub fn trusting_cookies() -> Self {
        Self::new(|url, cookie| match cookie.and_then(cookie_uid) {
            Some(uid) => logged_in_page(url, &uid),
            None => logged_out_page(url),
        })
    }

    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

#[async_trait]
impl HttpClient for FakeWeb {
    async fn get(&self, url: &str, jar: &CookieStore) -> Result<HttpResponse, HttpError> {
        self.visited.lock().push(url.to_string());
        let cookie = jar.header_for_url(url);
        Ok((self.route)(url, cookie.as_deref()))
    }

    async fn post_form(
        &self,
        url: &str,
        _form: &[(String, String)],
        jar: &CookieStore,
    ) -> Result<HttpResponse, HttpError> {
        self.get(url, jar).await
    }
}

/// Login provider replaying scripted outcomes in order.
pub struct ScriptedLogin {
    outcomes: Mutex<VecDeque<Result<LoginGrant, LoginError>>>,
    pub emails: Mutex<Vec<String>>,
}

impl ScriptedLogin {
    pub fn new(outcomes: Vec<Result<LoginGrant, LoginError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            emails: Mutex::new(Vec::new()),
        }
    }

    pub fn granting(pairs: &[&str]) -> Self {
        Self::new(vec![Ok(LoginGrant {
            identity: None,
            access_token: None,
            cookie_pairs: pairs.iter().map(|p| p.to_string()).collect(),
        })])
    }

    pub fn calls(&self) -> usize {
        self.emails.lock().len()
    }
}

#[async_trait]
impl LoginProvider for ScriptedLogin {
    async fn login(&self, request: &LoginRequest) -> Result<LoginGrant, LoginError> {
        self.emails.lock().push(request.email.clone());
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LoginError::Rejected("no scripted outcome left".into())))
    }
}

pub fn cookie_uid(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "c_user")
        .map(|(_, value)| value.to_string())
}

pub fn page(url: &str, body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: Vec::new(),
        body: body.to_string(),
        url: url.to_string(),
    }
}

pub fn logged_in_page(url: &str, uid: &str) -> HttpResponse {
    page(
        url,
        &format!(
            r#"<script>["CurrentUserInitialData",[],{{"ACCOUNT_ID":"{uid}","USER_ID":"{uid}","NAME":"Integration"}},270]["DTSGInitData",[],{{"token":"dtsg-{uid}","async_get_token":"a"}},258]"endpoint":"wss://edge-chat.facebook.com/chat?region=sin"</script>"#
        ),
    )
}

pub fn logged_out_page(url: &str) -> HttpResponse {
    page(url, "<html><form id=\"login_form\"></form></html>")
}

pub fn checkpoint_page(url: &str) -> HttpResponse {
    page(url, r#"<a href="/checkpoint/block/?next=%2F">Continue</a>"#)
}

/// Fast retries so paused-clock tests stay short.
pub fn quick_options() -> RecoveryOptions {
    RecoveryOptions {
        base_delay: Duration::from_millis(10),
        ..RecoveryOptions::default()
    }
}

/// A logged-in session for `uid` wired to an in-memory realtime channel.
pub struct Connected {
    pub session: Arc<Session>,
    pub transport: Arc<MemoryTransport>,
    pub published: mpsc::UnboundedReceiver<PublishedMessage>,
    pub inbound: mpsc::Sender<InboundMessage>,
}

pub async fn connected_session(uid: &str, reply_timeout: Duration) -> Connected {
    let recovery = SessionRecovery::new(
        Arc::new(FakeWeb::trusting_cookies()),
        Arc::new(CookieStore::new()),
        quick_options(),
    );
    let (session, _) = Session::login(
        Arc::new(recovery),
        Some(SessionSeed::CookieHeader(format!("c_user={uid}; xs=token"))),
        reply_timeout,
    )
    .await
    .expect("login");
    let session = Arc::new(session);

    let (transport, published) = MemoryTransport::new();
    let transport = Arc::new(transport);
    let (inbound, inbound_rx) = mpsc::channel(32);
    session.attach_transport(transport.clone(), inbound_rx);
    Connected {
        session,
        transport,
        published,
        inbound,
    }
}
