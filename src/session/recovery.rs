//! Authentication recovery.
//!
//! Recovery walks a fixed ladder until one rung yields a live session:
//!
//! 1. **Seeded**: import the caller's cookie header or app state and probe
//!    the origin page.
//! 2. **Backup restore**: import the most recent stored snapshot and probe
//!    again.
//! 3. **Credential login**: ask the login provider for fresh cookies, then
//!    refresh the mobile and desktop origins until the page confirms the
//!    identity.
//! 4. **Session activation**: when only the cookies carry an identity, hit
//!    the home pages once or twice before settling for a degraded session.
//!
//! Every probe runs through the automation bypass, and a checkpointed page
//! never counts as success. One recovery runs at a time per session.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backup::{BackupSink, SnapshotKind};
use crate::error::{CookieError, DatabaseError, HttpError, LoginError, SessionError};
use crate::session::bypass::{AutomationBypass, BypassState};
use crate::session::cookies::{
    AppStateCookie, CookieStore, DEFAULT_COOKIE_DOMAIN, ORIGIN_URL, normalize_cookie_header,
    parse_app_state,
};
use crate::session::http::{HttpClient, HttpResponse};
use crate::session::identity::SessionIdentity;
use crate::session::liveness::{self, Liveness};
use crate::session::login_provider::{
    LoginGrant, LoginProvider, LoginRequest, mask, redact_sensitive_detail,
};
use crate::session::tokens::DtsgCache;

pub const MOBILE_ORIGIN_URL: &str = "https://m.facebook.com/";
pub const MOBILE_HOME_URL: &str = "https://m.facebook.com/home.php";
pub const DESKTOP_HOME_URL: &str = "https://www.facebook.com/home.php";

/// Hosts refreshed after a credential login, in rotation. The mobile host
/// goes first: it establishes the session more reliably after a fresh login.
const POST_LOGIN_URLS: [&str; 2] = [MOBILE_ORIGIN_URL, ORIGIN_URL];

/// Pause between importing provider cookies and the first refresh.
const POST_LOGIN_SETTLE: Duration = Duration::from_millis(500);

const ACTIVATION_STEPS: [(Duration, &str); 2] = [
    (Duration::from_millis(1000), MOBILE_HOME_URL),
    (Duration::from_millis(1500), DESKTOP_HOME_URL),
];

/// Rung of the recovery ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    Seeded,
    BackupRestore,
    CredentialLogin,
    SessionActivation,
}

impl RecoveryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::BackupRestore => "backup_restore",
            Self::CredentialLogin => "credential_login",
            Self::SessionActivation => "session_activation",
        }
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Email/password login material.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
    /// Base32 TOTP secret.
    pub two_factor: Option<SecretString>,
}

/// What the caller hands to a login.
#[derive(Debug, Clone)]
pub enum SessionSeed {
    /// A raw `Cookie` header, with or without the `Cookie:` prefix.
    CookieHeader(String),
    /// A structured app-state export.
    AppState(Vec<AppStateCookie>),
    /// Explicit credentials. Supplying these permits a credential login
    /// even when auto-login is disabled.
    Credentials(Credentials),
}

impl SessionSeed {
    /// Interpret free text: a JSON array is app state, anything else is a
    /// cookie header.
    pub fn from_text(raw: &str) -> Self {
        if raw.trim_start().starts_with('[')
            && let Ok(entries) = parse_app_state(raw)
        {
            return Self::AppState(entries);
        }
        Self::CookieHeader(raw.to_string())
    }

    /// Parse a JSON app-state array.
    pub fn from_app_state_json(raw: &str) -> Result<Self, CookieError> {
        parse_app_state(raw).map(Self::AppState)
    }

    /// Whether this seed carries session state rather than credentials.
    pub fn carries_session_state(&self) -> bool {
        !matches!(self, Self::Credentials(_))
    }
}

/// Tunables for one recovery machine.
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    pub auto_login: bool,
    pub credentials: Option<Credentials>,
    /// Attempts per transient step (fetches, provider calls).
    pub max_attempts: u32,
    /// Base of the escalating retry delay: `base_delay * attempt`.
    pub base_delay: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            auto_login: true,
            credentials: None,
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

/// Per-attempt scratch state.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    stage: Option<RecoveryStage>,
    document: String,
    explicit_seed: bool,
    attempts: u32,
    max_attempts: u32,
    checkpoint_seen: bool,
}

impl RecoveryContext {
    pub fn new(explicit_seed: bool, max_attempts: u32) -> Self {
        Self {
            stage: None,
            document: String::new(),
            explicit_seed,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            checkpoint_seen: false,
        }
    }

    /// Move to `stage`, resetting the retry budget.
    pub fn enter(&mut self, stage: RecoveryStage) {
        tracing::debug!("Recovery entering stage {}", stage);
        self.stage = Some(stage);
        self.attempts = 0;
    }

    /// Current stage; `Seeded` before any stage has been entered.
    pub fn stage(&self) -> RecoveryStage {
        self.stage.unwrap_or(RecoveryStage::Seeded)
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn explicit_seed(&self) -> bool {
        self.explicit_seed
    }

    pub fn checkpoint_seen(&self) -> bool {
        self.checkpoint_seen
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count one attempt; returns its 1-based number.
    fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    fn observe(&mut self, document: &str) {
        self.document = document.to_string();
    }

    fn mark_checkpoint(&mut self) {
        self.checkpoint_seen = true;
    }
}

/// A session recovery produced.
#[derive(Debug)]
pub struct RecoveredSession {
    pub identity: SessionIdentity,
    /// Stage that produced the session.
    pub stage: RecoveryStage,
    /// The page never confirmed the identity; only the cookies did.
    pub degraded: bool,
    /// Last fetched document.
    pub document: String,
    /// Background snapshot write, if a backup sink is configured.
    pub backup_task: Option<JoinHandle<()>>,
}

struct Found {
    identity: SessionIdentity,
    document: String,
    degraded: bool,
}

enum Activation {
    Confirmed(Found),
    Degraded,
    Checkpointed,
}

/// The recovery machine for one session's cookie jar.
pub struct SessionRecovery {
    http: Arc<dyn HttpClient>,
    jar: Arc<CookieStore>,
    bypass: AutomationBypass,
    backups: Option<Arc<dyn BackupSink>>,
    login: Option<Arc<dyn LoginProvider>>,
    dtsg: Arc<DtsgCache>,
    options: RecoveryOptions,
    in_flight: Mutex<()>,
    /// Successful recoveries so far; a waiter that sees it move knows the
    /// jar was just made live.
    completed: AtomicU64,
    /// Identity and degraded flag of the last success.
    last_success: parking_lot::Mutex<Option<(SessionIdentity, bool)>>,
}

impl SessionRecovery {
    pub fn new(http: Arc<dyn HttpClient>, jar: Arc<CookieStore>, options: RecoveryOptions) -> Self {
        Self {
            bypass: AutomationBypass::new(http.clone()),
            http,
            jar,
            backups: None,
            login: None,
            dtsg: Arc::new(DtsgCache::default()),
            options,
            in_flight: Mutex::new(()),
            completed: AtomicU64::new(0),
            last_success: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_backups(mut self, sink: Arc<dyn BackupSink>) -> Self {
        self.backups = Some(sink);
        self
    }

    pub fn with_login_provider(mut self, provider: Arc<dyn LoginProvider>) -> Self {
        self.login = Some(provider);
        self
    }

    pub fn with_dtsg_cache(mut self, cache: Arc<DtsgCache>) -> Self {
        self.dtsg = cache;
        self
    }

    pub fn jar(&self) -> &Arc<CookieStore> {
        &self.jar
    }

    pub fn http(&self) -> &Arc<dyn HttpClient> {
        &self.http
    }

    pub fn bypass(&self) -> &AutomationBypass {
        &self.bypass
    }

    pub fn backups(&self) -> Option<&Arc<dyn BackupSink>> {
        self.backups.as_ref()
    }

    pub fn dtsg_cache(&self) -> &Arc<DtsgCache> {
        &self.dtsg
    }

    /// Run the ladder. Concurrent calls queue behind the one in flight; a
    /// call without a session seed that waited on a successful attempt
    /// reuses the jar that attempt left behind once the page confirms it.
    pub async fn recover(&self, seed: Option<SessionSeed>) -> Result<RecoveredSession, SessionError> {
        let observed = self.completed.load(Ordering::SeqCst);
        let _attempt = self.in_flight.lock().await;

        let explicit_seed = seed
            .as_ref()
            .is_some_and(SessionSeed::carries_session_state);
        let mut ctx = RecoveryContext::new(explicit_seed, self.options.max_attempts);

        let previous = self.last_success.lock().clone();
        if !explicit_seed
            && self.completed.load(Ordering::SeqCst) != observed
            && let Some(previous) = previous
        {
            ctx.enter(RecoveryStage::Seeded);
            if let Some(found) = self.confirm_current(&mut ctx, previous).await {
                tracing::info!("Session recovered while waiting, reusing it");
                return Ok(self.finish(found, &ctx));
            }
            tracing::warn!("Session recovered while waiting is no longer live");
        }
        let mut explicit_credentials = None;
        let mut target = None;

        match seed {
            Some(SessionSeed::Credentials(credentials)) => {
                explicit_credentials = Some(credentials);
            }
            Some(seed) => {
                ctx.enter(RecoveryStage::Seeded);
                let imported = self.import_seed(&seed);
                target = liveness::identity_from_cookies(&self.jar.snapshot());
                if imported == 0 {
                    tracing::warn!("Session seed contained no usable cookies");
                } else if let Some(found) = self.probe_stage(&mut ctx, true).await {
                    return Ok(self.finish(found, &ctx));
                }
            }
            None => {}
        }

        if let Some(sink) = self.backups.clone() {
            ctx.enter(RecoveryStage::BackupRestore);
            match self.restore_from_backup(sink.as_ref(), target.as_ref()).await {
                Ok(true) => {
                    tracing::info!("Trying session restored from backup");
                    if let Some(found) = self.probe_stage(&mut ctx, false).await {
                        return Ok(self.finish(found, &ctx));
                    }
                    tracing::warn!("Backup session is dead, falling through to credential login");
                }
                Ok(false) => tracing::info!("No usable backup snapshot"),
                Err(e) => tracing::warn!("Backup restore failed: {}", e),
            }
        }

        ctx.enter(RecoveryStage::CredentialLogin);
        let found = self.credential_login(&mut ctx, explicit_credentials).await?;
        Ok(self.finish(found, &ctx))
    }

    fn import_seed(&self, seed: &SessionSeed) -> usize {
        match seed {
            SessionSeed::CookieHeader(raw) => self.jar.import_header_string(raw),
            SessionSeed::AppState(entries) => self.jar.import_app_state(entries),
            SessionSeed::Credentials(_) => 0,
        }
    }

    /// Replace the jar with the newest snapshot for `target`, or the newest
    /// of any identity when `target` is unknown. Cookie snapshots are
    /// preferred over app state.
    async fn restore_from_backup(
        &self,
        sink: &dyn BackupSink,
        target: Option<&SessionIdentity>,
    ) -> Result<bool, DatabaseError> {
        for kind in [SnapshotKind::Cookie, SnapshotKind::AppState] {
            let snapshot = match target {
                Some(identity) => sink.get(identity.as_str(), kind).await?,
                None => sink.get_latest_any(kind).await?,
            };
            let Some(snapshot) = snapshot else {
                continue;
            };

            match kind {
                SnapshotKind::Cookie => {
                    let pairs = normalize_cookie_header(&snapshot.data);
                    if pairs.is_empty() {
                        continue;
                    }
                    self.jar.clear();
                    self.jar.import_pairs(&pairs, DEFAULT_COOKIE_DOMAIN);
                }
                SnapshotKind::AppState => {
                    let entries = match parse_app_state(&snapshot.data) {
                        Ok(entries) if !entries.is_empty() => entries,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::debug!("Ignoring unreadable app-state backup: {}", e);
                            continue;
                        }
                    };
                    self.jar.clear();
                    self.jar.import_app_state(&entries);
                }
            }
            tracing::info!(
                "Restored {} backup of user {}",
                kind,
                snapshot.identity
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Probe the origin and judge the page. A cookie-only identity is
    /// accepted, after activation, only when `accept_cookie_only` is set.
    async fn probe_stage(&self, ctx: &mut RecoveryContext, accept_cookie_only: bool) -> Option<Found> {
        let response = match self.fetch_with_retry(ctx, ORIGIN_URL).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("{} probe failed: {}", ctx.stage(), e);
                return None;
            }
        };

        match self.judge(ctx, response).await {
            Liveness::Live(identity) => Some(Found {
                identity,
                document: ctx.document().to_string(),
                degraded: false,
            }),
            Liveness::CookieOnly(identity) if accept_cookie_only => {
                tracing::warn!(
                    "Page shows no USER_ID but cookies carry {}, attempting to activate session",
                    identity
                );
                match self.activate(ctx).await {
                    Activation::Confirmed(found) => Some(found),
                    Activation::Degraded => Some(Found {
                        identity,
                        document: ctx.document().to_string(),
                        degraded: true,
                    }),
                    Activation::Checkpointed => None,
                }
            }
            Liveness::Checkpointed => {
                tracing::error!("{} session is checkpointed", ctx.stage());
                None
            }
            Liveness::CookieOnly(_) | Liveness::Dead => None,
        }
    }

    /// Re-check the jar a concurrent attempt just recovered. A degraded
    /// result stays acceptable while the cookies still name the same user.
    async fn confirm_current(
        &self,
        ctx: &mut RecoveryContext,
        (previous, was_degraded): (SessionIdentity, bool),
    ) -> Option<Found> {
        let response = match self.fetch_with_retry(ctx, ORIGIN_URL).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Re-check of recovered session failed: {}", e);
                return None;
            }
        };
        match self.judge(ctx, response).await {
            Liveness::Live(identity) => Some(Found {
                identity,
                document: ctx.document().to_string(),
                degraded: false,
            }),
            Liveness::CookieOnly(identity)
                if was_degraded && identity.as_str() == previous.as_str() =>
            {
                Some(Found {
                    identity,
                    document: ctx.document().to_string(),
                    degraded: true,
                })
            }
            _ => None,
        }
    }

    /// Run the bypass on a fetched page and classify the result.
    async fn judge(&self, ctx: &mut RecoveryContext, response: HttpResponse) -> Liveness {
        let hint = liveness::identity_from_cookies(&self.jar.snapshot());
        let outcome = self.bypass.run(response, &self.jar, hint.as_ref()).await;
        ctx.observe(&outcome.response.body);

        let verdict = if outcome.state == BypassState::StillChallenged {
            Liveness::Checkpointed
        } else {
            liveness::classify(&outcome.response.body, &self.jar.snapshot())
        };
        if verdict == Liveness::Checkpointed {
            ctx.mark_checkpoint();
            self.dtsg.invalidate();
        }
        verdict
    }

    async fn fetch_with_retry(
        &self,
        ctx: &mut RecoveryContext,
        url: &str,
    ) -> Result<HttpResponse, HttpError> {
        let stage = ctx.stage();
        let base_delay = self.options.base_delay;
        retry(ctx, base_delay, || self.http.get(url, &self.jar), |e: &HttpError| {
            tracing::warn!("{} fetch of {} failed: {}", stage, url, e);
            true
        })
        .await
    }

    async fn credential_login(
        &self,
        ctx: &mut RecoveryContext,
        explicit: Option<Credentials>,
    ) -> Result<Found, SessionError> {
        let stage = RecoveryStage::CredentialLogin;
        let credentials = match explicit {
            Some(credentials) => credentials,
            None if !self.options.auto_login => {
                return Err(SessionError::Configuration {
                    stage,
                    reason: "no valid session and auto-login is disabled".to_string(),
                });
            }
            None => self
                .options
                .credentials
                .clone()
                .ok_or_else(|| SessionError::Configuration {
                    stage,
                    reason: "missing credentials for auto-login (email/password not configured)"
                        .to_string(),
                })?,
        };
        let provider = self
            .login
            .clone()
            .ok_or_else(|| SessionError::Configuration {
                stage,
                reason: "no login provider configured".to_string(),
            })?;

        tracing::info!("Attempting credential login for {}", mask(&credentials.email, 3));
        let request = LoginRequest {
            email: credentials.email,
            password: credentials.password,
            two_factor: credentials.two_factor,
            base_url: None,
        };
        let grant = self.login_with_retry(ctx, provider.as_ref(), &request).await?;
        if grant.cookie_pairs.is_empty() {
            return Err(SessionError::Establishment {
                stage,
                reason: "login provider returned no cookies".to_string(),
            });
        }
        let imported = self
            .jar
            .import_pairs(&grant.cookie_pairs, DEFAULT_COOKIE_DOMAIN);
        tracing::info!("Imported {} cookies from login provider", imported);
        tokio::time::sleep(POST_LOGIN_SETTLE).await;

        let max = self.options.max_attempts.max(1);
        for attempt in 0..max {
            let url = POST_LOGIN_URLS[attempt as usize % POST_LOGIN_URLS.len()];
            tracing::info!("Refreshing {} (attempt {}/{})", url, attempt + 1, max);
            match self.http.get(url, &self.jar).await {
                Ok(response) => match self.judge(ctx, response).await {
                    Liveness::Live(identity) => {
                        return Ok(Found {
                            identity,
                            document: ctx.document().to_string(),
                            degraded: false,
                        });
                    }
                    Liveness::Checkpointed => return Err(SessionError::Checkpoint { stage }),
                    _ => tracing::warn!("No valid USER_ID in page from {}", url),
                },
                Err(e) if attempt + 1 == max => {
                    return Err(SessionError::Establishment {
                        stage,
                        reason: e.to_string(),
                    });
                }
                Err(e) => tracing::warn!("Refreshing {} failed: {}", url, e),
            }
            if attempt + 1 < max {
                tokio::time::sleep(self.options.base_delay * (attempt + 1)).await;
            }
        }

        let fallback = liveness::identity_from_cookies(&self.jar.snapshot())
            .or(grant.identity)
            .ok_or_else(|| SessionError::Establishment {
                stage,
                reason: "could not get a valid identity after credential login".to_string(),
            })?;
        match self.activate(ctx).await {
            Activation::Confirmed(found) => Ok(found),
            Activation::Degraded => Ok(Found {
                identity: fallback,
                document: ctx.document().to_string(),
                degraded: true,
            }),
            Activation::Checkpointed => Err(SessionError::Checkpoint {
                stage: RecoveryStage::SessionActivation,
            }),
        }
    }

    async fn login_with_retry(
        &self,
        ctx: &mut RecoveryContext,
        provider: &dyn LoginProvider,
        request: &LoginRequest,
    ) -> Result<LoginGrant, SessionError> {
        let stage = ctx.stage();
        retry(ctx, self.options.base_delay, || provider.login(request), |e: &LoginError| {
            tracing::warn!("Login provider call failed: {}", e);
            matches!(e, LoginError::RequestFailed(_))
        })
        .await
        .map_err(|e| match e {
            LoginError::Rejected(reason) => SessionError::Authentication {
                stage,
                reason: redact_sensitive_detail(&reason),
            },
            LoginError::InvalidResponse(reason) | LoginError::RequestFailed(reason) => {
                SessionError::Establishment {
                    stage,
                    reason: redact_sensitive_detail(&reason),
                }
            }
        })
    }

    /// Nudge a cookie-only session through the home pages.
    async fn activate(&self, ctx: &mut RecoveryContext) -> Activation {
        ctx.enter(RecoveryStage::SessionActivation);
        for (delay, url) in ACTIVATION_STEPS {
            tokio::time::sleep(delay).await;
            tracing::info!("Trying to activate session via {}", url);
            let response = match self.http.get(url, &self.jar).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("Activation fetch of {} failed: {}", url, e);
                    continue;
                }
            };
            ctx.observe(&response.body);
            match liveness::classify(&response.body, &self.jar.snapshot()) {
                Liveness::Live(identity) => {
                    tracing::info!("Session activated via {}", url);
                    return Activation::Confirmed(Found {
                        identity,
                        document: response.body,
                        degraded: false,
                    });
                }
                Liveness::Checkpointed => {
                    ctx.mark_checkpoint();
                    self.dtsg.invalidate();
                    return Activation::Checkpointed;
                }
                Liveness::CookieOnly(_) | Liveness::Dead => {}
            }
        }
        tracing::warn!("Page never showed a valid USER_ID, proceeding with cookie identity");
        Activation::Degraded
    }

    fn finish(&self, found: Found, ctx: &RecoveryContext) -> RecoveredSession {
        if self.dtsg.refresh_from(&found.document).is_none() {
            tracing::debug!("No fb_dtsg in login document");
        }
        tracing::info!(
            "Logged in as {} via {}{}",
            found.identity,
            ctx.stage(),
            if found.degraded { " (degraded)" } else { "" }
        );
        *self.last_success.lock() = Some((found.identity.clone(), found.degraded));
        self.completed.fetch_add(1, Ordering::SeqCst);
        let backup_task = self
            .backups
            .clone()
            .map(|sink| spawn_backup(sink, &found.identity, &self.jar));
        RecoveredSession {
            identity: found.identity,
            stage: ctx.stage(),
            degraded: found.degraded,
            document: found.document,
            backup_task,
        }
    }
}

/// Retry `op` with an escalating delay while `retryable` approves the
/// error and the context's budget lasts.
async fn retry<T, E, F, Fut>(
    ctx: &mut RecoveryContext,
    base_delay: Duration,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        let attempt = ctx.begin_attempt();
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !retryable(&e) || ctx.exhausted() => return Err(e),
            Err(_) => tokio::time::sleep(base_delay * attempt).await,
        }
    }
}

/// Write the jar's cookie header and app state for `identity` in the
/// background. Failures are logged, never returned.
pub fn spawn_backup(
    sink: Arc<dyn BackupSink>,
    identity: &SessionIdentity,
    jar: &CookieStore,
) -> JoinHandle<()> {
    let identity = identity.as_str().to_string();
    let header = jar.export_header_string();
    let app_state = serde_json::to_string(&jar.export_app_state());

    tokio::spawn(async move {
        match app_state {
            Ok(json) => {
                if let Err(e) = sink.put(&identity, SnapshotKind::AppState, &json).await {
                    tracing::warn!("Failed to save appstate backup: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize appstate backup: {}", e),
        }
        match sink.put(&identity, SnapshotKind::Cookie, &header).await {
            Ok(()) => tracing::info!("Backup stored for user {}", identity),
            Err(e) => tracing::warn!("Failed to save cookie backup: {}", e),
        }
    })
}
