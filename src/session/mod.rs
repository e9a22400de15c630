//! Cookie session: jar, liveness signals, recovery and the session handle.

pub mod bypass;
pub mod context;
pub mod cookies;
pub mod handle;
pub mod http;
pub mod identity;
pub mod liveness;
pub mod login_provider;
pub mod recovery;
pub mod tokens;

#[cfg(test)]
pub(crate) mod testing;

pub use bypass::{AutomationBypass, BypassOutcome, BypassState};
pub use context::SessionContext;
pub use cookies::{AppStateCookie, Cookie, CookieStore};
pub use handle::Session;
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use identity::{IdentitySource, SessionIdentity};
pub use liveness::Liveness;
pub use login_provider::{ApiLoginProvider, LoginGrant, LoginProvider, LoginRequest};
pub use recovery::{
    Credentials, RecoveredSession, RecoveryContext, RecoveryOptions, RecoveryStage,
    SessionRecovery, SessionSeed,
};
pub use tokens::DtsgCache;
