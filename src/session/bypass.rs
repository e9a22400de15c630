//! Automation-challenge dismissal.
//!
//! When a fetch lands on the automation-challenge interstitial, the page
//! carries the tokens needed to sign a dismissal mutation. The flow submits
//! it, re-fetches the origin and reports whether the challenge cleared.
//! It is best effort: any failure hands the caller's original response
//! back unchanged.

use std::sync::Arc;

use crate::error::HttpError;
use crate::session::cookies::{CookieStore, ORIGIN_URL};
use crate::session::http::{HttpClient, HttpResponse};
use crate::session::identity::SessionIdentity;
use crate::session::liveness;
use crate::session::tokens::BypassTokens;

pub const GRAPHQL_URL: &str = "https://www.facebook.com/api/graphql/";

const DISMISS_FRIENDLY_NAME: &str = "FBScrapingWarningMutation";
const DISMISS_DOC_ID: &str = "6339492849481770";

/// Result of running the flow against one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassState {
    /// The response was not a challenge; nothing was sent.
    NotChallenged,
    /// The dismissal went through and the origin no longer challenges.
    Cleared,
    /// The challenge persists, or the flow failed before completing.
    StillChallenged,
}

#[derive(Debug, Clone)]
pub struct BypassOutcome {
    pub state: BypassState,
    pub response: HttpResponse,
}

/// The single automation-bypass component, shared by recovery and by any
/// later caller that hits the challenge.
pub struct AutomationBypass {
    http: Arc<dyn HttpClient>,
}

impl AutomationBypass {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Fetch the origin and run the flow on whatever comes back.
    pub async fn probe(
        &self,
        jar: &CookieStore,
        identity: Option<&SessionIdentity>,
    ) -> Result<BypassOutcome, HttpError> {
        let first = self.http.get(ORIGIN_URL, jar).await?;
        Ok(self.run(first, jar, identity).await)
    }

    /// Run the flow against an already-fetched response.
    pub async fn run(
        &self,
        response: HttpResponse,
        jar: &CookieStore,
        identity: Option<&SessionIdentity>,
    ) -> BypassOutcome {
        if !liveness::is_automation_challenge(&response.url) {
            return BypassOutcome {
                state: BypassState::NotChallenged,
                response,
            };
        }

        tracing::warn!("Automation warning detected, attempting dismissal");
        match self.dismiss(&response, jar, identity).await {
            Ok(refreshed) => {
                let state = if liveness::is_automation_challenge(&refreshed.url)
                    || liveness::is_checkpointed(&refreshed.body)
                {
                    tracing::warn!("Checkpoint still present after refresh");
                    BypassState::StillChallenged
                } else {
                    tracing::info!("Bypass complete, cookies refreshed");
                    BypassState::Cleared
                };
                BypassOutcome {
                    state,
                    response: refreshed,
                }
            }
            Err(reason) => {
                tracing::error!("Bypass automation error: {}", reason);
                BypassOutcome {
                    state: BypassState::StillChallenged,
                    response,
                }
            }
        }
    }

    async fn dismiss(
        &self,
        challenged: &HttpResponse,
        jar: &CookieStore,
        identity: Option<&SessionIdentity>,
    ) -> Result<HttpResponse, String> {
        let actor = identity
            .cloned()
            .or_else(|| liveness::extract_identity(Some(&challenged.body), &jar.snapshot()))
            .ok_or_else(|| "no identity to sign the dismissal with".to_string())?;
        let tokens = BypassTokens::extract(&challenged.body)
            .map_err(|missing| format!("token {missing} not found in challenge page"))?;

        let form = dismissal_form(&actor, &tokens);
        self.http
            .post_form(GRAPHQL_URL, &form, jar)
            .await
            .map_err(|e| e.to_string())?;
        self.http
            .get(ORIGIN_URL, jar)
            .await
            .map_err(|e| e.to_string())
    }
}

fn dismissal_form(actor: &SessionIdentity, tokens: &BypassTokens) -> Vec<(String, String)> {
    [
        ("av", actor.as_str()),
        ("fb_dtsg", tokens.fb_dtsg.as_str()),
        ("jazoest", tokens.jazoest.as_str()),
        ("lsd", tokens.lsd.as_str()),
        ("fb_api_caller_class", "RelayModern"),
        ("fb_api_req_friendly_name", DISMISS_FRIENDLY_NAME),
        ("variables", "{}"),
        ("server_timestamps", "true"),
        ("doc_id", DISMISS_DOC_ID),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{ScriptedHttp, logged_in_page, page};
    use std::sync::atomic::{AtomicBool, Ordering};

    const CHALLENGE_URL: &str = "https://www.facebook.com/checkpoint/601051028565049/?next=%2F";
    const CHALLENGE_BODY: &str = r#"["DTSGInitData",[],{"token":"dt","async_get_token":"a"}] ["LSD",[],{"token":"ls"}] <input name="jazoest" value="2211">"#;

    fn jar_with(uid: &str) -> CookieStore {
        let jar = CookieStore::new();
        jar.import_header_string(&format!("c_user={uid}; xs=1"));
        jar
    }

    #[tokio::test]
    async fn non_challenge_passes_through_untouched() {
        let http = Arc::new(ScriptedHttp::new(|_| unreachable!("no request expected")));
        let bypass = AutomationBypass::new(http.clone());
        let original = page(ORIGIN_URL, "hello");

        let outcome = bypass.run(original.clone(), &jar_with("5"), None).await;
        assert_eq!(outcome.state, BypassState::NotChallenged);
        assert_eq!(outcome.response, original);
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn challenge_is_dismissed_and_cleared() {
        let http = Arc::new(ScriptedHttp::new(|req| {
            Ok(match req.method {
                "POST" => page(GRAPHQL_URL, "{}"),
                _ => logged_in_page(ORIGIN_URL, "5"),
            })
        }));
        let bypass = AutomationBypass::new(http.clone());

        let outcome = bypass
            .run(page(CHALLENGE_URL, CHALLENGE_BODY), &jar_with("5"), None)
            .await;
        assert_eq!(outcome.state, BypassState::Cleared);
        assert_eq!(outcome.response.url, ORIGIN_URL);

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        let post = &requests[0];
        assert_eq!(post.url, GRAPHQL_URL);
        assert_eq!(post.field("av"), Some("5"));
        assert_eq!(post.field("fb_dtsg"), Some("dt"));
        assert_eq!(post.field("lsd"), Some("ls"));
        assert_eq!(post.field("jazoest"), Some("2211"));
        assert_eq!(post.field("doc_id"), Some(DISMISS_DOC_ID));
        assert_eq!(requests[1].method, "GET");
    }

    #[tokio::test]
    async fn persisting_challenge_returns_refetched_state() {
        let http = Arc::new(ScriptedHttp::new(|req| {
            Ok(match req.method {
                "POST" => page(GRAPHQL_URL, "{}"),
                _ => page(CHALLENGE_URL, CHALLENGE_BODY),
            })
        }));
        let bypass = AutomationBypass::new(http);

        let outcome = bypass
            .run(page(CHALLENGE_URL, CHALLENGE_BODY), &jar_with("5"), None)
            .await;
        assert_eq!(outcome.state, BypassState::StillChallenged);
        assert_eq!(outcome.response.url, CHALLENGE_URL);
    }

    #[tokio::test]
    async fn failure_returns_original_response() {
        let posted = Arc::new(AtomicBool::new(false));
        let seen = posted.clone();
        let http = Arc::new(ScriptedHttp::new(move |req| {
            if req.method == "POST" {
                seen.store(true, Ordering::SeqCst);
            }
            Err(HttpError::RequestFailed {
                url: req.url.clone(),
                reason: "connection reset".into(),
            })
        }));
        let bypass = AutomationBypass::new(http);
        let original = page(CHALLENGE_URL, CHALLENGE_BODY);

        let outcome = bypass.run(original.clone(), &jar_with("5"), None).await;
        assert!(posted.load(Ordering::SeqCst));
        assert_eq!(outcome.state, BypassState::StillChallenged);
        assert_eq!(outcome.response, original);
    }

    #[tokio::test]
    async fn missing_tokens_skip_the_mutation() {
        let http = Arc::new(ScriptedHttp::new(|_| unreachable!("no request expected")));
        let bypass = AutomationBypass::new(http.clone());
        let original = page(CHALLENGE_URL, "<html>no tokens</html>");

        let outcome = bypass.run(original.clone(), &jar_with("5"), None).await;
        assert_eq!(outcome.state, BypassState::StillChallenged);
        assert_eq!(outcome.response, original);
        assert_eq!(http.calls(), 0);
    }
}
