//! The logged-in session as capability modules see it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backup::{SessionSnapshot, SnapshotKind};
use crate::error::{DatabaseError, DispatchError, HttpError, SessionError};
use crate::realtime::{
    DispatchCounters, InboundMessage, RealtimeTransport, TaskDescriptor, TaskDispatcher,
    TaskResult,
};
use crate::session::bypass::BypassOutcome;
use crate::session::context::SessionContext;
use crate::session::cookies::{AppStateCookie, CookieStore, ORIGIN_URL, parse_app_state};
use crate::session::identity::SessionIdentity;
use crate::session::recovery::{RecoveredSession, SessionRecovery, SessionSeed};

/// An authenticated session and its realtime channel.
pub struct Session {
    identity: SessionIdentity,
    context: SessionContext,
    degraded: bool,
    recovery: Arc<SessionRecovery>,
    dispatcher: Mutex<Option<Arc<TaskDispatcher>>>,
    /// Counter floor carried from torn-down dispatchers.
    counters: Mutex<DispatchCounters>,
    reply_timeout: Duration,
    logged_in: AtomicBool,
}

impl Session {
    /// Recover a session and wrap it. The returned handle, if any, is the
    /// background backup write.
    pub async fn login(
        recovery: Arc<SessionRecovery>,
        seed: Option<SessionSeed>,
        reply_timeout: Duration,
    ) -> Result<(Self, Option<JoinHandle<()>>), SessionError> {
        let recovered = recovery.recover(seed).await?;
        Ok(Self::from_recovered(recovery, recovered, reply_timeout))
    }

    fn from_recovered(
        recovery: Arc<SessionRecovery>,
        recovered: RecoveredSession,
        reply_timeout: Duration,
    ) -> (Self, Option<JoinHandle<()>>) {
        let context = SessionContext::from_document(recovered.identity.clone(), &recovered.document);
        if let Some(region) = context.region_info() {
            tracing::info!("Realtime region {} ({})", region.code, region.location);
        } else {
            tracing::info!("Realtime region {}", context.region);
        }
        let session = Self {
            identity: recovered.identity,
            context,
            degraded: recovered.degraded,
            recovery,
            dispatcher: Mutex::new(None),
            counters: Mutex::new(DispatchCounters::default()),
            reply_timeout,
            logged_in: AtomicBool::new(true),
        };
        (session, recovered.backup_task)
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// True from login until [`Session::teardown`].
    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    /// Whether the identity only ever came from cookies.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn jar(&self) -> &Arc<CookieStore> {
        self.recovery.jar()
    }

    pub fn cookie_header(&self) -> String {
        self.jar().export_header_string()
    }

    pub fn app_state(&self) -> Vec<AppStateCookie> {
        self.jar().export_app_state()
    }

    /// Newest snapshot of `kind` for `identity`, defaulting to this
    /// session's own identity. `None` without a backup sink.
    pub async fn get_latest_backup(
        &self,
        identity: Option<&str>,
        kind: SnapshotKind,
    ) -> Result<Option<SessionSnapshot>, DatabaseError> {
        let Some(sink) = self.recovery.backups() else {
            return Ok(None);
        };
        sink.get(identity.unwrap_or(self.identity.as_str()), kind)
            .await
    }

    pub async fn get_latest_app_state_from_backup(
        &self,
        identity: Option<&str>,
    ) -> Result<Option<Vec<AppStateCookie>>, DatabaseError> {
        self.get_latest_backup(identity, SnapshotKind::AppState)
            .await?
            .map(|snapshot| {
                parse_app_state(&snapshot.data)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))
            })
            .transpose()
    }

    pub async fn get_latest_cookie_from_backup(
        &self,
        identity: Option<&str>,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .get_latest_backup(identity, SnapshotKind::Cookie)
            .await?
            .map(|snapshot| snapshot.data))
    }

    /// Bind a (re)connected channel. Any previous dispatcher is torn down
    /// and its counters carried over, so request ids are never reused.
    /// Returns the inbound loop's handle.
    pub fn attach_transport(
        &self,
        transport: Arc<dyn RealtimeTransport>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> JoinHandle<()> {
        let mut slot = self.dispatcher.lock();
        if let Some(previous) = slot.take() {
            previous.teardown("realtime channel replaced");
            self.raise_floor(previous.counters());
        }
        let dispatcher = Arc::new(TaskDispatcher::resume(
            transport,
            self.reply_timeout,
            *self.counters.lock(),
        ));
        *slot = Some(dispatcher.clone());
        drop(slot);

        tokio::spawn(async move { dispatcher.run(inbound).await })
    }

    fn raise_floor(&self, seen: DispatchCounters) {
        let mut floor = self.counters.lock();
        floor.request = floor.request.max(seen.request);
        floor.task = floor.task.max(seen.task);
    }

    fn current_dispatcher(&self) -> Option<Arc<TaskDispatcher>> {
        self.dispatcher.lock().clone()
    }

    pub async fn submit_task(&self, task: TaskDescriptor) -> Result<TaskResult, DispatchError> {
        let dispatcher = self
            .current_dispatcher()
            .ok_or_else(|| DispatchError::Connectivity {
                reason: "no realtime channel attached".to_string(),
            })?;
        dispatcher.submit(task).await
    }

    /// Last issued request and task ids.
    pub fn counters(&self) -> DispatchCounters {
        let floor = *self.counters.lock();
        match self.current_dispatcher() {
            Some(dispatcher) => {
                let live = dispatcher.counters();
                DispatchCounters {
                    request: live.request.max(floor.request),
                    task: live.task.max(floor.task),
                }
            }
            None => floor,
        }
    }

    /// Reject every pending task and drop the channel.
    pub fn teardown(&self, reason: &str) -> usize {
        self.logged_in.store(false, Ordering::SeqCst);
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return 0;
        };
        let rejected = dispatcher.teardown(reason);
        self.raise_floor(dispatcher.counters());
        rejected
    }

    /// Probe the origin and dismiss an automation challenge if one shows.
    pub async fn bypass_automation(&self) -> Result<BypassOutcome, HttpError> {
        self.recovery
            .bypass()
            .probe(self.jar(), Some(&self.identity))
            .await
    }

    /// Cached fb_dtsg, if still fresh.
    pub fn fb_dtsg(&self) -> Option<String> {
        self.recovery.dtsg_cache().get()
    }

    /// Re-fetch the origin and refresh the cached fb_dtsg from it.
    pub async fn refresh_fb_dtsg(&self) -> Result<Option<String>, HttpError> {
        let response = self.recovery.http().get(ORIGIN_URL, self.jar()).await?;
        let token = self.recovery.dtsg_cache().refresh_from(&response.body);
        if token.is_none() {
            tracing::warn!("fb_dtsg not found while refreshing");
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::backup::{BackupSink, MemoryBackupSink};
    use crate::realtime::{MemoryTransport, RESPONSE_TOPIC};
    use crate::session::recovery::RecoveryOptions;
    use crate::session::testing::{ScriptedHttp, logged_in_page};

    async fn session_with(sink: Option<Arc<MemoryBackupSink>>) -> Session {
        let http = Arc::new(ScriptedHttp::new(|req| Ok(logged_in_page(&req.url, "1001"))));
        let mut recovery =
            SessionRecovery::new(http, Arc::new(CookieStore::new()), RecoveryOptions::default());
        if let Some(sink) = sink {
            recovery = recovery.with_backups(sink);
        }
        let (session, backup) = Session::login(
            Arc::new(recovery),
            Some(SessionSeed::CookieHeader("c_user=1001; xs=abc".into())),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        if let Some(backup) = backup {
            backup.await.unwrap();
        }
        session
    }

    #[tokio::test]
    async fn exposes_identity_and_cookies() {
        let session = session_with(None).await;
        assert_eq!(session.identity().as_str(), "1001");
        assert!(session.is_logged_in());
        assert!(!session.is_degraded());
        assert_eq!(session.cookie_header(), "c_user=1001; xs=abc");
        assert_eq!(session.app_state().len(), 2);
        assert_eq!(session.fb_dtsg().as_deref(), Some("dtsg-1001"));
        assert_eq!(session.get_latest_backup(None, SnapshotKind::Cookie).await.unwrap(), None);
    }

    #[tokio::test]
    async fn backup_reads_default_to_own_identity() {
        let sink = Arc::new(MemoryBackupSink::new());
        let session = session_with(Some(sink.clone())).await;

        assert_eq!(
            session.get_latest_cookie_from_backup(None).await.unwrap().as_deref(),
            Some("c_user=1001; xs=abc")
        );
        let app_state = session
            .get_latest_app_state_from_backup(None)
            .await
            .unwrap()
            .unwrap();
        assert!(app_state.iter().any(|c| c.key == "c_user"));

        sink.put("42", SnapshotKind::Cookie, "c_user=42").await.unwrap();
        assert_eq!(
            session.get_latest_cookie_from_backup(Some("42")).await.unwrap().as_deref(),
            Some("c_user=42")
        );
    }

    #[tokio::test]
    async fn submit_without_channel_is_a_connectivity_error() {
        let session = session_with(None).await;
        let err = session
            .submit_task(TaskDescriptor::direct("a", "3", json!({}), "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn reattaching_keeps_request_ids_increasing() {
        let session = session_with(None).await;

        let (transport, mut published) = MemoryTransport::new();
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        session.attach_transport(Arc::new(transport), inbound_rx);
        session
            .submit_task(TaskDescriptor::direct("a", "3", json!({}), "v"))
            .await
            .unwrap();
        published.recv().await.unwrap();
        assert_eq!(session.counters().request, 1);

        let (transport, _published) = MemoryTransport::new();
        let (_inbound_tx2, inbound_rx) = mpsc::channel(8);
        session.attach_transport(Arc::new(transport), inbound_rx);
        let result = session
            .submit_task(TaskDescriptor::direct("a", "3", json!({}), "v"))
            .await
            .unwrap();
        assert_eq!(result.request_id, 2);
    }

    #[tokio::test]
    async fn inbound_loop_resolves_replies_and_teardown_rejects() {
        let session = Arc::new(session_with(None).await);
        let (transport, mut published) = MemoryTransport::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        session.attach_transport(Arc::new(transport), inbound_rx);

        let s = session.clone();
        let answered = tokio::spawn(async move {
            s.submit_task(TaskDescriptor::queued("a", "742", "edit_message", json!({}), "v"))
                .await
        });
        let sent: serde_json::Value =
            serde_json::from_str(&published.recv().await.unwrap().payload).unwrap();
        inbound_tx
            .send(InboundMessage::new(
                RESPONSE_TOPIC,
                json!({"request_id": sent["request_id"], "payload": "{}"}).to_string(),
            ))
            .await
            .unwrap();
        assert!(answered.await.unwrap().is_ok());

        let s = session.clone();
        let pending = tokio::spawn(async move {
            s.submit_task(TaskDescriptor::queued("a", "742", "edit_message", json!({}), "v"))
                .await
        });
        published.recv().await.unwrap();
        assert_eq!(session.teardown("logout"), 1);
        assert!(!session.is_logged_in());
        assert!(matches!(
            pending.await.unwrap(),
            Err(DispatchError::Connectivity { .. })
        ));
        assert_eq!(session.counters().request, 2);
    }
}
